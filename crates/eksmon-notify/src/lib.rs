//! Alert notification delivery.
//!
//! All alerts of one poll cycle are published together as a single
//! [`AlertBatch`] to every configured [`NotificationChannel`]. The only
//! built-in channel is SNS ([`channels::sns::SnsChannel`]).

pub mod channels;
pub mod error;
pub mod manager;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eksmon_common::types::AlertEvent;

/// SNS requires subjects shorter than 100 characters.
pub const MAX_SUBJECT_LENGTH: usize = 99;

/// The alerts of one poll cycle.
#[derive(Debug, Clone, Copy)]
pub struct AlertBatch<'a> {
    pub cluster: &'a str,
    pub alerts: &'a [AlertEvent],
    pub timestamp: DateTime<Utc>,
}

impl AlertBatch<'_> {
    pub fn subject(&self) -> String {
        format!("EKS Node Alert - {}", self.cluster)
            .chars()
            .take(MAX_SUBJECT_LENGTH)
            .collect()
    }

    /// Plain-text body: one `ALERT for instance ...` line per node, in the
    /// order nodes first appear in the batch.
    pub fn render_message(&self) -> String {
        let mut nodes: Vec<(&str, Vec<String>)> = Vec::new();
        for alert in self.alerts {
            match nodes.iter_mut().find(|(id, _)| *id == alert.node_id) {
                Some((_, lines)) => lines.push(alert.summary()),
                None => nodes.push((alert.node_id.as_str(), vec![alert.summary()])),
            }
        }

        let mut message = format!(
            "EKS node alerts for cluster {} at {}\n\n",
            self.cluster,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        for (node_id, lines) in &nodes {
            message.push_str(&format!("ALERT for instance {}: {}\n", node_id, lines.join("; ")));
        }
        message.push_str(&format!(
            "\n{} node(s), {} alert(s)\n",
            nodes.len(),
            self.alerts.len()
        ));
        message
    }
}

/// A notification target that receives one message per poll cycle.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Publishes the batch through this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails after retries (if applicable).
    async fn send(&self, batch: &AlertBatch<'_>) -> error::Result<()>;

    /// Returns the channel type name (e.g. `"sns"`).
    fn channel_name(&self) -> &str;
}
