use crate::error::NotifyError;
use crate::{AlertBatch, NotificationChannel};
use chrono::{DateTime, Utc};
use eksmon_common::types::AlertEvent;

/// What happened to the alerts of one cycle.
#[derive(Debug)]
pub enum NotifyOutcome {
    /// Nothing breached; no channel was contacted.
    NoAlerts,
    /// Alerts were raised but no channel is configured.
    NotConfigured { alerts: usize },
    Delivered {
        alerts: usize,
        delivered: Vec<String>,
        failed: Vec<(String, NotifyError)>,
    },
}

impl NotifyOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Delivered { failed, .. } if !failed.is_empty())
    }
}

impl std::fmt::Display for NotifyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAlerts => write!(f, "no alerts"),
            Self::NotConfigured { alerts } => {
                write!(f, "{alerts} alert(s), no notification channel configured")
            }
            Self::Delivered {
                alerts,
                delivered,
                failed,
            } => {
                write!(f, "{alerts} alert(s)")?;
                if !delivered.is_empty() {
                    write!(f, ", sent via {}", delivered.join(", "))?;
                }
                for (channel, error) in failed {
                    write!(f, ", {channel} failed: {error}")?;
                }
                Ok(())
            }
        }
    }
}

/// Sends at most one batch per cycle to every channel.
pub struct NotificationManager {
    cluster_name: String,
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl NotificationManager {
    pub fn new(cluster_name: &str, channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            channels,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Delivery failures are logged and reported, never returned.
    pub async fn notify_cycle(
        &self,
        alerts: &[AlertEvent],
        timestamp: DateTime<Utc>,
    ) -> NotifyOutcome {
        if alerts.is_empty() {
            return NotifyOutcome::NoAlerts;
        }
        if self.channels.is_empty() {
            tracing::warn!(
                alerts = alerts.len(),
                "Alerts raised but no notification channel is configured"
            );
            return NotifyOutcome::NotConfigured {
                alerts: alerts.len(),
            };
        }

        let batch = AlertBatch {
            cluster: &self.cluster_name,
            alerts,
            timestamp,
        };

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for channel in &self.channels {
            match channel.send(&batch).await {
                Ok(()) => delivered.push(channel.channel_name().to_string()),
                Err(e) => {
                    tracing::error!(
                        channel = channel.channel_name(),
                        error = %e,
                        "Failed to send notification"
                    );
                    failed.push((channel.channel_name().to_string(), e));
                }
            }
        }

        NotifyOutcome::Delivered {
            alerts: alerts.len(),
            delivered,
            failed,
        }
    }
}
