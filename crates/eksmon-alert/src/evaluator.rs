use crate::threshold::ThresholdRule;
use eksmon_common::types::{AlertEvent, MetricKind, NodeMetricSample};
use serde::{Deserialize, Serialize};

/// Alert limits in percent (the `[thresholds]` table of the config file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_cpu")]
    pub cpu: f64,
    #[serde(default = "default_memory")]
    pub memory: f64,
    #[serde(default = "default_disk")]
    pub disk: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory: default_memory(),
            disk: default_disk(),
        }
    }
}

impl Thresholds {
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Disk => self.disk,
        }
    }

    /// Every limit must be a percentage in `0..=100`.
    pub fn validate(&self) -> Result<(), String> {
        for kind in MetricKind::ALL {
            let value = self.get(kind);
            if !(0.0..=100.0).contains(&value) {
                return Err(format!(
                    "thresholds.{kind} must be between 0 and 100, got {value}"
                ));
            }
        }
        Ok(())
    }
}

fn default_cpu() -> f64 {
    80.0
}

fn default_memory() -> f64 {
    80.0
}

fn default_disk() -> f64 {
    85.0
}

/// Evaluates samples against one rule per metric kind.
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    rules: Vec<ThresholdRule>,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: &Thresholds) -> Self {
        let rules = MetricKind::ALL
            .iter()
            .map(|kind| ThresholdRule::new(*kind, thresholds.get(*kind)))
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    /// Alerts for one sample, in CPU, memory, disk order.
    pub fn evaluate(&self, sample: &NodeMetricSample) -> Vec<AlertEvent> {
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(sample))
            .collect()
    }

    /// Alerts for a whole cycle, grouped by sample in input order.
    pub fn evaluate_all(&self, samples: &[NodeMetricSample]) -> Vec<AlertEvent> {
        samples.iter().flat_map(|s| self.evaluate(s)).collect()
    }
}

/// Map a sample and the configured limits to the alerts they produce.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use eksmon_alert::{evaluate, Thresholds};
/// use eksmon_common::types::{MetricKind, NodeMetricSample};
///
/// let thresholds = Thresholds { cpu: 80.0, memory: 80.0, disk: 80.0 };
/// let sample = NodeMetricSample {
///     node_id: "i-0abc".to_string(),
///     timestamp: Utc::now(),
///     cpu_percent: Some(85.0),
///     memory_percent: Some(50.0),
///     disk_percent: Some(10.0),
///     network_in_bytes: None,
///     network_out_bytes: None,
/// };
///
/// let alerts = evaluate(&sample, &thresholds);
/// assert_eq!(alerts.len(), 1);
/// assert_eq!(alerts[0].kind, MetricKind::Cpu);
/// ```
pub fn evaluate(sample: &NodeMetricSample, thresholds: &Thresholds) -> Vec<AlertEvent> {
    ThresholdEvaluator::new(thresholds).evaluate(sample)
}
