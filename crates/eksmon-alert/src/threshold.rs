use eksmon_common::types::{AlertEvent, MetricKind, NodeMetricSample};

/// Fires when a metric is strictly above its limit.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub kind: MetricKind,
    pub value: f64,
}

impl ThresholdRule {
    pub fn new(kind: MetricKind, value: f64) -> Self {
        Self { kind, value }
    }

    /// Equal to the threshold is not a breach; a missing reading never is.
    pub fn evaluate(&self, sample: &NodeMetricSample) -> Option<AlertEvent> {
        let observed = sample.value(self.kind).filter(|v| *v > self.value)?;

        Some(AlertEvent {
            node_id: sample.node_id.clone(),
            kind: self.kind,
            value: observed,
            threshold: self.value,
            timestamp: sample.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn nan_never_breaches() {
        let rule = ThresholdRule::new(MetricKind::Cpu, 80.0);
        let sample = NodeMetricSample {
            node_id: "i-0abc".into(),
            timestamp: Utc::now(),
            cpu_percent: Some(f64::NAN),
            memory_percent: None,
            disk_percent: None,
            network_in_bytes: None,
            network_out_bytes: None,
        };
        assert!(rule.evaluate(&sample).is_none());
    }
}
