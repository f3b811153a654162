use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The utilization metrics eksmon evaluates for every node.
///
/// # Examples
///
/// ```
/// use eksmon_common::types::MetricKind;
///
/// let kind: MetricKind = "memory".parse().unwrap();
/// assert_eq!(kind, MetricKind::Memory);
/// assert_eq!(kind.to_string(), "memory");
/// assert_eq!(MetricKind::ALL.len(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
}

impl MetricKind {
    /// Evaluation and reporting order.
    pub const ALL: [MetricKind; 3] = [MetricKind::Cpu, MetricKind::Memory, MetricKind::Disk];

    /// Human-readable label used in alert messages.
    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "CPU utilization",
            MetricKind::Memory => "memory utilization",
            MetricKind::Disk => "disk utilization",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Cpu => write!(f, "cpu"),
            MetricKind::Memory => write!(f, "memory"),
            MetricKind::Disk => write!(f, "disk"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(MetricKind::Cpu),
            "memory" | "mem" => Ok(MetricKind::Memory),
            "disk" => Ok(MetricKind::Disk),
            _ => Err(format!("unknown metric kind: {s}")),
        }
    }
}

/// A node to poll: the EC2 instance backing an EKS worker node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeTarget {
    pub instance_id: String,
    /// Kubernetes node name, known when the node was discovered through
    /// Container Insights.
    pub node_name: Option<String>,
}

impl NodeTarget {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            node_name: None,
        }
    }

    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }
}

impl std::fmt::Display for NodeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_name {
            Some(name) => write!(f, "{} ({})", self.instance_id, name),
            None => write!(f, "{}", self.instance_id),
        }
    }
}

/// Latest CPU/memory/disk readings for one node in one poll cycle.
///
/// A metric with no datapoints in the lookback window is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetricSample {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    /// Bytes received over one period (`Sum`). Reported, never evaluated.
    #[serde(default)]
    pub network_in_bytes: Option<f64>,
    /// Bytes sent over one period (`Sum`). Reported, never evaluated.
    #[serde(default)]
    pub network_out_bytes: Option<f64>,
}

impl NodeMetricSample {
    pub fn value(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Cpu => self.cpu_percent,
            MetricKind::Memory => self.memory_percent,
            MetricKind::Disk => self.disk_percent,
        }
    }

    /// True when none of CPU, memory or disk came back for this node.
    pub fn is_empty(&self) -> bool {
        MetricKind::ALL.iter().all(|k| self.value(*k).is_none())
    }
}

/// EC2 attributes of the instance behind a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetails {
    pub instance_id: String,
    pub instance_type: String,
    pub private_ip: Option<String>,
    /// EC2 lifecycle state, e.g. `running`.
    pub state: String,
}

/// Kubernetes view of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub node_name: String,
    /// Parsed from `spec.providerID` (`aws:///<az>/<instance-id>`).
    pub instance_id: Option<String>,
    /// Failing conditions, e.g. `Ready=False` or `DiskPressure`.
    pub problems: Vec<String>,
}

impl NodeHealth {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

/// A threshold breach detected for one metric of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub node_id: String,
    pub kind: MetricKind,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    /// One-line description, e.g. `High CPU utilization: 85.00% (threshold 80.00%)`.
    pub fn summary(&self) -> String {
        format!(
            "High {}: {:.2}% (threshold {:.2}%)",
            self.kind.label(),
            self.value,
            self.threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: Option<f64>, mem: Option<f64>, disk: Option<f64>) -> NodeMetricSample {
        NodeMetricSample {
            node_id: "i-0abc".to_string(),
            timestamp: Utc::now(),
            cpu_percent: cpu,
            memory_percent: mem,
            disk_percent: disk,
            network_in_bytes: None,
            network_out_bytes: None,
        }
    }

    #[test]
    fn sample_value_maps_each_kind() {
        let s = sample(Some(1.0), Some(2.0), Some(3.0));
        assert_eq!(s.value(MetricKind::Cpu), Some(1.0));
        assert_eq!(s.value(MetricKind::Memory), Some(2.0));
        assert_eq!(s.value(MetricKind::Disk), Some(3.0));
        assert!(!s.is_empty());
    }

    #[test]
    fn sample_without_any_metric_is_empty() {
        assert!(sample(None, None, None).is_empty());
        assert!(!sample(None, None, Some(0.0)).is_empty());
    }

    #[test]
    fn network_traffic_does_not_make_a_sample_non_empty() {
        let mut s = sample(None, None, None);
        s.network_in_bytes = Some(1024.0);
        s.network_out_bytes = Some(2048.0);
        assert!(s.is_empty());
    }

    #[test]
    fn node_health_is_healthy_without_problems() {
        let mut health = NodeHealth {
            node_name: "ip-10-0-1-5.ec2.internal".to_string(),
            instance_id: Some("i-0abc".to_string()),
            problems: Vec::new(),
        };
        assert!(health.is_healthy());

        health.problems.push("MemoryPressure".to_string());
        assert!(!health.is_healthy());
    }

    #[test]
    fn sample_without_network_fields_deserializes() {
        let json = r#"{"node_id":"i-0abc","timestamp":"2024-01-01T00:00:00Z",
            "cpu_percent":12.5,"memory_percent":null,"disk_percent":null}"#;
        let s: NodeMetricSample = serde_json::from_str(json).unwrap();
        assert_eq!(s.cpu_percent, Some(12.5));
        assert_eq!(s.network_in_bytes, None);
    }

    #[test]
    fn node_target_display_includes_node_name() {
        let t = NodeTarget::new("i-0abc").with_node_name("ip-10-0-1-5.ec2.internal");
        assert_eq!(t.to_string(), "i-0abc (ip-10-0-1-5.ec2.internal)");
        assert_eq!(NodeTarget::new("i-0abc").to_string(), "i-0abc");
    }

    #[test]
    fn alert_summary_formats_two_decimals() {
        let event = AlertEvent {
            node_id: "i-0abc".to_string(),
            kind: MetricKind::Cpu,
            value: 85.0,
            threshold: 80.0,
            timestamp: Utc::now(),
        };
        assert_eq!(
            event.summary(),
            "High CPU utilization: 85.00% (threshold 80.00%)"
        );
    }

    #[test]
    fn metric_kind_serializes_lowercase() {
        let json = serde_json::to_string(&MetricKind::Disk).unwrap();
        assert_eq!(json, "\"disk\"");
        assert!("gpu".parse::<MetricKind>().is_err());
    }
}
