use chrono::{DateTime, Utc};
use eksmon_cloud::collector::CollectOutcome;
use eksmon_common::types::{AlertEvent, InstanceDetails, MetricKind, NodeHealth, NodeMetricSample};
use eksmon_notify::manager::NotifyOutcome;
use std::fmt;

const RULE: &str = "==================================================";

/// Everything one poll cycle observed and did.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub cluster_name: String,
    pub nodes_polled: usize,
    pub discovery_error: Option<String>,
    pub samples: Vec<NodeMetricSample>,
    /// `(node, reason)` for every node that returned no sample.
    pub skipped: Vec<(String, String)>,
    pub alerts: Vec<AlertEvent>,
    pub notification: NotifyOutcome,
    /// Kubernetes node conditions, when checked.
    pub health: Option<Vec<NodeHealth>>,
    pub health_error: Option<String>,
    pub instances: Vec<InstanceDetails>,
    pub inventory_error: Option<String>,
}

impl CycleReport {
    pub fn new(
        cycle: u64,
        timestamp: DateTime<Utc>,
        cluster_name: &str,
        collected: CollectOutcome,
        alerts: Vec<AlertEvent>,
        notification: NotifyOutcome,
    ) -> Self {
        Self {
            cycle,
            timestamp,
            cluster_name: cluster_name.to_string(),
            nodes_polled: collected.nodes.len(),
            discovery_error: collected.discovery_error,
            samples: collected.samples,
            skipped: collected
                .unavailable
                .into_iter()
                .map(|u| (u.node.to_string(), u.error.to_string()))
                .collect(),
            alerts,
            notification,
            health: collected.health,
            health_error: collected.health_error,
            instances: collected.instances,
            inventory_error: collected.inventory_error,
        }
    }

    /// Sampled nodes with at least one breached threshold.
    pub fn alerting_nodes(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| self.alerts.iter().any(|a| a.node_id == s.node_id))
            .count()
    }

    /// Nodes Kubernetes reports as not ready or under pressure.
    pub fn unhealthy_nodes(&self) -> Vec<&NodeHealth> {
        self.health
            .iter()
            .flatten()
            .filter(|h| !h.is_healthy())
            .collect()
    }

    fn instance(&self, instance_id: &str) -> Option<&InstanceDetails> {
        self.instances.iter().find(|i| i.instance_id == instance_id)
    }
}

fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}%"),
        None => "n/a".to_string(),
    }
}

fn bytes(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.0} bytes"),
        None => "n/a".to_string(),
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{RULE}")?;
        writeln!(
            f,
            "EKS CLUSTER MONITORING SUMMARY - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "Cluster: {}", self.cluster_name)?;
        writeln!(f, "Cycle: {}", self.cycle)?;
        if let Some(error) = &self.discovery_error {
            writeln!(f, "Node discovery failed: {error}")?;
        }
        writeln!(f, "Total Nodes: {}", self.nodes_polled)?;
        match (&self.health, &self.health_error) {
            (Some(health), _) => {
                let unhealthy = self.unhealthy_nodes().len();
                writeln!(f, "Healthy Nodes: {}", health.len() - unhealthy)?;
                writeln!(f, "Unhealthy Nodes: {unhealthy}")?;
            }
            (None, Some(error)) => writeln!(f, "Node health check failed: {error}")?,
            (None, None) => {}
        }
        writeln!(f, "Alerting Nodes: {}", self.alerting_nodes())?;
        writeln!(f, "Skipped Nodes: {}", self.skipped.len())?;

        let unhealthy = self.unhealthy_nodes();
        if !unhealthy.is_empty() {
            writeln!(f, "\nUnhealthy Node Details:")?;
            for node in unhealthy {
                let instance = node.instance_id.as_deref().unwrap_or("unknown instance");
                writeln!(f, "  - {} ({instance}): {}", node.node_name, node.problems.join(", "))?;
            }
        }

        if !self.skipped.is_empty() {
            writeln!(f, "\nSkipped Node Details:")?;
            for (node, reason) in &self.skipped {
                writeln!(f, "  - {node}: {reason}")?;
            }
        }

        if let Some(error) = &self.inventory_error {
            writeln!(f, "\nInstance details unavailable: {error}")?;
        }

        if !self.samples.is_empty() {
            writeln!(f, "\nNode Metrics:")?;
            for sample in &self.samples {
                writeln!(f, "\n  Instance: {}", sample.node_id)?;
                if let Some(details) = self.instance(&sample.node_id) {
                    writeln!(f, "    Type: {}", details.instance_type)?;
                    writeln!(
                        f,
                        "    Private IP: {}",
                        details.private_ip.as_deref().unwrap_or("n/a")
                    )?;
                    writeln!(f, "    State: {}", details.state)?;
                }
                for kind in MetricKind::ALL {
                    writeln!(f, "    - {}: {}", kind, percent(sample.value(kind)))?;
                }
                writeln!(f, "    - network_in: {}", bytes(sample.network_in_bytes))?;
                writeln!(f, "    - network_out: {}", bytes(sample.network_out_bytes))?;
            }
        }

        if !self.alerts.is_empty() {
            writeln!(f, "\nAlerts:")?;
            for alert in &self.alerts {
                writeln!(f, "  - {}: {}", alert.node_id, alert.summary())?;
            }
        }

        writeln!(f, "\nNotification: {}", self.notification)?;
        write!(f, "{RULE}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use eksmon_cloud::collector::UnavailableNode;
    use eksmon_cloud::error::CloudProviderError;
    use eksmon_common::types::NodeTarget;

    fn sample(node: &str, cpu: Option<f64>) -> NodeMetricSample {
        NodeMetricSample {
            node_id: node.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap(),
            cpu_percent: cpu,
            memory_percent: Some(40.0),
            disk_percent: Some(12.5),
            network_in_bytes: Some(52428800.0),
            network_out_bytes: None,
        }
    }

    #[test]
    fn renders_banner_summary() {
        let collected = CollectOutcome {
            nodes: vec![
                NodeTarget::new("i-hot"),
                NodeTarget::new("i-cool"),
                NodeTarget::new("i-gone").with_node_name("ip-10-0-1-7"),
            ],
            samples: vec![sample("i-hot", Some(93.0)), sample("i-cool", None)],
            unavailable: vec![UnavailableNode {
                node: NodeTarget::new("i-gone").with_node_name("ip-10-0-1-7"),
                error: CloudProviderError::Timeout(30),
            }],
            discovery_error: None,
            health: Some(vec![
                NodeHealth {
                    node_name: "ip-10-0-1-5".to_string(),
                    instance_id: Some("i-hot".to_string()),
                    problems: Vec::new(),
                },
                NodeHealth {
                    node_name: "ip-10-0-1-7".to_string(),
                    instance_id: Some("i-gone".to_string()),
                    problems: vec!["Ready=False".to_string(), "DiskPressure".to_string()],
                },
            ]),
            health_error: None,
            instances: vec![InstanceDetails {
                instance_id: "i-hot".to_string(),
                instance_type: "m5.large".to_string(),
                private_ip: Some("10.0.1.5".to_string()),
                state: "running".to_string(),
            }],
            inventory_error: None,
        };
        let alerts = vec![AlertEvent {
            node_id: "i-hot".to_string(),
            kind: MetricKind::Cpu,
            value: 93.0,
            threshold: 80.0,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap(),
        }];
        let report = CycleReport::new(
            4,
            Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 3).unwrap(),
            "prod",
            collected,
            alerts,
            NotifyOutcome::NotConfigured { alerts: 1 },
        );

        assert_eq!(report.alerting_nodes(), 1);
        let text = report.to_string();
        assert!(text.starts_with(RULE));
        assert!(text.contains("EKS CLUSTER MONITORING SUMMARY - 2024-05-02 08:00:03"));
        assert!(text.contains("Total Nodes: 3"));
        assert!(text.contains("Healthy Nodes: 1"));
        assert!(text.contains("Unhealthy Nodes: 1"));
        assert!(text.contains("  - ip-10-0-1-7 (i-gone): Ready=False, DiskPressure"));
        assert!(text.contains("Alerting Nodes: 1"));
        assert!(text.contains("    Type: m5.large\n    Private IP: 10.0.1.5\n    State: running"));
        assert!(text.contains("    - network_in: 52428800 bytes"));
        assert!(text.contains("    - network_out: n/a"));
        assert!(text.contains("  - i-gone (ip-10-0-1-7): "));
        assert!(text.contains("    - cpu: 93.00%"));
        assert!(text.contains("    - cpu: n/a"));
        assert!(text.contains("    - disk: 12.50%"));
        assert!(text.contains("  - i-hot: High CPU utilization: 93.00% (threshold 80.00%)"));
        assert!(text.contains("Notification: 1 alert(s), no notification channel configured"));
        assert!(text.ends_with(RULE));
    }

    #[test]
    fn reports_discovery_failure() {
        let collected = CollectOutcome {
            discovery_error: Some("CloudWatch API rate limited".to_string()),
            ..Default::default()
        };
        let report = CycleReport::new(
            1,
            Utc::now(),
            "prod",
            collected,
            Vec::new(),
            NotifyOutcome::NoAlerts,
        );

        let text = report.to_string();
        assert!(text.contains("Node discovery failed: CloudWatch API rate limited"));
        assert!(text.contains("Total Nodes: 0"));
        assert!(text.contains("Notification: no alerts"));
        assert!(!text.contains("Node Metrics:"));
        assert!(!text.contains("Healthy Nodes"));
    }

    #[test]
    fn reports_health_check_failure() {
        let collected = CollectOutcome {
            samples: vec![sample("i-1", Some(10.0))],
            health_error: Some("Kubernetes API error: connection refused".to_string()),
            inventory_error: Some("ec2 API rate limited, retry after backoff".to_string()),
            ..Default::default()
        };
        let report = CycleReport::new(
            2,
            Utc::now(),
            "prod",
            collected,
            Vec::new(),
            NotifyOutcome::NoAlerts,
        );

        let text = report.to_string();
        assert!(text.contains("Node health check failed: Kubernetes API error: connection refused"));
        assert!(text.contains("Alerting Nodes: 0"));
        assert!(!text.contains("Unhealthy Node Details"));
        assert!(!text.contains("Type:"));
        assert!(text.contains("Instance details unavailable: ec2 API rate limited"));
    }
}
