use crate::error::CloudProviderError;
use crate::{MetricsProvider, NodeHealthSource, NodeInventory};
use eksmon_common::types::{InstanceDetails, NodeHealth, NodeMetricSample, NodeTarget};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// A node that could not be sampled this cycle.
#[derive(Debug)]
pub struct UnavailableNode {
    pub node: NodeTarget,
    pub error: CloudProviderError,
}

/// Everything one collection pass produced.
#[derive(Debug, Default)]
pub struct CollectOutcome {
    pub nodes: Vec<NodeTarget>,
    pub samples: Vec<NodeMetricSample>,
    pub unavailable: Vec<UnavailableNode>,
    /// Set when the node list itself could not be obtained.
    pub discovery_error: Option<String>,
    /// Kubernetes node conditions; `None` when no health source is set or
    /// the check failed.
    pub health: Option<Vec<NodeHealth>>,
    pub health_error: Option<String>,
    pub instances: Vec<InstanceDetails>,
    pub inventory_error: Option<String>,
}

/// Fetches one sample per node, one node at a time, plus the optional
/// instance details and Kubernetes node conditions.
pub struct NodeCollector {
    provider: Box<dyn MetricsProvider>,
    inventory: Option<Box<dyn NodeInventory>>,
    health_source: Option<Box<dyn NodeHealthSource>>,
    timeout_secs: u64,
}

impl NodeCollector {
    pub fn new(provider: Box<dyn MetricsProvider>, timeout_secs: u64) -> Self {
        Self {
            provider,
            inventory: None,
            health_source: None,
            timeout_secs,
        }
    }

    pub fn with_inventory(mut self, inventory: Box<dyn NodeInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn with_health_source(mut self, health_source: Box<dyn NodeHealthSource>) -> Self {
        self.health_source = Some(health_source);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, CloudProviderError>
    where
        F: Future<Output = Result<T, CloudProviderError>>,
    {
        timeout(Duration::from_secs(self.timeout_secs), call)
            .await
            .unwrap_or(Err(CloudProviderError::Timeout(self.timeout_secs)))
    }

    async fn check_health(&self, outcome: &mut CollectOutcome) {
        let Some(source) = &self.health_source else {
            return;
        };
        match self.bounded(source.node_health()).await {
            Ok(health) => {
                for node in health.iter().filter(|h| !h.is_healthy()) {
                    tracing::warn!(
                        node = %node.node_name,
                        problems = ?node.problems,
                        "Node is not healthy"
                    );
                }
                outcome.health = Some(health);
            }
            Err(e) => {
                tracing::error!(source = source.name(), error = %e, "Failed to check node health");
                outcome.health_error = Some(e.to_string());
            }
        }
    }

    async fn describe(&self, nodes: &[NodeTarget], outcome: &mut CollectOutcome) {
        let Some(inventory) = &self.inventory else {
            return;
        };
        let ids: Vec<String> = nodes.iter().map(|n| n.instance_id.clone()).collect();
        match self.bounded(inventory.describe_instances(&ids)).await {
            Ok(instances) => outcome.instances = instances,
            Err(e) => {
                tracing::warn!(
                    inventory = inventory.name(),
                    error = %e,
                    "Failed to describe instances"
                );
                outcome.inventory_error = Some(e.to_string());
            }
        }
    }

    /// Collect metrics for every node. Never fails: unreachable or malformed
    /// nodes are logged and listed in [`CollectOutcome::unavailable`].
    pub async fn collect(&self) -> CollectOutcome {
        let mut outcome = CollectOutcome::default();
        self.check_health(&mut outcome).await;

        let nodes = match self.provider.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::error!(
                    provider = self.provider.name(),
                    error = %e,
                    "Failed to list nodes"
                );
                outcome.discovery_error = Some(e.to_string());
                return outcome;
            }
        };

        if nodes.is_empty() {
            tracing::warn!(provider = self.provider.name(), "No nodes found to monitor");
            return outcome;
        }

        self.describe(&nodes, &mut outcome).await;

        let timeout_duration = Duration::from_secs(self.timeout_secs);
        for node in &nodes {
            match timeout(timeout_duration, self.provider.get_sample(node)).await {
                Ok(Ok(sample)) => outcome.samples.push(sample),
                Ok(Err(e)) => {
                    tracing::warn!(node = %node, error = %e, "Skipping node this cycle");
                    outcome.unavailable.push(UnavailableNode {
                        node: node.clone(),
                        error: e,
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        node = %node,
                        timeout = ?timeout_duration,
                        "Timed out collecting node metrics, skipping node this cycle"
                    );
                    outcome.unavailable.push(UnavailableNode {
                        node: node.clone(),
                        error: CloudProviderError::Timeout(self.timeout_secs),
                    });
                }
            }
        }

        tracing::info!(
            polled = nodes.len(),
            sampled = outcome.samples.len(),
            skipped = outcome.unavailable.len(),
            "Collected node metrics"
        );
        outcome.nodes = nodes;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use chrono::Utc;

    struct MockProvider {
        nodes: Vec<NodeTarget>,
        fail_listing: bool,
    }

    #[async_trait]
    impl MetricsProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn list_nodes(&self) -> Result<Vec<NodeTarget>> {
            if self.fail_listing {
                return Err(CloudProviderError::RateLimited {
                    service: "monitoring".to_string(),
                });
            }
            Ok(self.nodes.clone())
        }

        async fn get_sample(&self, node: &NodeTarget) -> Result<NodeMetricSample> {
            match node.instance_id.as_str() {
                "i-broken" => Err(CloudProviderError::MalformedResponse("truncated".to_string())),
                "i-slow" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!("collector times out first")
                }
                id => Ok(NodeMetricSample {
                    node_id: id.to_string(),
                    timestamp: Utc::now(),
                    cpu_percent: Some(50.0),
                    memory_percent: Some(60.0),
                    disk_percent: Some(70.0),
                    network_in_bytes: None,
                    network_out_bytes: None,
                }),
            }
        }
    }

    struct MockInventory;

    #[async_trait]
    impl NodeInventory for MockInventory {
        fn name(&self) -> &str {
            "mock-ec2"
        }

        async fn describe_instances(&self, ids: &[String]) -> Result<Vec<InstanceDetails>> {
            Ok(ids
                .iter()
                .filter(|id| id.as_str() != "i-broken")
                .map(|id| InstanceDetails {
                    instance_id: id.clone(),
                    instance_type: "m5.large".to_string(),
                    private_ip: Some("10.0.1.5".to_string()),
                    state: "running".to_string(),
                })
                .collect())
        }
    }

    struct MockHealth {
        fail: bool,
    }

    #[async_trait]
    impl NodeHealthSource for MockHealth {
        fn name(&self) -> &str {
            "mock-kube"
        }

        async fn node_health(&self) -> Result<Vec<NodeHealth>> {
            if self.fail {
                return Err(CloudProviderError::MalformedResponse("no kubeconfig".to_string()));
            }
            Ok(vec![
                NodeHealth {
                    node_name: "ip-10-0-1-5".to_string(),
                    instance_id: Some("i-1".to_string()),
                    problems: Vec::new(),
                },
                NodeHealth {
                    node_name: "ip-10-0-1-6".to_string(),
                    instance_id: Some("i-2".to_string()),
                    problems: vec!["MemoryPressure".to_string()],
                },
            ])
        }
    }

    fn collector(ids: &[&str], fail_listing: bool) -> NodeCollector {
        let provider = MockProvider {
            nodes: ids.iter().map(|id| NodeTarget::new(*id)).collect(),
            fail_listing,
        };
        NodeCollector::new(Box::new(provider), 30)
    }

    #[tokio::test]
    async fn test_node_collector() {
        let outcome = collector(&["i-1", "i-2"], false).collect().await;

        assert_eq!(outcome.nodes.len(), 2);
        assert_eq!(outcome.samples.len(), 2);
        assert_eq!(outcome.samples[0].node_id, "i-1");
        assert_eq!(outcome.samples[0].cpu_percent, Some(50.0));
        assert!(outcome.unavailable.is_empty());
    }

    #[tokio::test]
    async fn failing_node_is_skipped_without_affecting_others() {
        let outcome = collector(&["i-1", "i-broken", "i-3"], false).collect().await;

        let sampled: Vec<&str> = outcome.samples.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(sampled, vec!["i-1", "i-3"]);
        assert_eq!(outcome.unavailable.len(), 1);
        assert_eq!(outcome.unavailable[0].node.instance_id, "i-broken");
        assert!(matches!(
            outcome.unavailable[0].error,
            CloudProviderError::MalformedResponse(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_node_times_out() {
        let outcome = collector(&["i-slow", "i-2"], false).collect().await;

        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(outcome.samples[0].node_id, "i-2");
        assert!(matches!(
            outcome.unavailable[0].error,
            CloudProviderError::Timeout(30)
        ));
    }

    #[tokio::test]
    async fn discovery_failure_yields_empty_outcome() {
        let outcome = collector(&["i-1"], true).collect().await;

        assert!(outcome.samples.is_empty());
        assert!(outcome.nodes.is_empty());
        assert!(outcome.discovery_error.unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn attaches_instance_details_and_node_health() {
        let outcome = collector(&["i-1", "i-broken"], false)
            .with_inventory(Box::new(MockInventory))
            .with_health_source(Box::new(MockHealth { fail: false }))
            .collect()
            .await;

        assert_eq!(outcome.instances.len(), 1);
        assert_eq!(outcome.instances[0].instance_type, "m5.large");
        let health = outcome.health.unwrap();
        assert_eq!(health.iter().filter(|h| !h.is_healthy()).count(), 1);
        assert!(outcome.health_error.is_none());
        assert_eq!(outcome.samples.len(), 1);
    }

    #[tokio::test]
    async fn health_failure_does_not_stop_sampling() {
        let outcome = collector(&["i-1", "i-2"], false)
            .with_health_source(Box::new(MockHealth { fail: true }))
            .collect()
            .await;

        assert!(outcome.health.is_none());
        assert!(outcome.health_error.unwrap().contains("no kubeconfig"));
        assert_eq!(outcome.samples.len(), 2);
        assert!(outcome.instances.is_empty());
    }

    #[tokio::test]
    async fn health_is_checked_even_when_discovery_fails() {
        let outcome = collector(&["i-1"], true)
            .with_health_source(Box::new(MockHealth { fail: false }))
            .collect()
            .await;

        assert!(outcome.discovery_error.is_some());
        assert_eq!(outcome.health.unwrap().len(), 2);
    }
}
