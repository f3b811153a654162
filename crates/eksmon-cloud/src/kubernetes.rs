use crate::error::Result;
use crate::NodeHealthSource;
use eksmon_common::types::NodeHealth;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};

/// Conditions that make a node unhealthy when their status is `True`.
const PRESSURE_CONDITIONS: [&str; 4] = [
    "DiskPressure",
    "MemoryPressure",
    "PIDPressure",
    "NetworkUnavailable",
];

/// Node conditions read from the cluster's Kubernetes API.
pub struct KubeNodeHealth {
    client: kube::Client,
}

impl KubeNodeHealth {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl NodeHealthSource for KubeNodeHealth {
    fn name(&self) -> &str {
        "kubernetes"
    }

    async fn node_health(&self) -> Result<Vec<NodeHealth>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        let health: Vec<NodeHealth> = list.items.iter().map(assess_node).collect();

        tracing::debug!(
            nodes = health.len(),
            unhealthy = health.iter().filter(|h| !h.is_healthy()).count(),
            "Checked node conditions"
        );
        Ok(health)
    }
}

/// Healthy unless `Ready` is reported and not `True`, or a pressure
/// condition is `True`. A node without conditions counts as healthy.
pub fn assess_node(node: &Node) -> NodeHealth {
    let mut problems = Vec::new();
    let conditions = node
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_deref())
        .unwrap_or_default();

    for condition in conditions {
        let kind = condition.type_.as_str();
        if kind == "Ready" && condition.status != "True" {
            problems.push(format!("Ready={}", condition.status));
        } else if PRESSURE_CONDITIONS.contains(&kind) && condition.status == "True" {
            problems.push(kind.to_string());
        }
    }

    NodeHealth {
        node_name: node.metadata.name.clone().unwrap_or_default(),
        instance_id: node
            .spec
            .as_ref()
            .and_then(|spec| spec.provider_id.as_deref())
            .and_then(instance_id_from_provider_id),
        problems,
    }
}

/// `aws:///us-west-2a/i-0abc` -> `i-0abc`
pub fn instance_id_from_provider_id(provider_id: &str) -> Option<String> {
    let rest = provider_id.strip_prefix("aws://")?;
    rest.rsplit('/')
        .next()
        .filter(|id| id.starts_with("i-"))
        .map(str::to_string)
}
