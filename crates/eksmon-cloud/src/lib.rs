//! CloudWatch access for EKS worker nodes.
//!
//! [`cloudwatch::CloudWatchProvider`] discovers the nodes of a cluster and
//! reads their latest CPU, memory and disk utilization. The
//! [`collector::NodeCollector`] drives a provider for one poll cycle and
//! isolates per-node failures. It can also attach EC2 instance details
//! ([`ec2::Ec2Client`]) and Kubernetes node conditions
//! ([`kubernetes::KubeNodeHealth`]).

pub mod cloudwatch;
pub mod collector;
pub mod ec2;
pub mod error;
pub mod kubernetes;
pub mod query;
pub mod retry;
pub mod sigv4;

use async_trait::async_trait;
use eksmon_common::types::{InstanceDetails, NodeHealth, NodeMetricSample, NodeTarget};
use serde::{Deserialize, Serialize};

/// Where node utilization metrics are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    /// `ContainerInsights` namespace, per-node metrics keyed by
    /// `ClusterName`/`InstanceId`/`NodeName`.
    #[default]
    ContainerInsights,
    /// `AWS/EC2` CPU plus the CloudWatch agent's `CWAgent` memory and disk metrics.
    CwAgent,
}

impl std::fmt::Display for MetricSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricSource::ContainerInsights => write!(f, "container_insights"),
            MetricSource::CwAgent => write!(f, "cw_agent"),
        }
    }
}

/// CloudWatch query settings (the `[cloudwatch]` table of the config file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudWatchConfig {
    #[serde(default)]
    pub source: MetricSource,
    /// Poll exactly these instances instead of discovering the cluster's nodes.
    #[serde(default)]
    pub instance_ids: Vec<String>,
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u64,
    #[serde(default = "default_period_secs")]
    pub period_secs: u32,
    #[serde(default = "default_statistic")]
    pub statistic: String,
    /// `fstype` dimension of `CWAgent` `disk_used_percent`.
    #[serde(default = "default_disk_fstype")]
    pub disk_fstype: String,
    /// `path` dimension of `CWAgent` `disk_used_percent`.
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Retries for throttled requests only, at most 10.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Overrides `https://monitoring.<region>.amazonaws.com/`.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for CloudWatchConfig {
    fn default() -> Self {
        Self {
            source: MetricSource::default(),
            instance_ids: Vec::new(),
            lookback_minutes: default_lookback_minutes(),
            period_secs: default_period_secs(),
            statistic: default_statistic(),
            disk_fstype: default_disk_fstype(),
            disk_path: default_disk_path(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_retries: default_max_retries(),
            endpoint_url: None,
        }
    }
}

const STATISTICS: [&str; 5] = ["Average", "Maximum", "Minimum", "Sum", "SampleCount"];

impl CloudWatchConfig {
    /// Checks the settings CloudWatch would reject or that cannot work together.
    pub fn validate(&self) -> Result<(), String> {
        if self.lookback_minutes == 0 {
            return Err("cloudwatch.lookback_minutes must be positive".to_string());
        }
        let period_ok = matches!(self.period_secs, 1 | 5 | 10 | 30)
            || (self.period_secs >= 60 && self.period_secs % 60 == 0);
        if !period_ok {
            return Err(format!(
                "cloudwatch.period_secs must be 1, 5, 10, 30 or a multiple of 60, got {}",
                self.period_secs
            ));
        }
        if !STATISTICS.contains(&self.statistic.as_str()) {
            return Err(format!(
                "cloudwatch.statistic must be one of {}, got {:?}",
                STATISTICS.join(", "),
                self.statistic
            ));
        }
        if self.max_retries > retry::MAX_RETRIES_LIMIT {
            return Err(format!(
                "cloudwatch.max_retries must be at most {}, got {}",
                retry::MAX_RETRIES_LIMIT,
                self.max_retries
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err("cloudwatch.fetch_timeout_secs must be positive".to_string());
        }
        if self.source == MetricSource::ContainerInsights && !self.instance_ids.is_empty() {
            return Err(
                "cloudwatch.instance_ids requires source = \"cw_agent\"; Container Insights nodes are discovered"
                    .to_string(),
            );
        }
        if let Some(id) = self.instance_ids.iter().find(|id| !id.starts_with("i-")) {
            return Err(format!("cloudwatch.instance_ids: {id:?} is not an EC2 instance id"));
        }
        Ok(())
    }
}

fn default_lookback_minutes() -> u64 {
    10
}

fn default_period_secs() -> u32 {
    60
}

fn default_statistic() -> String {
    "Average".to_string()
}

fn default_disk_fstype() -> String {
    "xfs".to_string()
}

fn default_disk_path() -> String {
    "/".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

/// Source of per-node utilization metrics.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Provider name used in logs (e.g. `"cloudwatch:us-west-2"`).
    fn name(&self) -> &str;

    /// The nodes to poll this cycle.
    async fn list_nodes(&self) -> error::Result<Vec<NodeTarget>>;

    /// Latest CPU, memory, disk and network readings for one node.
    async fn get_sample(&self, node: &NodeTarget) -> error::Result<NodeMetricSample>;
}

/// Source of EC2 instance attributes (type, private IP, state).
#[async_trait]
pub trait NodeInventory: Send + Sync {
    fn name(&self) -> &str;

    /// Details for the given instances. Unknown ids are left out.
    async fn describe_instances(&self, instance_ids: &[String])
        -> error::Result<Vec<InstanceDetails>>;
}

/// Source of node readiness and pressure conditions.
#[async_trait]
pub trait NodeHealthSource: Send + Sync {
    fn name(&self) -> &str;

    async fn node_health(&self) -> error::Result<Vec<NodeHealth>>;
}
