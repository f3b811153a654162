use eksmon_alert::Thresholds;
use eksmon_cloud::CloudWatchConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/eksmon.toml";
pub const DEFAULT_REGION: &str = "us-west-2";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for one monitoring process. Loaded once at startup and never
/// modified afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Falls back to `AWS_REGION`, then `AWS_DEFAULT_REGION`, then `us-west-2`.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Alerts are only logged when unset.
    #[serde(default)]
    pub sns_topic_arn: Option<String>,
    /// Overrides `https://sns.<region>.amazonaws.com/`.
    #[serde(default)]
    pub sns_endpoint_url: Option<String>,
    #[serde(default)]
    pub cloudwatch: CloudWatchConfig,
    /// List unhealthy nodes from the Kubernetes API (kubeconfig or
    /// in-cluster service account).
    #[serde(default = "default_true")]
    pub node_health_checks: bool,
    /// Print instance type, private IP and state from EC2.
    #[serde(default = "default_true")]
    pub instance_details: bool,
    /// Overrides `https://ec2.<region>.amazonaws.com/`.
    #[serde(default)]
    pub ec2_endpoint_url: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

fn default_cluster_name() -> String {
    "my-eks-cluster".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("eks_monitoring.log")
}

impl MonitorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content, |key| std::env::var(key).ok())
    }

    /// Parse, apply environment fallbacks and validate. An empty document
    /// yields the defaults.
    pub fn from_toml<F>(content: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Self = toml::from_str(content)?;

        let region = non_empty(config.region.take())
            .or_else(|| non_empty(env("AWS_REGION")))
            .or_else(|| non_empty(env("AWS_DEFAULT_REGION")))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        config.region = Some(region);
        config.sns_topic_arn = non_empty(config.sns_topic_arn.take());
        config.sns_endpoint_url = non_empty(config.sns_endpoint_url.take());
        config.ec2_endpoint_url = non_empty(config.ec2_endpoint_url.take());

        config.validate()?;
        Ok(config)
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_name.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster_name must not be empty".into()));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be positive".into()));
        }
        self.thresholds.validate().map_err(ConfigError::Invalid)?;
        self.cloudwatch.validate().map_err(ConfigError::Invalid)?;
        if let Some(arn) = &self.sns_topic_arn {
            eksmon_notify::channels::sns::validate_topic_arn(arn)
                .map_err(|e| ConfigError::Invalid(format!("sns_topic_arn: {e}")))?;
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "log_level must be one of TRACE, DEBUG, INFO, WARN, ERROR, got {:?}",
                self.log_level
            )));
        }
        if self.log_file.file_name().is_none() {
            return Err(ConfigError::Invalid(format!(
                "log_file {} is not a file path",
                self.log_file.display()
            )));
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eksmon_cloud::MetricSource;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = MonitorConfig::from_toml("", no_env).unwrap();
        assert_eq!(config.region(), "us-west-2");
        assert_eq!(config.cluster_name, "my-eks-cluster");
        assert_eq!(config.interval_secs, 60);
        assert_eq!(config.thresholds, Thresholds::default());
        assert!(config.sns_topic_arn.is_none());
        assert_eq!(config.cloudwatch.source, MetricSource::ContainerInsights);
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.log_file, PathBuf::from("eks_monitoring.log"));
        assert!(config.node_health_checks);
        assert!(config.instance_details);
        assert!(config.ec2_endpoint_url.is_none());
    }

    #[test]
    fn extra_checks_can_be_disabled() {
        let config = MonitorConfig::from_toml(
            "node_health_checks = false\ninstance_details = false\nec2_endpoint_url = \"\"",
            no_env,
        )
        .unwrap();
        assert!(!config.node_health_checks);
        assert!(!config.instance_details);
        assert!(config.ec2_endpoint_url.is_none());
    }

    #[test]
    fn retry_count_is_bounded() {
        let err = MonitorConfig::from_toml("[cloudwatch]\nmax_retries = 64", no_env).unwrap_err();
        assert!(err.to_string().contains("max_retries"), "{err}");
        assert!(MonitorConfig::from_toml("[cloudwatch]\nmax_retries = 10", no_env).is_ok());
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
cluster_name = "prod"
interval_secs = 120
sns_topic_arn = "arn:aws:sns:eu-west-1:123456789012:eks-alerts"

[thresholds]
cpu = 90.0

[cloudwatch]
source = "cw_agent"
instance_ids = ["i-0abc", "i-0def"]
"#
        )
        .unwrap();

        let config = MonitorConfig::load(file.path()).unwrap();
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.interval_secs, 120);
        assert_eq!(config.thresholds.cpu, 90.0);
        assert_eq!(config.thresholds.memory, 80.0);
        assert_eq!(config.thresholds.disk, 85.0);
        assert_eq!(config.cloudwatch.source, MetricSource::CwAgent);
        assert_eq!(config.cloudwatch.instance_ids.len(), 2);
        assert_eq!(
            config.sns_topic_arn.as_deref(),
            Some("arn:aws:sns:eu-west-1:123456789012:eks-alerts")
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MonitorConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = MonitorConfig::from_toml("interval_secs = \"soon\"", no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn region_falls_back_to_environment() {
        let env = |key: &str| match key {
            "AWS_REGION" => Some(String::new()),
            "AWS_DEFAULT_REGION" => Some("ap-southeast-2".to_string()),
            _ => None,
        };
        let config = MonitorConfig::from_toml("", env).unwrap();
        assert_eq!(config.region(), "ap-southeast-2");

        let config = MonitorConfig::from_toml("region = \"eu-central-1\"", env).unwrap();
        assert_eq!(config.region(), "eu-central-1");
    }

    #[test]
    fn empty_topic_arn_disables_notifications() {
        let config = MonitorConfig::from_toml("sns_topic_arn = \"\"", no_env).unwrap();
        assert!(config.sns_topic_arn.is_none());
    }

    #[test]
    fn rejects_invalid_settings() {
        for doc in [
            "interval_secs = 0",
            "cluster_name = \" \"",
            "[thresholds]\ncpu = 101.0",
            "sns_topic_arn = \"my-topic\"",
            "log_level = \"LOUD\"",
            "[cloudwatch]\nperiod_secs = 45",
            "[cloudwatch]\ninstance_ids = [\"i-0abc\"]",
            "[cloudwatch]\nmax_retries = 11",
        ] {
            let err = MonitorConfig::from_toml(doc, no_env).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{doc}: {err}");
        }
    }
}
