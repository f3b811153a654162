use anyhow::{Context, Result};
use eksmon_agent::config::{MonitorConfig, DEFAULT_CONFIG_PATH};
use eksmon_agent::logging;
use eksmon_agent::monitor::MonitorLoop;
use eksmon_cloud::cloudwatch::CloudWatchProvider;
use eksmon_cloud::collector::NodeCollector;
use eksmon_cloud::ec2::Ec2Client;
use eksmon_cloud::kubernetes::KubeNodeHealth;
use eksmon_cloud::sigv4::Credentials;
use eksmon_notify::channels::sns::SnsChannel;
use eksmon_notify::NotificationChannel;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

const USAGE: &str = "\
Usage: eksmon [CONFIG_FILE]

Polls CloudWatch for the CPU, memory and disk utilization of every node in an
EKS cluster and publishes threshold breaches to SNS. Network traffic, EC2
instance details and Kubernetes node conditions are reported alongside.

CONFIG_FILE defaults to config/eksmon.toml; built-in defaults are used when
that file does not exist.

Environment:
  AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN  credentials
  AWS_REGION, AWS_DEFAULT_REGION                            region fallback
  KUBECONFIG                                                node health checks
  RUST_LOG                                                  extra log filters";

fn load_config(arg: Option<String>) -> Result<(MonitorConfig, String)> {
    match arg {
        Some(path) => {
            let config = MonitorConfig::load(&path)
                .with_context(|| format!("loading config from {path}"))?;
            Ok((config, path))
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            let config = MonitorConfig::load(DEFAULT_CONFIG_PATH)
                .with_context(|| format!("loading config from {DEFAULT_CONFIG_PATH}"))?;
            Ok((config, DEFAULT_CONFIG_PATH.to_string()))
        }
        None => {
            let config = MonitorConfig::from_toml("", |key| std::env::var(key).ok())
                .context("applying default config")?;
            Ok((config, "built-in defaults".to_string()))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let arg = std::env::args().nth(1);
    if matches!(arg.as_deref(), Some("-h" | "--help")) {
        println!("{USAGE}");
        return Ok(());
    }

    let (config, source) = load_config(arg)?;
    let _log_guard = logging::init(&config.log_level, &config.log_file)?;
    tracing::info!(
        config = %source,
        cluster = %config.cluster_name,
        region = config.region(),
        metric_source = %config.cloudwatch.source,
        "eksmon starting"
    );

    let credentials =
        Credentials::from_env().context("reading AWS credentials from the environment")?;

    let provider = CloudWatchProvider::new(
        config.region(),
        &config.cluster_name,
        config.cloudwatch.clone(),
        credentials.clone(),
    )
    .context("creating CloudWatch client")?;
    let mut collector = NodeCollector::new(Box::new(provider), config.cloudwatch.fetch_timeout_secs);

    if config.instance_details {
        let ec2 = Ec2Client::new(
            config.region(),
            credentials.clone(),
            config.ec2_endpoint_url.as_deref(),
            config.cloudwatch.max_retries,
            config.cloudwatch.fetch_timeout_secs,
        )
        .context("creating EC2 client")?;
        collector = collector.with_inventory(Box::new(ec2));
    }

    if config.node_health_checks {
        match kube::Client::try_default().await {
            Ok(client) => {
                collector = collector.with_health_source(Box::new(KubeNodeHealth::new(client)));
            }
            Err(e) => tracing::warn!(
                error = %e,
                "Failed to create Kubernetes client, node health checks disabled"
            ),
        }
    }

    let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();
    match &config.sns_topic_arn {
        Some(arn) => {
            let sns = SnsChannel::new(
                config.region(),
                arn,
                credentials,
                config.sns_endpoint_url.as_deref(),
            )
            .context("creating SNS client")?;
            tracing::info!(topic_arn = sns.topic_arn(), "SNS notifications enabled");
            channels.push(Box::new(sns));
        }
        None => tracing::info!("sns_topic_arn not set, alerts will only be logged"),
    }

    let monitor = MonitorLoop::new(Arc::new(config), collector, channels);
    let cycles = monitor
        .run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!(cycles, "Shutting down gracefully");
    Ok(())
}
