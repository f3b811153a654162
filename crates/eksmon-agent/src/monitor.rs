use crate::config::MonitorConfig;
use crate::report::CycleReport;
use chrono::Utc;
use eksmon_alert::ThresholdEvaluator;
use eksmon_cloud::collector::NodeCollector;
use eksmon_notify::manager::NotificationManager;
use eksmon_notify::NotificationChannel;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Polling,
    Sleeping,
}

/// Fetch, evaluate, notify and report once per interval.
pub struct MonitorLoop {
    config: Arc<MonitorConfig>,
    collector: NodeCollector,
    evaluator: ThresholdEvaluator,
    notifier: NotificationManager,
}

impl MonitorLoop {
    pub fn new(
        config: Arc<MonitorConfig>,
        collector: NodeCollector,
        channels: Vec<Box<dyn NotificationChannel>>,
    ) -> Self {
        Self {
            collector,
            evaluator: ThresholdEvaluator::new(&config.thresholds),
            notifier: NotificationManager::new(&config.cluster_name, channels),
            config,
        }
    }

    /// One full pass. Node and notification failures end up in the report.
    pub async fn run_cycle(&self, cycle: u64) -> CycleReport {
        let started = Utc::now();
        tracing::debug!(cycle, provider = self.collector.provider_name(), "Starting poll cycle");

        let collected = self.collector.collect().await;
        let alerts = self.evaluator.evaluate_all(&collected.samples);
        for alert in &alerts {
            tracing::warn!(
                node = %alert.node_id,
                metric = %alert.kind,
                value = alert.value,
                threshold = alert.threshold,
                "ALERT for instance {}: {}",
                alert.node_id,
                alert.summary()
            );
        }

        let notification = self.notifier.notify_cycle(&alerts, started).await;
        CycleReport::new(
            cycle,
            started,
            &self.config.cluster_name,
            collected,
            alerts,
            notification,
        )
    }

    /// Runs cycles until `shutdown` resolves and returns how many completed.
    /// The first cycle starts immediately; a cycle in flight is abandoned on
    /// shutdown.
    pub async fn run_until<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval = Duration::from_secs(self.config.interval_secs);
        let mut state = LoopState::Polling;
        let mut completed = 0u64;

        tracing::info!(
            cluster = %self.config.cluster_name,
            interval_secs = self.config.interval_secs,
            channels = self.notifier.channel_count(),
            "Starting monitoring loop"
        );
        for rule in self.evaluator.rules() {
            tracing::info!(metric = %rule.kind, threshold = rule.value, "Alert rule active");
        }

        loop {
            state = match state {
                LoopState::Polling => {
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break,
                        report = self.run_cycle(completed + 1) => {
                            completed += 1;
                            println!("{report}");
                            if report.notification.is_failure() {
                                tracing::warn!(
                                    cycle = report.cycle,
                                    alerts = report.alerts.len(),
                                    notification = %report.notification,
                                    "Poll cycle complete, alert delivery failed"
                                );
                            } else {
                                tracing::info!(
                                    cycle = report.cycle,
                                    nodes = report.nodes_polled,
                                    skipped = report.skipped.len(),
                                    alerts = report.alerts.len(),
                                    notification = %report.notification,
                                    "Poll cycle complete"
                                );
                            }
                            LoopState::Sleeping
                        }
                    }
                }
                LoopState::Sleeping => {
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break,
                        _ = sleep(interval) => LoopState::Polling,
                    }
                }
            };
        }

        completed
    }
}
