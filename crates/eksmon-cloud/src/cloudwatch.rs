use crate::error::{is_throttling_code, CloudProviderError, Result};
use crate::retry::retry_throttled;
use crate::sigv4::{service_endpoint, Credentials, RequestParts, SigV4Signer};
use crate::{CloudWatchConfig, MetricSource, MetricsProvider};
use chrono::{DateTime, Duration, Utc};
use eksmon_common::types::{MetricKind, NodeMetricSample, NodeTarget};
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const SERVICE: &str = "monitoring";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const TARGET_PREFIX: &str = "GraniteServiceVersion20100801";

const CONTAINER_INSIGHTS_NS: &str = "ContainerInsights";
const DISCOVERY_METRIC: &str = "node_cpu_utilization";
const RECENTLY_ACTIVE: &str = "PT3H";

/// Query ids and `AWS/EC2` metric names of the report-only traffic series.
const NETWORK_IN: (&str, &str) = ("network_in", "NetworkIn");
const NETWORK_OUT: (&str, &str) = ("network_out", "NetworkOut");

/// One CloudWatch metric: namespace, name and the full dimension set.
#[derive(Debug, Clone, PartialEq)]
struct MetricDefinition {
    namespace: &'static str,
    metric_name: &'static str,
    dimensions: Vec<(&'static str, String)>,
}

pub struct CloudWatchProvider {
    name: String,
    cluster_name: String,
    config: CloudWatchConfig,
    signer: SigV4Signer,
    host: String,
    url: Url,
    client: Client,
}

impl CloudWatchProvider {
    pub fn new(
        region: &str,
        cluster_name: &str,
        config: CloudWatchConfig,
        credentials: Credentials,
    ) -> Result<Self> {
        let (url, host) = service_endpoint(SERVICE, region, config.endpoint_url.as_deref())?;

        let client = Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(config.fetch_timeout_secs))
            .build()?;

        Ok(Self {
            name: format!("cloudwatch:{region}"),
            cluster_name: cluster_name.to_string(),
            config,
            signer: SigV4Signer::new(credentials, region, SERVICE),
            host,
            url,
            client,
        })
    }

    /// Call a CloudWatch operation over the AWS JSON 1.0 protocol.
    async fn call_api(&self, operation: &str, body: &Value) -> Result<Value> {
        let payload = body.to_string();
        let target = format!("{TARGET_PREFIX}.{operation}");
        let headers = [("content-type", CONTENT_TYPE), ("x-amz-target", target.as_str())];
        let signature = self.signer.sign(
            &RequestParts {
                method: "POST",
                host: &self.host,
                path: self.url.path(),
                query: "",
                headers: &headers,
                payload: payload.as_bytes(),
            },
            Utc::now(),
        )?;

        let mut request = self
            .client
            .post(self.url.clone())
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", &target)
            .header("X-Amz-Date", &signature.amz_date)
            .header("Authorization", &signature.authorization);
        if let Some(token) = &signature.security_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request.body(payload).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(parse_error_response(status.as_u16(), &body));
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Call a CloudWatch operation, backing off on throttling errors.
    async fn call_api_with_retry(&self, operation: &str, body: &Value) -> Result<Value> {
        retry_throttled(SERVICE, operation, self.config.max_retries, || {
            self.call_api(operation, body)
        })
        .await
    }

    /// Discover cluster nodes from the Container Insights per-node metrics.
    async fn discover_nodes(&self) -> Result<Vec<NodeTarget>> {
        let mut nodes: BTreeMap<String, NodeTarget> = BTreeMap::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut body = json!({
                "Namespace": CONTAINER_INSIGHTS_NS,
                "MetricName": DISCOVERY_METRIC,
                "Dimensions": [{ "Name": "ClusterName", "Value": self.cluster_name }],
                "RecentlyActive": RECENTLY_ACTIVE,
            });
            if let Some(token) = &next_token {
                body["NextToken"] = json!(token);
            }

            let response = self.call_api_with_retry("ListMetrics", &body).await?;
            for node in parse_list_metrics(&response)? {
                nodes.entry(node.instance_id.clone()).or_insert(node);
            }

            next_token = response
                .get("NextToken")
                .and_then(|v| v.as_str())
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(nodes.into_values().collect())
    }

    fn metric_definition(&self, kind: MetricKind, node: &NodeTarget) -> Result<MetricDefinition> {
        let instance = ("InstanceId", node.instance_id.clone());

        let definition = match self.config.source {
            MetricSource::ContainerInsights => {
                let node_name = node.node_name.clone().ok_or_else(|| {
                    CloudProviderError::InvalidTarget(format!(
                        "node {} has no NodeName for Container Insights",
                        node.instance_id
                    ))
                })?;
                let metric_name = match kind {
                    MetricKind::Cpu => "node_cpu_utilization",
                    MetricKind::Memory => "node_memory_utilization",
                    MetricKind::Disk => "node_filesystem_utilization",
                };
                MetricDefinition {
                    namespace: CONTAINER_INSIGHTS_NS,
                    metric_name,
                    dimensions: vec![
                        ("ClusterName", self.cluster_name.clone()),
                        instance,
                        ("NodeName", node_name),
                    ],
                }
            }
            MetricSource::CwAgent => match kind {
                MetricKind::Cpu => MetricDefinition {
                    namespace: "AWS/EC2",
                    metric_name: "CPUUtilization",
                    dimensions: vec![instance],
                },
                // Requires the CloudWatch agent on the node
                MetricKind::Memory => MetricDefinition {
                    namespace: "CWAgent",
                    metric_name: "mem_used_percent",
                    dimensions: vec![instance],
                },
                MetricKind::Disk => MetricDefinition {
                    namespace: "CWAgent",
                    metric_name: "disk_used_percent",
                    dimensions: vec![
                        instance,
                        ("fstype", self.config.disk_fstype.clone()),
                        ("path", self.config.disk_path.clone()),
                    ],
                },
            },
        };

        Ok(definition)
    }

    fn get_metric_data_body(
        &self,
        node: &NodeTarget,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value> {
        let mut queries = Vec::with_capacity(MetricKind::ALL.len() + 2);
        for kind in MetricKind::ALL {
            let def = self.metric_definition(kind, node)?;
            queries.push(self.metric_query(&kind.to_string(), &def, &self.config.statistic));
        }
        for (id, metric_name) in [NETWORK_IN, NETWORK_OUT] {
            let def = MetricDefinition {
                namespace: "AWS/EC2",
                metric_name,
                dimensions: vec![("InstanceId", node.instance_id.clone())],
            };
            queries.push(self.metric_query(id, &def, "Sum"));
        }

        Ok(json!({
            "MetricDataQueries": queries,
            "StartTime": start.timestamp(),
            "EndTime": end.timestamp(),
            "ScanBy": "TimestampDescending",
        }))
    }

    fn metric_query(&self, id: &str, def: &MetricDefinition, stat: &str) -> Value {
        let dimensions: Vec<Value> = def
            .dimensions
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect();
        json!({
            "Id": id,
            "MetricStat": {
                "Metric": {
                    "Namespace": def.namespace,
                    "MetricName": def.metric_name,
                    "Dimensions": dimensions,
                },
                "Period": self.config.period_secs,
                "Stat": stat,
            },
            "ReturnData": true,
        })
    }
}

#[async_trait::async_trait]
impl MetricsProvider for CloudWatchProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_nodes(&self) -> Result<Vec<NodeTarget>> {
        if !self.config.instance_ids.is_empty() {
            return Ok(self
                .config
                .instance_ids
                .iter()
                .map(NodeTarget::new)
                .collect());
        }

        let nodes = self.discover_nodes().await?;
        tracing::info!(
            cluster = %self.cluster_name,
            count = nodes.len(),
            "Discovered cluster nodes from Container Insights"
        );
        Ok(nodes)
    }

    async fn get_sample(&self, node: &NodeTarget) -> Result<NodeMetricSample> {
        let end = Utc::now();
        let start = end - Duration::minutes(self.config.lookback_minutes as i64);

        let body = self.get_metric_data_body(node, start, end)?;
        let response = self.call_api_with_retry("GetMetricData", &body).await?;
        let sample = parse_metric_data(&node.instance_id, &response, end)?;

        tracing::debug!(
            node = %node,
            cpu = ?sample.cpu_percent,
            memory = ?sample.memory_percent,
            disk = ?sample.disk_percent,
            network_in = ?sample.network_in_bytes,
            network_out = ?sample.network_out_bytes,
            "Collected node metrics"
        );
        Ok(sample)
    }
}

/// Map a non-2xx JSON-protocol response to an error.
///
/// Error bodies look like `{"__type":"com.amazonaws...#Throttling","message":"..."}`.
fn parse_error_response(status: u16, body: &str) -> CloudProviderError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("__type").or_else(|| v.get("code")))
        .and_then(|v| v.as_str())
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string());

    match code {
        Some(code) if is_throttling_code(&code) => CloudProviderError::RateLimited {
            service: SERVICE.to_string(),
        },
        Some(code) => {
            let message = parsed
                .as_ref()
                .and_then(|v| v.get("message").or_else(|| v.get("Message")))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown")
                .to_string();
            CloudProviderError::ApiResponseError {
                service: SERVICE.to_string(),
                code,
                message,
            }
        }
        None if status == 429 => CloudProviderError::RateLimited {
            service: SERVICE.to_string(),
        },
        None => CloudProviderError::HttpError {
            service: SERVICE.to_string(),
            status,
            body: body.to_string(),
        },
    }
}

/// Extract per-node targets from a `ListMetrics` response.
///
/// Cluster-level series (no `InstanceId`/`NodeName` dimension) are ignored.
fn parse_list_metrics(response: &Value) -> Result<Vec<NodeTarget>> {
    let Some(metrics) = response.get("Metrics") else {
        return Ok(Vec::new());
    };
    let metrics = metrics.as_array().ok_or_else(|| {
        CloudProviderError::MalformedResponse("ListMetrics: Metrics is not an array".to_string())
    })?;

    let mut nodes = Vec::new();
    for metric in metrics {
        let mut instance_id = None;
        let mut node_name = None;
        if let Some(dims) = metric.get("Dimensions").and_then(|v| v.as_array()) {
            for dim in dims {
                let name = dim.get("Name").and_then(|v| v.as_str());
                let value = dim.get("Value").and_then(|v| v.as_str());
                match (name, value) {
                    (Some("InstanceId"), Some(v)) => instance_id = Some(v),
                    (Some("NodeName"), Some(v)) => node_name = Some(v),
                    _ => {}
                }
            }
        }

        if let (Some(id), Some(name)) = (instance_id, node_name) {
            nodes.push(NodeTarget::new(id).with_node_name(name));
        }
    }

    Ok(nodes)
}

/// Build a sample from a `GetMetricData` response, keeping the newest
/// datapoint of each query.
fn parse_metric_data(
    node_id: &str,
    response: &Value,
    fallback_timestamp: DateTime<Utc>,
) -> Result<NodeMetricSample> {
    let malformed = |msg: String| CloudProviderError::MalformedResponse(format!("{node_id}: {msg}"));

    let results = response
        .get("MetricDataResults")
        .and_then(|v| v.as_array())
        .ok_or_else(|| malformed("GetMetricData response missing MetricDataResults".to_string()))?;

    let mut sample = NodeMetricSample {
        node_id: node_id.to_string(),
        timestamp: fallback_timestamp,
        cpu_percent: None,
        memory_percent: None,
        disk_percent: None,
        network_in_bytes: None,
        network_out_bytes: None,
    };
    let mut newest: Option<DateTime<Utc>> = None;

    for result in results {
        let id = result
            .get("Id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| malformed("result without Id".to_string()))?;
        let kind = match id {
            id if id == NETWORK_IN.0 || id == NETWORK_OUT.0 => None,
            id => Some(id.parse::<MetricKind>().map_err(malformed)?),
        };

        let values = result.get("Values").and_then(|v| v.as_array());
        let timestamps = result.get("Timestamps").and_then(|v| v.as_array());
        let (values, timestamps) = match (values, timestamps) {
            (Some(v), Some(t)) => (v, t),
            (None, None) => continue,
            _ => return Err(malformed(format!("{id}: Values/Timestamps mismatch"))),
        };
        if values.len() != timestamps.len() {
            return Err(malformed(format!(
                "{id}: {} values for {} timestamps",
                values.len(),
                timestamps.len()
            )));
        }

        let mut latest: Option<(DateTime<Utc>, f64)> = None;
        for (ts, value) in timestamps.iter().zip(values) {
            let ts = ts
                .as_f64()
                .and_then(epoch_to_datetime)
                .ok_or_else(|| malformed(format!("{id}: bad timestamp {ts}")))?;
            let value = value
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| malformed(format!("{id}: bad value {value}")))?;
            if latest.map_or(true, |(prev, _)| ts > prev) {
                latest = Some((ts, value));
            }
        }

        let Some((ts, value)) = latest else {
            tracing::debug!(node_id, metric = id, "No datapoints in lookback window");
            continue;
        };
        match kind {
            Some(MetricKind::Cpu) => sample.cpu_percent = Some(value),
            Some(MetricKind::Memory) => sample.memory_percent = Some(value),
            Some(MetricKind::Disk) => sample.disk_percent = Some(value),
            None if id == NETWORK_IN.0 => sample.network_in_bytes = Some(value),
            None => sample.network_out_bytes = Some(value),
        }
        // Traffic alone never dates the sample
        if kind.is_some() {
            newest = Some(newest.map_or(ts, |n| n.max(ts)));
        }
    }

    if sample.is_empty() {
        return Err(CloudProviderError::NoData(node_id.to_string()));
    }
    if let Some(ts) = newest {
        sample.timestamp = ts;
    }
    Ok(sample)
}

fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
    DateTime::from_timestamp(whole, nanos.min(999_999_999))
}
