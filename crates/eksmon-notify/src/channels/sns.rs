use crate::error::{NotifyError, Result};
use crate::{AlertBatch, NotificationChannel};
use async_trait::async_trait;
use chrono::Utc;
use eksmon_cloud::query::{form_encode, xml_tag};
use eksmon_cloud::sigv4::{service_endpoint, Credentials, RequestParts, SigV4Signer};
use reqwest::{Client, Url};
use std::collections::BTreeMap;
use std::time::Duration;

const SERVICE: &str = "sns";
const API_VERSION: &str = "2010-03-31";
const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const MAX_ATTEMPTS: u32 = 3;

/// Publishes alert batches to an SNS topic.
pub struct SnsChannel {
    topic_arn: String,
    signer: SigV4Signer,
    host: String,
    url: Url,
    client: Client,
}

impl SnsChannel {
    pub fn new(
        region: &str,
        topic_arn: &str,
        credentials: Credentials,
        endpoint_url: Option<&str>,
    ) -> Result<Self> {
        validate_topic_arn(topic_arn)?;
        let (url, host) = service_endpoint(SERVICE, region, endpoint_url)?;
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            topic_arn: topic_arn.to_string(),
            signer: SigV4Signer::new(credentials, region, SERVICE),
            host,
            url,
            client,
        })
    }

    pub fn topic_arn(&self) -> &str {
        &self.topic_arn
    }

    fn publish_body(&self, batch: &AlertBatch<'_>) -> String {
        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), "Publish".to_string());
        params.insert("Version".to_string(), API_VERSION.to_string());
        params.insert("TopicArn".to_string(), self.topic_arn.clone());
        params.insert("Subject".to_string(), batch.subject());
        params.insert("Message".to_string(), batch.render_message());
        form_encode(&params)
    }

    async fn publish(&self, body: &str) -> Result<()> {
        let headers = [("content-type", CONTENT_TYPE)];
        let signature = self.signer.sign(
            &RequestParts {
                method: "POST",
                host: &self.host,
                path: self.url.path(),
                query: "",
                headers: &headers,
                payload: body.as_bytes(),
            },
            Utc::now(),
        )?;

        let mut request = self
            .client
            .post(self.url.clone())
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Date", &signature.amz_date)
            .header("Authorization", &signature.authorization);
        if let Some(token) = &signature.security_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request.body(body.to_string()).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|e| format!("[Failed to read response body: {e}]"));
        Err(NotifyError::ApiError {
            service: SERVICE.to_string(),
            status: status.as_u16(),
            code: xml_tag(&text, "Code").unwrap_or("Unknown").to_string(),
            message: xml_tag(&text, "Message").unwrap_or(text.as_str()).to_string(),
        })
    }
}

#[async_trait]
impl NotificationChannel for SnsChannel {
    async fn send(&self, batch: &AlertBatch<'_>) -> Result<()> {
        let body = self.publish_body(batch);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.publish(&body).await {
                Ok(()) => {
                    tracing::info!(
                        topic_arn = %self.topic_arn,
                        alerts = batch.alerts.len(),
                        "Alert sent to SNS topic"
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "SNS publish failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt - 1))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn channel_name(&self) -> &str {
        "sns"
    }
}

/// `arn:<partition>:sns:<region>:<account>:<topic>`
pub fn validate_topic_arn(arn: &str) -> Result<()> {
    let parts: Vec<&str> = arn.split(':').collect();
    let valid = parts.len() == 6
        && parts[0] == "arn"
        && !parts[1].is_empty()
        && parts[2] == "sns"
        && !parts[3].is_empty()
        && parts[4].len() == 12
        && parts[4].chars().all(|c| c.is_ascii_digit())
        && !parts[5].is_empty();

    if valid {
        Ok(())
    } else {
        Err(NotifyError::InvalidConfig(format!(
            "{arn:?} is not an SNS topic ARN"
        )))
    }
}
