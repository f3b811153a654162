use crate::error::Result;
use crate::query::{form_encode, parse_query_error, xml_tag};
use crate::retry::retry_throttled;
use crate::sigv4::{service_endpoint, Credentials, RequestParts, SigV4Signer};
use crate::NodeInventory;
use chrono::Utc;
use eksmon_common::types::InstanceDetails;
use reqwest::{Client, Url};
use std::collections::BTreeMap;

const SERVICE: &str = "ec2";
const API_VERSION: &str = "2016-11-15";
const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const IDS_PER_REQUEST: usize = 100;

/// Reads instance type, private IP and state through `DescribeInstances`.
pub struct Ec2Client {
    name: String,
    signer: SigV4Signer,
    host: String,
    url: Url,
    client: Client,
    max_retries: usize,
}

impl Ec2Client {
    pub fn new(
        region: &str,
        credentials: Credentials,
        endpoint_url: Option<&str>,
        max_retries: usize,
        timeout_secs: u64,
    ) -> Result<Self> {
        let (url, host) = service_endpoint(SERVICE, region, endpoint_url)?;
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            name: format!("ec2:{region}"),
            signer: SigV4Signer::new(credentials, region, SERVICE),
            host,
            url,
            client,
            max_retries,
        })
    }

    async fn call_api(&self, body: &str) -> Result<String> {
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
        let text = response.text().await?;
        if !status.is_success() {
            return Err(parse_query_error(SERVICE, status.as_u16(), &text));
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl NodeInventory for Ec2Client {
    fn name(&self) -> &str {
        &self.name
    }

    async fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<InstanceDetails>> {
        let mut details = Vec::with_capacity(instance_ids.len());
        for chunk in instance_ids.chunks(IDS_PER_REQUEST) {
            let body = describe_instances_body(chunk);
            let response = retry_throttled(SERVICE, "DescribeInstances", self.max_retries, || {
                self.call_api(&body)
            })
            .await?;
            details.extend(parse_describe_instances(&response));
        }

        tracing::debug!(
            requested = instance_ids.len(),
            described = details.len(),
            "Described EC2 instances"
        );
        Ok(details)
    }
}

fn describe_instances_body(instance_ids: &[String]) -> String {
    let mut params = BTreeMap::new();
    params.insert("Action".to_string(), "DescribeInstances".to_string());
    params.insert("Version".to_string(), API_VERSION.to_string());
    for (i, id) in instance_ids.iter().enumerate() {
        params.insert(format!("InstanceId.{}", i + 1), id.clone());
    }
    form_encode(&params)
}

/// One entry per `<instanceId>` element of a `DescribeInstances` response.
///
/// Each instance's attributes are read from the text between its id and the
/// next instance id, so nested sets that repeat `privateIpAddress` (network
/// interfaces) are only consulted after the top-level field.
fn parse_describe_instances(body: &str) -> Vec<InstanceDetails> {
    const OPEN: &str = "<instanceId>";

    let mut instances = Vec::new();
    let mut rest = body;
    while let Some(pos) = rest.find(OPEN) {
        rest = &rest[pos..];
        let section_end = rest[OPEN.len()..]
            .find(OPEN)
            .map_or(rest.len(), |next| next + OPEN.len());
        let section = &rest[..section_end];
        rest = &rest[section_end..];

        let Some(instance_id) = xml_tag(section, "instanceId") else {
            continue;
        };
        let state = xml_tag(section, "instanceState")
            .and_then(|inner| xml_tag(inner, "name"))
            .unwrap_or("unknown");

        instances.push(InstanceDetails {
            instance_id: instance_id.to_string(),
            instance_type: xml_tag(section, "instanceType")
                .unwrap_or("unknown")
                .to_string(),
            private_ip: xml_tag(section, "privateIpAddress").map(str::to_string),
            state: state.to_string(),
        });
    }
    instances
}
