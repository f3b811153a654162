//! AWS Signature Version 4 request signing.

use crate::error::{CloudProviderError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Static credentials read from the process environment.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| CloudProviderError::MissingCredentials(key.to_string()))
        };

        Ok(Self {
            access_key_id: required("AWS_ACCESS_KEY_ID")?,
            secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
            session_token: lookup("AWS_SESSION_TOKEN").filter(|v| !v.trim().is_empty()),
        })
    }
}

/// The parts of an HTTP request that take part in the signature.
pub struct RequestParts<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    /// Already canonical (sorted, RFC 3986 encoded) query string.
    pub query: &'a str,
    /// Extra headers to sign. `host`, `x-amz-date` and the session token
    /// are added by the signer.
    pub headers: &'a [(&'a str, &'a str)],
    pub payload: &'a [u8],
}

/// Headers the caller must attach to the outgoing request.
#[derive(Debug, Clone)]
pub struct Signature {
    pub amz_date: String,
    pub authorization: String,
    pub security_token: Option<String>,
}

/// Signs requests for one AWS service in one region.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: Credentials,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(credentials: Credentials, region: &str, service: &str) -> Self {
        Self {
            credentials,
            region: region.to_string(),
            service: service.to_string(),
        }
    }

    pub fn sign(&self, req: &RequestParts<'_>, now: DateTime<Utc>) -> Result<Signature> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        // Step 1: canonical request
        let mut headers: BTreeMap<String, String> = req
            .headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
            .collect();
        headers.insert("host".to_string(), req.host.to_string());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        if let Some(token) = &self.credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let hashed_payload = hex::encode(Sha256::digest(req.payload));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            req.method, req.path, req.query, canonical_headers, signed_headers, hashed_payload
        );

        // Step 2: string to sign
        let credential_scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        // Step 3: signature
        let signing_key = self.signing_key(&date)?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        Ok(Signature {
            amz_date,
            authorization,
            security_token: self.credentials.session_token.clone(),
        })
    }

    fn signing_key(&self, date: &str) -> Result<Vec<u8>> {
        let k_date = hmac_sha256(
            format!("AWS4{}", self.credentials.secret_access_key).as_bytes(),
            date.as_bytes(),
        )?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        hmac_sha256(&k_service, b"aws4_request")
    }
}

/// URL and signed `Host` value for a regional service endpoint, e.g.
/// `https://sns.us-west-2.amazonaws.com/`, unless `endpoint_override` is set.
pub fn service_endpoint(
    service: &str,
    region: &str,
    endpoint_override: Option<&str>,
) -> Result<(Url, String)> {
    let raw = match endpoint_override {
        Some(endpoint) => endpoint.to_string(),
        None => format!("https://{service}.{region}.amazonaws.com/"),
    };
    let url = Url::parse(&raw)
        .map_err(|e| CloudProviderError::InvalidTarget(format!("endpoint {raw:?}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| CloudProviderError::InvalidTarget(format!("endpoint {raw:?} has no host")))?;
    // reqwest sends the port in Host only when it is not the scheme default
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok((url, host))
}

/// HMAC-SHA256 helper function
fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CloudProviderError::SigningError(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
