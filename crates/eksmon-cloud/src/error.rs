/// Errors that can occur when talking to an AWS API.
///
/// Every variant means the remote side is unavailable for the current
/// request: the collector logs it and skips the affected node for the cycle.
///
/// # Examples
///
/// ```rust
/// use eksmon_cloud::error::CloudProviderError;
///
/// let err = CloudProviderError::MissingCredentials("AWS_ACCESS_KEY_ID".to_string());
/// assert!(err.to_string().contains("AWS_ACCESS_KEY_ID"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CloudProviderError {
    /// HTTP-level error: non-2xx status code without a recognisable AWS error body.
    #[error("{service} API HTTP error: status={status}, body={body}")]
    HttpError {
        service: String,
        status: u16,
        body: String,
    },

    /// The API answered with an AWS error document (`__type` / `Code`).
    #[error("{service} API error: code={code}, message={message}")]
    ApiResponseError {
        service: String,
        code: String,
        message: String,
    },

    /// Request was throttled. Callers may retry after backoff.
    #[error("{service} API rate limited, retry after backoff")]
    RateLimited { service: String },

    /// HMAC signing failed.
    #[error("SigV4 signing error: {0}")]
    SigningError(String),

    /// An underlying HTTP transport error from `reqwest`.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A 2xx response whose payload does not have the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// No datapoint for any metric of the node within the lookback window.
    #[error("No datapoints for node {0}")]
    NoData(String),

    /// The node lacks a dimension the configured metric source needs.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The per-node fetch did not finish in time.
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// The Kubernetes API server could not be queried.
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Required credential environment variable is missing or empty.
    #[error("Missing AWS credentials: {0} is not set")]
    MissingCredentials(String),
}

impl CloudProviderError {
    /// Whether the request may succeed when retried after a backoff.
    pub fn is_throttling(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::ApiResponseError { code, .. } => is_throttling_code(code),
            _ => false,
        }
    }
}

/// AWS error codes that mean "slow down".
pub fn is_throttling_code(code: &str) -> bool {
    matches!(
        code,
        "Throttling" | "ThrottlingException" | "ThrottledException" | "RequestLimitExceeded"
    )
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, CloudProviderError>;
