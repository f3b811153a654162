use eksmon_cloud::error::CloudProviderError;

/// Errors that can occur while publishing an alert notification.
///
/// None of these ever stop the monitoring loop: the manager logs them and
/// records them in the cycle report.
///
/// # Examples
///
/// ```rust
/// use eksmon_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("topic arn is empty".to_string());
/// assert!(err.to_string().contains("topic arn"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// An HTTP request to the notification endpoint failed.
    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The request could not be signed or the endpoint could not be resolved.
    #[error("Notify: request preparation failed: {0}")]
    Request(#[from] CloudProviderError),

    /// The external API returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, code={code}, message={message}")]
    ApiError {
        service: String,
        status: u16,
        code: String,
        message: String,
    },
}

impl NotifyError {
    /// Transport failures, server errors and throttling may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_) => true,
            Self::ApiError { status, code, .. } => {
                *status >= 500 || eksmon_cloud::error::is_throttling_code(code)
            }
            _ => false,
        }
    }
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
