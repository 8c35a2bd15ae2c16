use dbmon_common::types::CredentialParseError;

/// Errors that can occur when signing requests or calling AWS APIs.
///
/// # Examples
///
/// ```rust
/// use dbmon_aws::error::AwsError;
///
/// let err = AwsError::MissingCredentials("AWS_ACCESS_KEY_ID".to_string());
/// assert!(err.to_string().contains("AWS_ACCESS_KEY_ID"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    /// The environment is missing a required credential variable.
    #[error("Missing AWS credentials: {0} is not set")]
    MissingCredentials(String),

    /// HTTP-level error: non-2xx status code from an AWS endpoint.
    #[error("{service} API HTTP error: status={status}, body={body}")]
    HttpError {
        service: String,
        status: u16,
        body: String,
    },

    /// API returned a 2xx status but the payload is missing expected fields.
    #[error("{service} API response error: {message}")]
    ApiResponseError { service: String, message: String },

    /// HMAC signing failed (invalid key length or algorithm mismatch).
    #[error("HMAC signing error: {0}")]
    HmacError(String),

    /// An underlying HTTP transport error from `reqwest`.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A fetched secret payload failed schema validation.
    #[error(transparent)]
    Credential(#[from] CredentialParseError),

    /// Endpoint or signing configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, AwsError>;
