use dbmon_aws::error::AwsError;
use thiserror::Error;

/// Errors raised while encoding or delivering a remote-write batch.
///
/// # Example
///
/// ```
/// use dbmon_remote::error::RemoteWriteError;
///
/// let err = RemoteWriteError::Rejected { status: 403, body: "signature expired".to_string() };
/// assert!(err.to_string().contains("403"));
/// ```
#[derive(Error, Debug)]
pub enum RemoteWriteError {
    /// Endpoint configuration is missing or unparseable. Surfaced at
    /// startup, never per send.
    #[error("Remote write configuration error: {0}")]
    Config(String),

    /// Snappy compression of the serialized request failed.
    #[error("Compression error: {0}")]
    Compression(#[from] snap::Error),

    /// Signing or credential assumption failed.
    #[error("Signing error: {0}")]
    Signing(#[from] AwsError),

    /// An underlying HTTP transport error from `reqwest`.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The backend answered with a non-success status. The body is kept for
    /// diagnostics; the batch is dropped.
    #[error("Remote write rejected: status={status}, body={body}")]
    Rejected { status: u16, body: String },
}

/// Result type alias for remote-write operations
pub type Result<T> = std::result::Result<T, RemoteWriteError>;
