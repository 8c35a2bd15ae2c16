use dbmon_common::types::EngineKind;
use thiserror::Error;

/// Errors raised by engine collectors and the collector catalog.
///
/// # Example
///
/// ```
/// use dbmon_engines::error::EngineError;
/// use dbmon_common::types::EngineKind;
///
/// let err = EngineError::UnsupportedEngine(EngineKind::Oracle);
/// assert!(err.to_string().contains("oracle"));
/// ```
#[derive(Error, Debug)]
pub enum EngineError {
    /// No collector factory is registered for the engine kind.
    #[error("No collector registered for engine: {0}")]
    UnsupportedEngine(EngineKind),

    /// A collector factory rejected the connection parameters.
    #[error("Invalid connection parameters: {0}")]
    InvalidParams(String),

    /// Connection or probe query failure against the target database.
    #[error("Probe error: {0}")]
    Probe(#[from] sqlx::Error),

    /// Metric registration failed on the per-instance registry.
    #[error("Metric registration error: {0}")]
    Registration(#[from] prometheus::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
