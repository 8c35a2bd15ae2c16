use dbmon_aws::error::AwsError;
use thiserror::Error;

/// Cycle-level failures.
///
/// Per-binding failures never surface here; they are carried inside the
/// cycle result so one bad database cannot fail the fleet.
#[derive(Error, Debug)]
pub enum CycleError {
    /// Credential listing failed, so no snapshot could be taken. The
    /// binding set is left untouched.
    #[error("Credential discovery failed: {0}")]
    Discovery(#[from] AwsError),
}

/// Why one binding's scrape unit failed
#[derive(Error, Debug, Clone)]
pub enum ScrapeFailure {
    /// Probe against the database failed or timed out
    #[error("Scrape failed: {0}")]
    Scrape(String),

    /// Encoding or delivery of the gathered batch failed
    #[error("Ship failed: {0}")]
    Ship(String),
}

/// Result type alias for cycle operations
pub type Result<T> = std::result::Result<T, CycleError>;
