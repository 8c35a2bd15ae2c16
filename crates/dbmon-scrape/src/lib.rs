//! Fleet scrape pipeline
//!
//! Ties credential discovery to per-instance collectors and drives the
//! periodic collection cycle:
//!
//! - [`registry::CollectorRegistry`] reconciles live bindings against the
//!   latest credential snapshot
//! - [`orchestrator::ScrapeOrchestrator`] probes and gathers every binding
//!   under a concurrency bound
//! - [`service::CollectorService`] is the single trigger surface invoked by
//!   the scheduler
//!
//! Delivery is behind the [`ScrapeSink`] trait so the pipeline can be
//! exercised without a remote backend.

pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod service;

use async_trait::async_trait;
use dbmon_common::types::EnrichmentLabels;
use prometheus::proto::MetricFamily;

pub use error::{CycleError, Result, ScrapeFailure};
pub use orchestrator::{
    CycleResult, FleetIdentity, ScrapeOrchestrator, ScrapeTaskResult, DEFAULT_CONCURRENCY,
    DEFAULT_SCRAPE_TIMEOUT,
};
pub use registry::{CollectorBinding, CollectorRegistry, ReconcileSummary};
pub use service::{CollectorService, CycleReport};

/// Destination for one binding's gathered metric families.
///
/// The sink owns encoding and delivery. A returned error fails only that
/// binding's unit for the cycle; it is never retried and never affects
/// sibling units.
#[async_trait]
pub trait ScrapeSink: Send + Sync {
    /// Encode and deliver one instance's families.
    ///
    /// # Errors
    ///
    /// Returns an error when the batch cannot be encoded or delivered.
    async fn ship(
        &self,
        families: &[MetricFamily],
        enrichment: &EnrichmentLabels,
    ) -> anyhow::Result<()>;
}
