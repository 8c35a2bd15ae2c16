//! Discovery, reconcile and scrape wired into one trigger surface
//!
//! Credentials are refetched on every pass rather than cached, so a
//! rotated secret takes effect at the next cycle without a restart.

use std::collections::HashMap;
use std::sync::Arc;

use dbmon_aws::CredentialSource;
use dbmon_common::types::CredentialRecord;

use crate::error::Result;
use crate::orchestrator::{CycleResult, ScrapeOrchestrator};
use crate::registry::{CollectorRegistry, ReconcileSummary};

/// Outcome of one discovery-reconcile-scrape pass
#[derive(Debug)]
pub struct CycleReport {
    /// Credential ids returned by the store listing
    pub discovered: usize,
    /// Fetches that failed; bound ids among them keep their binding
    pub fetch_failures: usize,
    pub reconcile: ReconcileSummary,
    pub scrape: CycleResult,
}

/// The collector's single entry point, invoked by the scheduler
pub struct CollectorService {
    source: Arc<dyn CredentialSource>,
    registry: CollectorRegistry,
    orchestrator: ScrapeOrchestrator,
}

impl CollectorService {
    pub fn new(
        source: Arc<dyn CredentialSource>,
        registry: CollectorRegistry,
        orchestrator: ScrapeOrchestrator,
    ) -> Self {
        Self {
            source,
            registry,
            orchestrator,
        }
    }

    /// Refresh the fleet from the credential store, then scrape it.
    ///
    /// Fetch failures are contained per credential: an id that is already
    /// bound keeps its existing binding, an unknown id is skipped until a
    /// later pass.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CycleError::Discovery`] when the store listing
    /// itself fails. The binding set is left untouched in that case and no
    /// scrape runs.
    pub async fn reconcile_and_run_cycle(&self) -> Result<CycleReport> {
        let ids = self.source.list_credential_ids().await?;
        let discovered = ids.len();
        tracing::debug!("Discovered {} tagged credentials", discovered);

        let bound: HashMap<String, CredentialRecord> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .map(|b| (b.credential_id.clone(), b.record))
            .collect();

        let mut records = Vec::with_capacity(ids.len());
        let mut fetch_failures = 0;
        for id in ids {
            match self.source.fetch_credential(&id).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    fetch_failures += 1;
                    match bound.get(&id) {
                        Some(existing) => {
                            tracing::warn!(
                                "Refetch of {} failed, keeping existing binding: {}",
                                id,
                                e
                            );
                            records.push(existing.clone());
                        }
                        None => tracing::warn!("Skipping credential {}: {}", id, e),
                    }
                }
            }
        }

        let reconcile = self.registry.reconcile(records).await;
        let bindings = self.registry.snapshot().await;
        let scrape = self.orchestrator.run_cycle(bindings).await;

        Ok(CycleReport {
            discovered,
            fetch_failures,
            reconcile,
            scrape,
        })
    }
}
