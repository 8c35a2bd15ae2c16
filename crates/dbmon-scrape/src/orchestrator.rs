//! Bounded scrape cycles over the live binding set
//!
//! One cycle spawns a task per binding, bounded by a semaphore so a large
//! fleet cannot open connection storms against its databases. Units are
//! isolated: a probe or delivery failure is recorded in the cycle result
//! and never propagated to sibling units or the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dbmon_common::types::{instance_identifier, EngineKind, EnrichmentLabels};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::error::ScrapeFailure;
use crate::registry::CollectorBinding;
use crate::ScrapeSink;

/// Default number of bindings scraped in parallel
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default bound on a single binding's probe
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(30);

/// Labels identifying this collector deployment, stamped onto every
/// outgoing series next to the per-instance identifier.
#[derive(Debug, Clone)]
pub struct FleetIdentity {
    pub job: String,
    pub region: String,
    pub account_id: String,
}

/// Outcome of one binding's scrape unit
#[derive(Debug, Clone)]
pub struct ScrapeTaskResult {
    pub credential_id: String,
    pub engine: EngineKind,
    pub success: bool,
    pub error: Option<ScrapeFailure>,
    pub duration_ms: u64,
}

/// Aggregated outcomes of one cycle. An empty fleet yields an empty
/// result, not an error.
#[derive(Debug, Default)]
pub struct CycleResult {
    pub results: Vec<ScrapeTaskResult>,
}

impl CycleResult {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Drives one collection cycle across a snapshot of bindings
pub struct ScrapeOrchestrator {
    sink: Arc<dyn ScrapeSink>,
    identity: FleetIdentity,
    permits: Arc<Semaphore>,
    scrape_timeout: Duration,
}

impl ScrapeOrchestrator {
    pub fn new(
        sink: Arc<dyn ScrapeSink>,
        identity: FleetIdentity,
        concurrency: usize,
        scrape_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            identity,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            scrape_timeout,
        }
    }

    /// Scrape every binding once and wait for all units to finish.
    ///
    /// Dropping the returned future aborts any still-running units.
    pub async fn run_cycle(&self, bindings: Vec<CollectorBinding>) -> CycleResult {
        let mut tasks = JoinSet::new();
        for binding in bindings {
            let permits = Arc::clone(&self.permits);
            let sink = Arc::clone(&self.sink);
            let identity = self.identity.clone();
            let scrape_timeout = self.scrape_timeout;
            tasks.spawn(scrape_one(binding, sink, identity, permits, scrape_timeout));
        }

        let mut cycle = CycleResult::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if let Some(error) = &result.error {
                        tracing::warn!("Scrape of {} failed: {}", result.credential_id, error);
                    }
                    cycle.results.push(result);
                }
                Err(e) => {
                    tracing::warn!("Scrape task did not complete: {}", e);
                }
            }
        }

        tracing::info!(
            succeeded = cycle.succeeded(),
            failed = cycle.failed(),
            "Scrape cycle complete"
        );
        cycle
    }
}

async fn scrape_one(
    binding: CollectorBinding,
    sink: Arc<dyn ScrapeSink>,
    identity: FleetIdentity,
    permits: Arc<Semaphore>,
    scrape_timeout: Duration,
) -> ScrapeTaskResult {
    let started = Instant::now();
    let _permit = match permits.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            return unit_failure(
                &binding,
                started,
                ScrapeFailure::Scrape("concurrency limiter closed".to_string()),
            )
        }
    };

    match timeout(scrape_timeout, binding.collector.probe()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return unit_failure(&binding, started, ScrapeFailure::Scrape(e.to_string()));
        }
        Err(_) => {
            return unit_failure(
                &binding,
                started,
                ScrapeFailure::Scrape(format!("probe timed out after {:?}", scrape_timeout)),
            );
        }
    }

    let families = binding.metric_registry.gather();
    let enrichment = EnrichmentLabels {
        identifier: instance_identifier(&binding.record.connection.host).to_string(),
        job: identity.job,
        region: identity.region,
        account_id: identity.account_id,
        engine: binding.engine.to_string(),
    };

    if let Err(e) = sink.ship(&families, &enrichment).await {
        return unit_failure(&binding, started, ScrapeFailure::Ship(e.to_string()));
    }

    ScrapeTaskResult {
        credential_id: binding.credential_id,
        engine: binding.engine,
        success: true,
        error: None,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

fn unit_failure(
    binding: &CollectorBinding,
    started: Instant,
    error: ScrapeFailure,
) -> ScrapeTaskResult {
    ScrapeTaskResult {
        credential_id: binding.credential_id.clone(),
        engine: binding.engine,
        success: false,
        error: Some(error),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dbmon_common::types::{ConnectionParams, CredentialRecord};
    use dbmon_engines::error::EngineError;
    use dbmon_engines::EngineCollector;
    use prometheus::core::{Collector as PromCollector, Desc};
    use prometheus::proto::MetricFamily;
    use prometheus::{IntGauge, Registry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockCollector {
        gauge: IntGauge,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl EngineCollector for MockCollector {
        fn engine_kind(&self) -> EngineKind {
            EngineKind::Mysql
        }

        async fn probe(&self) -> dbmon_engines::Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(EngineError::InvalidParams("connection refused".to_string()));
            }
            self.gauge.set(1);
            Ok(())
        }

        fn describe(&self) -> Vec<Desc> {
            self.gauge.desc().into_iter().cloned().collect()
        }

        async fn shutdown(&self) {}
    }

    fn test_binding(id: &str, fail: bool, delay: Option<Duration>) -> CollectorBinding {
        let metric_registry = Registry::new();
        let gauge = IntGauge::new("mock_up", "Mock liveness").unwrap();
        metric_registry.register(Box::new(gauge.clone())).unwrap();
        let record = CredentialRecord {
            id: id.to_string(),
            engine: EngineKind::Mysql,
            connection: ConnectionParams {
                host: format!("{id}.cluster.local"),
                port: 3306,
                username: "monitor".to_string(),
                password: "pw".to_string(),
                dbname: None,
            },
        };
        CollectorBinding {
            credential_id: record.id.clone(),
            engine: record.engine,
            record,
            collector: Arc::new(MockCollector { gauge, fail, delay }),
            metric_registry,
        }
    }

    fn identity() -> FleetIdentity {
        FleetIdentity {
            job: "database-collector".to_string(),
            region: "us-west-2".to_string(),
            account_id: "123456789012".to_string(),
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        shipped: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        hold: Option<Duration>,
    }

    #[async_trait]
    impl ScrapeSink for RecordingSink {
        async fn ship(
            &self,
            families: &[MetricFamily],
            enrichment: &EnrichmentLabels,
        ) -> anyhow::Result<()> {
            assert!(!families.is_empty());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(hold) = self.hold {
                tokio::time::sleep(hold).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.shipped
                .lock()
                .unwrap()
                .push(enrichment.identifier.clone());
            Ok(())
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met within 2s");
    }

    #[tokio::test]
    async fn should_isolate_failing_binding() {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = ScrapeOrchestrator::new(
            Arc::clone(&sink) as Arc<dyn ScrapeSink>,
            identity(),
            DEFAULT_CONCURRENCY,
            DEFAULT_SCRAPE_TIMEOUT,
        );

        let cycle = orchestrator
            .run_cycle(vec![
                test_binding("db-bad", true, None),
                test_binding("db-good", false, None),
            ])
            .await;

        assert_eq!(cycle.succeeded(), 1);
        assert_eq!(cycle.failed(), 1);

        let bad = cycle
            .results
            .iter()
            .find(|r| r.credential_id == "db-bad")
            .unwrap();
        assert!(!bad.success);
        assert!(matches!(bad.error, Some(ScrapeFailure::Scrape(_))));

        let shipped = sink.shipped.lock().unwrap();
        assert_eq!(shipped.as_slice(), ["db-good"]);
    }

    #[tokio::test]
    async fn should_bound_concurrent_units() {
        let sink = Arc::new(RecordingSink {
            hold: Some(Duration::from_millis(25)),
            ..RecordingSink::default()
        });
        let orchestrator = ScrapeOrchestrator::new(
            Arc::clone(&sink) as Arc<dyn ScrapeSink>,
            identity(),
            2,
            DEFAULT_SCRAPE_TIMEOUT,
        );

        let bindings = (0..5)
            .map(|i| test_binding(&format!("db-{i}"), false, None))
            .collect();
        let cycle = orchestrator.run_cycle(bindings).await;

        assert_eq!(cycle.succeeded(), 5);
        assert!(sink.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn should_return_empty_result_for_empty_fleet() {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = ScrapeOrchestrator::new(
            Arc::clone(&sink) as Arc<dyn ScrapeSink>,
            identity(),
            DEFAULT_CONCURRENCY,
            DEFAULT_SCRAPE_TIMEOUT,
        );

        let cycle = orchestrator.run_cycle(Vec::new()).await;

        assert!(cycle.results.is_empty());
        assert_eq!(cycle.succeeded(), 0);
        assert!(sink.shipped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_time_out_stuck_probe() {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = ScrapeOrchestrator::new(
            Arc::clone(&sink) as Arc<dyn ScrapeSink>,
            identity(),
            DEFAULT_CONCURRENCY,
            Duration::from_millis(20),
        );

        let cycle = orchestrator
            .run_cycle(vec![test_binding(
                "db-slow",
                false,
                Some(Duration::from_secs(5)),
            )])
            .await;

        assert_eq!(cycle.failed(), 1);
        let error = cycle.results[0].error.as_ref().unwrap();
        assert!(error.to_string().contains("timed out"));
        assert!(sink.shipped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_abort_outstanding_units_when_cycle_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Arc::new(ScrapeOrchestrator::new(
            Arc::clone(&sink) as Arc<dyn ScrapeSink>,
            identity(),
            2,
            DEFAULT_SCRAPE_TIMEOUT,
        ));
        let permits = Arc::clone(&orchestrator.permits);

        let bindings = (0..3)
            .map(|i| test_binding(&format!("db-{i}"), false, Some(Duration::from_secs(30))))
            .collect();
        let cycle = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.run_cycle(bindings).await }
        });

        // Both permits held once two units are mid-probe.
        wait_until(|| permits.available_permits() == 0).await;
        cycle.abort();
        assert!(cycle.await.unwrap_err().is_cancelled());

        // Dropping the cycle aborts its units: the held permits come
        // back and nothing reaches the sink.
        wait_until(|| permits.available_permits() == 2).await;
        assert!(sink.shipped.lock().unwrap().is_empty());
        assert_eq!(sink.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn should_stamp_identity_into_enrichment() {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = ScrapeOrchestrator::new(
            Arc::clone(&sink) as Arc<dyn ScrapeSink>,
            identity(),
            DEFAULT_CONCURRENCY,
            DEFAULT_SCRAPE_TIMEOUT,
        );

        orchestrator
            .run_cycle(vec![test_binding("orders-db", false, None)])
            .await;

        // identifier is the host's first dotted segment
        let shipped = sink.shipped.lock().unwrap();
        assert_eq!(shipped.as_slice(), ["orders-db"]);
    }
}
