//! Live credential-to-collector bindings
//!
//! The registry owns the authoritative map from credential id to collector
//! binding. Reconcile is the only mutation path and snapshot the only read
//! path, so nothing else can touch the map or race its lock.

use std::collections::{HashMap, HashSet};

use dbmon_common::types::{CredentialRecord, EngineKind};
use dbmon_engines::{EngineCatalog, EngineCollector};
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One live credential with its collector and per-instance registry.
///
/// Exactly one binding exists per credential id. The metric registry is
/// private to the binding; gathering it yields only this instance's
/// families.
#[derive(Clone)]
pub struct CollectorBinding {
    pub credential_id: String,
    pub engine: EngineKind,
    pub record: CredentialRecord,
    pub collector: Arc<dyn EngineCollector>,
    pub metric_registry: Registry,
}

/// Counts from one reconcile pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
    /// Bindings rebuilt because their credential value changed (rotation)
    pub refreshed: usize,
    /// Records skipped because no collector could be built for them
    pub skipped: usize,
}

/// Thread-safe binding set reconciled against credential snapshots
pub struct CollectorRegistry {
    bindings: RwLock<HashMap<String, CollectorBinding>>,
    catalog: EngineCatalog,
}

impl CollectorRegistry {
    pub fn new(catalog: EngineCatalog) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            catalog,
        }
    }

    /// Bring the binding set in line with the given credential records.
    ///
    /// New ids get a fresh per-instance registry and collector. Ids absent
    /// from `records` are dismantled. Ids whose record changed since binding
    /// creation are rebuilt against the new parameters. Records no collector
    /// can be built for are skipped with a warning and counted, never
    /// aborting the pass.
    ///
    /// Collector teardown happens after the write lock is released so slow
    /// pool shutdowns never block concurrent snapshots.
    pub async fn reconcile(&self, records: Vec<CredentialRecord>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut dismantled: Vec<CollectorBinding> = Vec::new();

        {
            let mut bindings = self.bindings.write().await;

            let incoming: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
            let stale: Vec<String> = bindings
                .keys()
                .filter(|id| !incoming.contains(id.as_str()))
                .cloned()
                .collect();
            for id in stale {
                if let Some(binding) = bindings.remove(&id) {
                    tracing::info!("Removing collector for {}", id);
                    dismantled.push(binding);
                    summary.removed += 1;
                }
            }

            for record in records {
                let unchanged = bindings
                    .get(&record.id)
                    .map(|existing| existing.record == record);
                match unchanged {
                    Some(true) => {}
                    Some(false) => match self.build_binding(&record) {
                        Ok(binding) => {
                            tracing::info!(
                                "Credential {} rotated, rebuilding collector",
                                record.id
                            );
                            if let Some(old) = bindings.insert(record.id.clone(), binding) {
                                dismantled.push(old);
                            }
                            summary.refreshed += 1;
                        }
                        Err(e) => {
                            // Keep monitoring with the old parameters until a
                            // later pass brings usable ones.
                            tracing::warn!(
                                "Failed to rebuild collector for {}, keeping existing binding: {}",
                                record.id,
                                e
                            );
                            summary.skipped += 1;
                        }
                    },
                    None => match self.build_binding(&record) {
                        Ok(binding) => {
                            tracing::info!(
                                "Registered {} collector for {}",
                                record.engine,
                                record.id
                            );
                            bindings.insert(record.id.clone(), binding);
                            summary.added += 1;
                        }
                        Err(e) => {
                            tracing::warn!("Skipping credential {}: {}", record.id, e);
                            summary.skipped += 1;
                        }
                    },
                }
            }
        }

        for binding in dismantled {
            binding.collector.shutdown().await;
        }

        summary
    }

    /// Independent copy of the current bindings, ordered by credential id
    pub async fn snapshot(&self) -> Vec<CollectorBinding> {
        let bindings = self.bindings.read().await;
        let mut out: Vec<CollectorBinding> = bindings.values().cloned().collect();
        out.sort_by(|a, b| a.credential_id.cmp(&b.credential_id));
        out
    }

    fn build_binding(&self, record: &CredentialRecord) -> dbmon_engines::Result<CollectorBinding> {
        let metric_registry = Registry::new();
        let collector = self
            .catalog
            .build(record.engine, &metric_registry, &record.connection)?;
        Ok(CollectorBinding {
            credential_id: record.id.clone(),
            engine: record.engine,
            record: record.clone(),
            collector,
            metric_registry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dbmon_common::types::ConnectionParams;
    use dbmon_engines::error::EngineError;
    use prometheus::core::{Collector as PromCollector, Desc};
    use prometheus::IntGauge;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct MockCollector {
        gauge: IntGauge,
        shutdown_flag: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EngineCollector for MockCollector {
        fn engine_kind(&self) -> EngineKind {
            EngineKind::Mysql
        }

        async fn probe(&self) -> dbmon_engines::Result<()> {
            self.gauge.inc();
            Ok(())
        }

        fn describe(&self) -> Vec<Desc> {
            self.gauge.desc().into_iter().cloned().collect()
        }

        async fn shutdown(&self) {
            self.shutdown_flag.store(true, Ordering::SeqCst);
        }
    }

    type FlagMap = Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>;

    /// Catalog with a mysql factory that records a shutdown flag per
    /// host|password pair, so tests can observe teardown of a specific
    /// collector generation.
    fn mock_catalog(flags: FlagMap) -> EngineCatalog {
        let mut catalog = EngineCatalog::new();
        catalog.register(EngineKind::Mysql, move |registry, params| {
            if params.password == "reject" {
                return Err(EngineError::InvalidParams("password rejected".to_string()));
            }
            let gauge = IntGauge::new("mock_probes_total", "Probe invocations")?;
            registry.register(Box::new(gauge.clone()))?;
            let flag = Arc::new(AtomicBool::new(false));
            flags
                .lock()
                .unwrap()
                .insert(format!("{}|{}", params.host, params.password), Arc::clone(&flag));
            Ok(Arc::new(MockCollector {
                gauge,
                shutdown_flag: flag,
            }) as Arc<dyn EngineCollector>)
        });
        catalog
    }

    fn record(id: &str, engine: EngineKind, password: &str) -> CredentialRecord {
        CredentialRecord {
            id: id.to_string(),
            engine,
            connection: ConnectionParams {
                host: format!("{id}.cluster.local"),
                port: 3306,
                username: "monitor".to_string(),
                password: password.to_string(),
                dbname: None,
            },
        }
    }

    fn new_registry() -> (CollectorRegistry, FlagMap) {
        let flags: FlagMap = Arc::new(Mutex::new(HashMap::new()));
        let registry = CollectorRegistry::new(mock_catalog(Arc::clone(&flags)));
        (registry, flags)
    }

    #[tokio::test]
    async fn should_add_binding_per_discovered_credential() {
        let (registry, _flags) = new_registry();
        let summary = registry
            .reconcile(vec![
                record("db-b", EngineKind::Mysql, "pw"),
                record("db-a", EngineKind::Mysql, "pw"),
            ])
            .await;

        assert_eq!(summary.added, 2);
        assert_eq!(summary.removed, 0);

        let snapshot = registry.snapshot().await;
        let ids: Vec<&str> = snapshot.iter().map(|b| b.credential_id.as_str()).collect();
        assert_eq!(ids, vec!["db-a", "db-b"]);
        assert!(snapshot.iter().all(|b| b.engine == EngineKind::Mysql));
    }

    #[tokio::test]
    async fn should_be_idempotent_for_unchanged_snapshot() {
        let (registry, _flags) = new_registry();
        let records = vec![
            record("db-a", EngineKind::Mysql, "pw"),
            record("db-b", EngineKind::Mysql, "pw"),
        ];

        registry.reconcile(records.clone()).await;
        let second = registry.reconcile(records).await;

        assert_eq!(second, ReconcileSummary::default());
        assert_eq!(registry.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn should_dismantle_removed_binding() {
        let (registry, flags) = new_registry();
        registry
            .reconcile(vec![
                record("db-a", EngineKind::Mysql, "pw"),
                record("db-b", EngineKind::Mysql, "pw"),
            ])
            .await;

        let summary = registry
            .reconcile(vec![record("db-a", EngineKind::Mysql, "pw")])
            .await;

        assert_eq!(summary.removed, 1);
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].credential_id, "db-a");

        let flags = flags.lock().unwrap();
        let removed = flags.get("db-b.cluster.local|pw").unwrap();
        assert!(removed.load(Ordering::SeqCst));
        let kept = flags.get("db-a.cluster.local|pw").unwrap();
        assert!(!kept.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn should_skip_engine_without_factory() {
        let (registry, _flags) = new_registry();
        let summary = registry
            .reconcile(vec![
                record("db-a", EngineKind::Mysql, "pw"),
                record("db-legacy", EngineKind::Oracle, "pw"),
            ])
            .await;

        assert_eq!(summary.added, 1);
        assert_eq!(summary.skipped, 1);
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].credential_id, "db-a");
    }

    #[tokio::test]
    async fn should_rebuild_binding_on_rotation() {
        let (registry, flags) = new_registry();
        registry
            .reconcile(vec![record("db-a", EngineKind::Mysql, "old-pw")])
            .await;

        let summary = registry
            .reconcile(vec![record("db-a", EngineKind::Mysql, "new-pw")])
            .await;

        assert_eq!(summary.refreshed, 1);
        assert_eq!(summary.added, 0);
        assert_eq!(summary.removed, 0);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].record.connection.password, "new-pw");

        let flags = flags.lock().unwrap();
        assert!(flags
            .get("db-a.cluster.local|old-pw")
            .unwrap()
            .load(Ordering::SeqCst));
        assert!(!flags
            .get("db-a.cluster.local|new-pw")
            .unwrap()
            .load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn should_keep_old_binding_when_rebuild_fails() {
        let (registry, flags) = new_registry();
        registry
            .reconcile(vec![record("db-a", EngineKind::Mysql, "old-pw")])
            .await;

        let summary = registry
            .reconcile(vec![record("db-a", EngineKind::Mysql, "reject")])
            .await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.refreshed, 0);
        assert_eq!(summary.removed, 0);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].record.connection.password, "old-pw");
        let flags = flags.lock().unwrap();
        assert!(!flags
            .get("db-a.cluster.local|old-pw")
            .unwrap()
            .load(Ordering::SeqCst));
    }
}
