//! Database engine probes for the fleet collector
//!
//! Each supported engine ships a collector that owns a lazy connection pool
//! and a set of gauges registered on a per-instance prometheus registry.
//! Probing refreshes the gauges; the registry is gathered and shipped by the
//! scrape layer. The [`EngineCatalog`] maps engine kinds to collector
//! factories so unsupported engines are rejected up front.

pub mod error;
pub mod mysql;
pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dbmon_common::types::{ConnectionParams, EngineKind};
use prometheus::core::Desc;
use prometheus::Registry;

pub use error::{EngineError, Result};

/// Trait for database engine collectors
///
/// A collector is built once per monitored instance and holds its pool and
/// metric handles for the lifetime of the binding. Implementations must not
/// dial the database at construction time; the first connection is made by
/// the first probe.
#[async_trait]
pub trait EngineCollector: Send + Sync {
    /// Engine kind this collector probes
    fn engine_kind(&self) -> EngineKind;

    /// Run the probe queries and refresh the registered gauges.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be reached or a probe
    /// query fails. The `up` gauge is set to 0 before the error is
    /// returned.
    async fn probe(&self) -> Result<()>;

    /// Descriptors of the metrics this collector registered
    fn describe(&self) -> Vec<Desc>;

    /// Close the connection pool. Called when the binding is dismantled.
    async fn shutdown(&self);
}

/// Factory building a collector against a per-instance registry
pub type EngineFactory =
    Box<dyn Fn(&Registry, &ConnectionParams) -> Result<Arc<dyn EngineCollector>> + Send + Sync>;

/// Catalog of collector factories keyed by engine kind
pub struct EngineCatalog {
    factories: HashMap<EngineKind, EngineFactory>,
}

impl EngineCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a catalog with the built-in MySQL and PostgreSQL collectors
    pub fn with_builtin_engines() -> Self {
        let mut catalog = Self::new();
        catalog.register(EngineKind::Mysql, mysql::MysqlCollector::register);
        catalog.register(EngineKind::Postgres, postgres::PostgresCollector::register);
        catalog
    }

    /// Register a collector factory for an engine kind
    pub fn register<F>(&mut self, kind: EngineKind, factory: F)
    where
        F: Fn(&Registry, &ConnectionParams) -> Result<Arc<dyn EngineCollector>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
    }

    /// Whether a factory is registered for the engine kind
    pub fn supports(&self, kind: EngineKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Build a collector for the engine kind.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedEngine`] when no factory is
    /// registered for the kind, or the factory's own error when metric
    /// registration fails.
    pub fn build(
        &self,
        kind: EngineKind,
        registry: &Registry,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn EngineCollector>> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or(EngineError::UnsupportedEngine(kind))?;
        factory(registry, params)
    }
}

impl Default for EngineCatalog {
    fn default() -> Self {
        Self::with_builtin_engines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntGauge;

    fn test_params() -> ConnectionParams {
        ConnectionParams {
            host: "db-1.cluster.local".to_string(),
            port: 3306,
            username: "monitor".to_string(),
            password: "secret".to_string(),
            dbname: None,
        }
    }

    struct NullCollector {
        kind: EngineKind,
        probes: IntGauge,
    }

    #[async_trait]
    impl EngineCollector for NullCollector {
        fn engine_kind(&self) -> EngineKind {
            self.kind
        }

        async fn probe(&self) -> Result<()> {
            self.probes.inc();
            Ok(())
        }

        fn describe(&self) -> Vec<Desc> {
            use prometheus::core::Collector;
            self.probes.desc().into_iter().cloned().collect()
        }

        async fn shutdown(&self) {}
    }

    #[test]
    fn should_support_builtin_engines() {
        let catalog = EngineCatalog::with_builtin_engines();
        assert!(catalog.supports(EngineKind::Mysql));
        assert!(catalog.supports(EngineKind::Postgres));
        assert!(!catalog.supports(EngineKind::Oracle));
    }

    #[test]
    fn should_reject_unregistered_engine() {
        let catalog = EngineCatalog::with_builtin_engines();
        let registry = Registry::new();
        match catalog.build(EngineKind::Oracle, &registry, &test_params()) {
            Err(EngineError::UnsupportedEngine(kind)) => assert_eq!(kind, EngineKind::Oracle),
            _ => panic!("expected unsupported engine error"),
        }
    }

    #[tokio::test]
    async fn should_build_from_custom_factory() {
        let mut catalog = EngineCatalog::new();
        catalog.register(EngineKind::Oracle, |registry, _params| {
            let probes = IntGauge::new("oracle_probes_total", "Probe invocations")?;
            registry.register(Box::new(probes.clone()))?;
            Ok(Arc::new(NullCollector {
                kind: EngineKind::Oracle,
                probes,
            }) as Arc<dyn EngineCollector>)
        });

        let registry = Registry::new();
        let collector = catalog
            .build(EngineKind::Oracle, &registry, &test_params())
            .unwrap();
        assert_eq!(collector.engine_kind(), EngineKind::Oracle);

        collector.probe().await.unwrap();
        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "oracle_probes_total");
        assert_eq!(families[0].get_metric()[0].get_gauge().get_value(), 1.0);
    }

    #[tokio::test]
    async fn should_build_mysql_collector_lazily() {
        // connect_lazy means building a collector never dials the host
        let catalog = EngineCatalog::with_builtin_engines();
        let registry = Registry::new();
        let collector = catalog
            .build(EngineKind::Mysql, &registry, &test_params())
            .unwrap();
        assert_eq!(collector.engine_kind(), EngineKind::Mysql);
        assert!(!collector.describe().is_empty());
    }
}
