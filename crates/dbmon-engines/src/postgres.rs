//! PostgreSQL engine probe
//!
//! One round trip per probe: backend count, database size and postmaster
//! uptime come back in a single row.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dbmon_common::types::{ConnectionParams, EngineKind};
use prometheus::core::{Collector, Desc};
use prometheus::{Gauge, IntGauge, Registry};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Row};

use crate::{EngineCollector, Result};

const MAX_POOL_CONNECTIONS: u32 = 2;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maintenance database used when the credential does not name one.
const DEFAULT_DATABASE: &str = "postgres";

/// PostgreSQL probe collector holding its pool and gauge handles
pub struct PostgresCollector {
    pool: PgPool,
    up: IntGauge,
    probe_duration: Gauge,
    connections: IntGauge,
    database_size: IntGauge,
    uptime: IntGauge,
}

impl PostgresCollector {
    /// Build a collector for one instance and register its metrics on the
    /// per-instance registry. The pool is lazy, so construction never dials
    /// the host.
    pub fn register(
        registry: &Registry,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn EngineCollector>> {
        let database = params.dbname.as_deref().unwrap_or(DEFAULT_DATABASE);
        let options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.username)
            .password(&params.password)
            .database(database)
            .ssl_mode(PgSslMode::Disable);

        let pool = PgPoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        let up = IntGauge::new("pg_up", "Whether the last PostgreSQL probe succeeded")?;
        let probe_duration = Gauge::new(
            "pg_probe_duration_seconds",
            "Duration of the last PostgreSQL probe",
        )?;
        let connections = IntGauge::new("pg_connections", "Backends currently connected")?;
        let database_size =
            IntGauge::new("pg_database_size_bytes", "Size of the probed database")?;
        let uptime = IntGauge::new("pg_uptime_seconds", "Seconds since postmaster start")?;

        registry.register(Box::new(up.clone()))?;
        registry.register(Box::new(probe_duration.clone()))?;
        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(database_size.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        Ok(Arc::new(Self {
            pool,
            up,
            probe_duration,
            connections,
            database_size,
            uptime,
        }))
    }

    async fn refresh_status(&self) -> Result<()> {
        let row = sqlx::query(
            "SELECT (SELECT count(*) FROM pg_stat_activity) AS connections, \
             pg_database_size(current_database()) AS db_size, \
             EXTRACT(EPOCH FROM (now() - pg_postmaster_start_time()))::bigint AS uptime",
        )
        .fetch_one(&self.pool)
        .await?;

        self.connections.set(row.try_get::<i64, _>(0)?);
        self.database_size.set(row.try_get::<i64, _>(1)?);
        self.uptime.set(row.try_get::<i64, _>(2)?);
        Ok(())
    }
}

#[async_trait]
impl EngineCollector for PostgresCollector {
    fn engine_kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    async fn probe(&self) -> Result<()> {
        let started = Instant::now();
        let result = self.refresh_status().await;
        self.probe_duration.set(started.elapsed().as_secs_f64());
        match result {
            Ok(()) => {
                self.up.set(1);
                Ok(())
            }
            Err(e) => {
                self.up.set(0);
                Err(e)
            }
        }
    }

    fn describe(&self) -> Vec<Desc> {
        let mut descs = Vec::new();
        for metric_descs in [
            self.up.desc(),
            self.probe_duration.desc(),
            self.connections.desc(),
            self.database_size.desc(),
            self.uptime.desc(),
        ] {
            descs.extend(metric_descs.into_iter().cloned());
        }
        descs
    }

    async fn shutdown(&self) {
        self.pool.close().await;
    }
}
