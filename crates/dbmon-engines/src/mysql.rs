//! MySQL engine probe
//!
//! Connects with a small lazy pool and refreshes a handful of
//! `mysql_global_status_*` gauges per probe, mirroring the subset of
//! server status the fleet dashboards consume.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dbmon_common::types::{ConnectionParams, EngineKind};
use prometheus::core::{Collector, Desc};
use prometheus::{Gauge, IntGauge, Registry};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::{MySqlPool, Row};

use crate::{EngineCollector, Result};

const MAX_POOL_CONNECTIONS: u32 = 2;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// MySQL probe collector holding its pool and gauge handles
pub struct MysqlCollector {
    pool: MySqlPool,
    up: IntGauge,
    probe_duration: Gauge,
    uptime: IntGauge,
    threads_connected: IntGauge,
    questions: IntGauge,
}

impl MysqlCollector {
    /// Build a collector for one instance and register its metrics on the
    /// per-instance registry. The pool is lazy, so construction never dials
    /// the host.
    pub fn register(
        registry: &Registry,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn EngineCollector>> {
        // Probes connect without a schema, matching how the monitoring
        // accounts are provisioned.
        let options = MySqlConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.username)
            .password(&params.password)
            .ssl_mode(MySqlSslMode::Disabled);

        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        let up = IntGauge::new("mysql_up", "Whether the last MySQL probe succeeded")?;
        let probe_duration = Gauge::new(
            "mysql_probe_duration_seconds",
            "Duration of the last MySQL probe",
        )?;
        let uptime = IntGauge::new(
            "mysql_global_status_uptime",
            "Seconds the server has been up",
        )?;
        let threads_connected = IntGauge::new(
            "mysql_global_status_threads_connected",
            "Currently open connections",
        )?;
        let questions = IntGauge::new(
            "mysql_global_status_questions",
            "Statements executed by clients",
        )?;

        registry.register(Box::new(up.clone()))?;
        registry.register(Box::new(probe_duration.clone()))?;
        registry.register(Box::new(uptime.clone()))?;
        registry.register(Box::new(threads_connected.clone()))?;
        registry.register(Box::new(questions.clone()))?;

        Ok(Arc::new(Self {
            pool,
            up,
            probe_duration,
            uptime,
            threads_connected,
            questions,
        }))
    }

    async fn refresh_status(&self) -> Result<()> {
        let rows = sqlx::query(
            "SHOW GLOBAL STATUS WHERE Variable_name IN \
             ('Uptime', 'Threads_connected', 'Questions')",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let name: String = row.try_get(0)?;
            let value: String = row.try_get(1)?;
            // Status values arrive as strings; skip anything non-numeric.
            let Ok(value) = value.parse::<i64>() else {
                continue;
            };
            match name.as_str() {
                "Uptime" => self.uptime.set(value),
                "Threads_connected" => self.threads_connected.set(value),
                "Questions" => self.questions.set(value),
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EngineCollector for MysqlCollector {
    fn engine_kind(&self) -> EngineKind {
        EngineKind::Mysql
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
            self.uptime.desc(),
            self.threads_connected.desc(),
            self.questions.desc(),
        ] {
            descs.extend(metric_descs.into_iter().cloned());
        }
        descs
    }

    async fn shutdown(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> ConnectionParams {
        ConnectionParams {
            host: "orders-db.cluster-abc123.us-west-2.rds.amazonaws.com".to_string(),
            port: 3306,
            username: "monitor".to_string(),
            password: "s3cret".to_string(),
            dbname: None,
        }
    }

    #[tokio::test]
    async fn should_register_probe_metrics() {
        let registry = Registry::new();
        let collector = MysqlCollector::register(&registry, &test_params()).unwrap();

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"mysql_up".to_string()));
        assert!(names.contains(&"mysql_global_status_uptime".to_string()));
        assert_eq!(names.len(), 5);
        assert_eq!(collector.engine_kind(), EngineKind::Mysql);
    }

    #[tokio::test]
    async fn should_reject_double_registration() {
        let registry = Registry::new();
        MysqlCollector::register(&registry, &test_params()).unwrap();
        assert!(MysqlCollector::register(&registry, &test_params()).is_err());
    }

    #[tokio::test]
    async fn should_close_pool_without_connecting() {
        let registry = Registry::new();
        let collector = MysqlCollector::register(&registry, &test_params()).unwrap();
        collector.shutdown().await;
    }
}
