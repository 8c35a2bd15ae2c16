//! Service wiring and schedule loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dbmon_aws::credentials::{AwsCredentials, CredentialsProvider};
use dbmon_aws::secrets::{SecretsManagerClient, SecretsManagerSource};
use dbmon_aws::CredentialSource;
use dbmon_engines::EngineCatalog;
use dbmon_remote::RemoteWriteClient;
use dbmon_scrape::{
    CollectorRegistry, CollectorService, CycleReport, FleetIdentity, ScrapeOrchestrator,
    ScrapeSink,
};
use tokio::signal;

use crate::config::{CollectorConfig, RunMode};
use crate::sink::RemoteWriteSink;

/// Build the service from configuration and drive it per the run mode.
///
/// In `once` mode a cycle failure becomes the process exit status so an
/// external scheduler can see it. In `interval` mode failures are logged
/// and the next tick tries again.
pub async fn run(config: CollectorConfig) -> Result<()> {
    let service = build_service(&config)?;

    match config.run_mode {
        RunMode::Once => {
            let report = service.reconcile_and_run_cycle().await?;
            log_report(&report);
        }
        RunMode::Interval => {
            tracing::info!("Scraping every {}s until interrupted", config.interval_secs);
            let mut tick = tokio::time::interval(Duration::from_secs(config.interval_secs));
            let shutdown = signal::ctrl_c();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        // A signal mid-cycle drops the cycle future,
                        // aborting its outstanding scrape units.
                        tokio::select! {
                            result = service.reconcile_and_run_cycle() => match result {
                                Ok(report) => log_report(&report),
                                Err(e) => tracing::error!("Cycle aborted: {}", e),
                            },
                            _ = &mut shutdown => {
                                tracing::info!("Received shutdown signal, abandoning cycle");
                                break;
                            }
                        }
                    }
                    _ = &mut shutdown => {
                        tracing::info!("Received shutdown signal");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

fn build_service(config: &CollectorConfig) -> Result<CollectorService> {
    let base = AwsCredentials::from_env().context("AWS credentials are required")?;
    let credentials = Arc::new(CredentialsProvider::new(
        base,
        &config.region,
        config.assume_role_arn.clone(),
    )?);

    let secrets = SecretsManagerClient::new(&config.region, Arc::clone(&credentials))?;
    let source = SecretsManagerSource::new(secrets, config.secret_tag_key.clone());

    let remote = RemoteWriteClient::new(
        &config.remote_write_url,
        &config.region,
        Arc::clone(&credentials),
    )?;
    let sink = Arc::new(RemoteWriteSink::new(remote)) as Arc<dyn ScrapeSink>;

    let registry = CollectorRegistry::new(EngineCatalog::with_builtin_engines());
    let identity = FleetIdentity {
        job: config.job.clone(),
        region: config.region.clone(),
        account_id: config.account_id.clone(),
    };
    let orchestrator = ScrapeOrchestrator::new(
        sink,
        identity,
        config.concurrency,
        Duration::from_secs(config.scrape_timeout_secs),
    );

    Ok(CollectorService::new(
        Arc::new(source) as Arc<dyn CredentialSource>,
        registry,
        orchestrator,
    ))
}

fn log_report(report: &CycleReport) {
    tracing::info!(
        discovered = report.discovered,
        fetch_failures = report.fetch_failures,
        added = report.reconcile.added,
        removed = report.reconcile.removed,
        refreshed = report.reconcile.refreshed,
        succeeded = report.scrape.succeeded(),
        failed = report.scrape.failed(),
        "Cycle finished"
    );
}
