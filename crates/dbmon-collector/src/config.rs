//! Collector configuration
//!
//! A TOML file provides the base, environment variables override it, and
//! validation runs once at startup so a misconfigured deployment fails
//! before the first cycle. Container deployments can skip the file
//! entirely and configure everything through the environment.

use anyhow::Context;
use dbmon_aws::secrets::COLLECTION_TAG_KEY;
use dbmon_common::types::DEFAULT_JOB;
use serde::Deserialize;

/// How cycles are triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Run a cycle every `interval_secs` until interrupted
    #[default]
    Interval,
    /// Run exactly one cycle and exit, for external schedulers
    Once,
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interval" => Ok(RunMode::Interval),
            "once" => Ok(RunMode::Once),
            _ => Err(format!("unknown run mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Remote write endpoint of the managed prometheus workspace
    #[serde(default)]
    pub remote_write_url: String,
    /// Region used for API calls and request signing
    #[serde(default)]
    pub region: String,
    /// Account id stamped into the `accountId` enrichment label
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub run_mode: RunMode,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_scrape_timeout_secs")]
    pub scrape_timeout_secs: u64,
    /// Job label value on every outgoing series
    #[serde(default = "default_job")]
    pub job: String,
    /// Tag key marking secrets as collection-eligible
    #[serde(default = "default_secret_tag_key")]
    pub secret_tag_key: String,
    /// Role assumed for signing when the workspace lives in another account
    #[serde(default)]
    pub assume_role_arn: Option<String>,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_concurrency() -> usize {
    dbmon_scrape::DEFAULT_CONCURRENCY
}

fn default_scrape_timeout_secs() -> u64 {
    dbmon_scrape::DEFAULT_SCRAPE_TIMEOUT.as_secs()
}

fn default_job() -> String {
    DEFAULT_JOB.to_string()
}

fn default_secret_tag_key() -> String {
    COLLECTION_TAG_KEY.to_string()
}

impl CollectorConfig {
    /// Load from a TOML file, apply environment overrides, validate.
    ///
    /// # Errors
    ///
    /// Fails on an unreadable or unparseable file, an invalid environment
    /// override, or when a required setting is still missing after
    /// overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config: CollectorConfig = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {path}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Config file {} not found, using environment only", path);
                toml::from_str("").context("Failed to build default configuration")?
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file: {path}"))
            }
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(url) = std::env::var("PROMETHEUS_REMOTE_WRITE_URL") {
            self.remote_write_url = url;
        }
        if let Ok(region) = std::env::var("AWS_REGION") {
            self.region = region;
        }
        if let Ok(account_id) = std::env::var("AWS_ACCOUNT_ID") {
            self.account_id = account_id;
        }
        if let Ok(mode) = std::env::var("RUN_MODE") {
            self.run_mode = mode
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RUN_MODE: {e}"))?;
        }
        if let Ok(secs) = std::env::var("SCRAPE_INTERVAL_SECS") {
            self.interval_secs = secs
                .parse()
                .with_context(|| format!("Invalid SCRAPE_INTERVAL_SECS: {secs}"))?;
        }
        if let Ok(arn) = std::env::var("ASSUME_ROLE_ARN") {
            if !arn.trim().is_empty() {
                self.assume_role_arn = Some(arn);
            }
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.remote_write_url.trim().is_empty() {
            anyhow::bail!("remote_write_url is required (or set PROMETHEUS_REMOTE_WRITE_URL)");
        }
        if self.region.trim().is_empty() {
            anyhow::bail!("region is required (or set AWS_REGION)");
        }
        if self.interval_secs == 0 {
            anyhow::bail!("interval_secs must be positive");
        }
        if self.account_id.trim().is_empty() {
            tracing::warn!("account_id is empty; the accountId label will be blank");
        }
        Ok(())
    }
}
