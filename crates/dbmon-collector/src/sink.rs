//! Scrape pipeline wired to the signed remote-write client

use async_trait::async_trait;
use dbmon_common::types::EnrichmentLabels;
use dbmon_remote::RemoteWriteClient;
use dbmon_scrape::ScrapeSink;
use prometheus::proto::MetricFamily;

pub struct RemoteWriteSink {
    client: RemoteWriteClient,
}

impl RemoteWriteSink {
    pub fn new(client: RemoteWriteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ScrapeSink for RemoteWriteSink {
    async fn ship(
        &self,
        families: &[MetricFamily],
        enrichment: &EnrichmentLabels,
    ) -> anyhow::Result<()> {
        let batch = dbmon_remote::encode(families, enrichment);
        if batch.skipped > 0 {
            tracing::warn!(
                "Skipped {} metrics while encoding batch for {}",
                batch.skipped,
                enrichment.identifier
            );
        }
        self.client.send(&batch).await?;
        Ok(())
    }
}
