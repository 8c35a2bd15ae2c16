//! Signed delivery of remote-write batches
//!
//! Serializes with protobuf, compresses with raw snappy blocks and signs
//! with SigV4 against the managed prometheus service. Each send is
//! independent and best-effort; a rejected batch is dropped with its
//! response body kept for diagnostics.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dbmon_aws::credentials::CredentialsProvider;
use dbmon_aws::sigv4;
use prost::Message;
use reqwest::Url;

use crate::encode::RemoteWriteBatch;
use crate::error::{RemoteWriteError, Result};
use crate::prompb::WriteRequest;

/// Signing service name for managed prometheus workspaces
const SIGNING_SERVICE: &str = "aps";

const CONTENT_TYPE: &str = "application/x-protobuf";
const CONTENT_ENCODING: &str = "snappy";
const REMOTE_WRITE_VERSION: &str = "0.1.0";

/// HTTP client for one remote-write destination
pub struct RemoteWriteClient {
    endpoint: Url,
    region: String,
    credentials: Arc<CredentialsProvider>,
    client: reqwest::Client,
}

impl RemoteWriteClient {
    /// Build a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteWriteError::Config`] when the endpoint is empty or
    /// not a valid URL. This is checked once at startup so a misconfigured
    /// destination never gets as far as a cycle.
    pub fn new(
        endpoint: &str,
        region: &str,
        credentials: Arc<CredentialsProvider>,
    ) -> Result<Self> {
        if endpoint.trim().is_empty() {
            return Err(RemoteWriteError::Config(
                "remote write URL is not configured".to_string(),
            ));
        }
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RemoteWriteError::Config(format!("invalid remote write URL: {e}")))?;

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            endpoint,
            region: region.to_string(),
            credentials,
            client,
        })
    }

    /// Serialize, compress, sign and POST one batch. An empty batch is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on compression, signing, transport failure, or a
    /// non-success response status.
    pub async fn send(&self, batch: &RemoteWriteBatch) -> Result<()> {
        if batch.is_empty() {
            tracing::debug!("Empty batch, nothing to send");
            return Ok(());
        }
        let series = batch.len();

        let request = WriteRequest {
            timeseries: batch.timeseries.clone(),
        };
        let serialized = request.encode_to_vec();
        let compressed = snap::raw::Encoder::new().compress_vec(&serialized)?;

        let credentials = self.credentials.credentials().await?;
        let signed = sigv4::sign(
            &credentials,
            &self.region,
            SIGNING_SERVICE,
            "POST",
            &self.endpoint,
            &[],
            &compressed,
            Utc::now(),
        )?;

        let mut http_request = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", CONTENT_TYPE)
            .header("Content-Encoding", CONTENT_ENCODING)
            .header("X-Prometheus-Remote-Write-Version", REMOTE_WRITE_VERSION)
            .header("X-Amz-Date", &signed.amz_date)
            .header("Authorization", &signed.authorization);
        if let Some(token) = &signed.security_token {
            http_request = http_request.header("X-Amz-Security-Token", token);
        }

        let response = http_request.body(compressed).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteWriteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("Remote write accepted: {} series", series);
        Ok(())
    }
}
