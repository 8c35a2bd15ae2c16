use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use dbmon_common::types::CredentialRecord;

use crate::credentials::CredentialsProvider;
use crate::error::{AwsError, Result};
use crate::sigv4;
use crate::CredentialSource;

/// Tag key marking a secret as eligible for collection.
pub const COLLECTION_TAG_KEY: &str = "database-collector:enabled";

const TARGET_LIST_SECRETS: &str = "secretsmanager.ListSecrets";
const TARGET_GET_SECRET_VALUE: &str = "secretsmanager.GetSecretValue";
const AMZ_JSON: &str = "application/x-amz-json-1.1";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct ListSecretsResponse {
    #[serde(rename = "SecretList", default)]
    secret_list: Vec<SecretEntry>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretEntry {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct GetSecretValueResponse {
    #[serde(rename = "SecretString")]
    secret_string: Option<String>,
}

/// Signed JSON client for the Secrets Manager API.
pub struct SecretsManagerClient {
    region: String,
    credentials: Arc<CredentialsProvider>,
    client: reqwest::Client,
}

impl SecretsManagerClient {
    pub fn new(region: &str, credentials: Arc<CredentialsProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            region: region.to_string(),
            credentials,
            client,
        })
    }

    async fn call(&self, target: &str, payload: String) -> Result<String> {
        let endpoint = format!("https://secretsmanager.{}.amazonaws.com/", self.region);
        let url: reqwest::Url = endpoint
            .parse()
            .map_err(|_| AwsError::ConfigError(format!("invalid endpoint {endpoint}")))?;

        let credentials = self.credentials.credentials().await?;
        let signed = sigv4::sign(
            &credentials,
            &self.region,
            "secretsmanager",
            "POST",
            &url,
            &[("content-type", AMZ_JSON), ("x-amz-target", target)],
            payload.as_bytes(),
            Utc::now(),
        )?;

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", AMZ_JSON)
            .header("X-Amz-Target", target)
            .header("X-Amz-Date", &signed.amz_date)
            .header("Authorization", &signed.authorization);
        if let Some(token) = &signed.security_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request.body(payload).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AwsError::HttpError {
                service: "secretsmanager".to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Lists the names of secrets carrying `tag_key`, following NextToken
    /// pagination.
    pub async fn list_tagged_secrets(&self, tag_key: &str) -> Result<Vec<String>> {
        let mut all = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut payload = serde_json::json!({
                "MaxResults": PAGE_SIZE,
                "Filters": [{"Key": "tag-key", "Values": [tag_key]}],
            });
            if let Some(token) = &next_token {
                payload["NextToken"] = serde_json::Value::String(token.clone());
            }

            let body = self.call(TARGET_LIST_SECRETS, payload.to_string()).await?;
            let page: ListSecretsResponse = serde_json::from_str(&body)?;
            all.extend(page.secret_list.into_iter().map(|entry| entry.name));

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(count = all.len(), tag = tag_key, "Listed eligible secrets");
        Ok(all)
    }

    /// Fetches the string payload of one secret.
    pub async fn get_secret_string(&self, secret_id: &str) -> Result<String> {
        let payload = serde_json::json!({ "SecretId": secret_id }).to_string();
        let body = self.call(TARGET_GET_SECRET_VALUE, payload).await?;
        let value: GetSecretValueResponse = serde_json::from_str(&body)?;
        value
            .secret_string
            .ok_or_else(|| AwsError::ApiResponseError {
                service: "secretsmanager".to_string(),
                message: format!("secret {secret_id} has no SecretString"),
            })
    }
}

/// Credential store backed by tag-filtered Secrets Manager entries.
pub struct SecretsManagerSource {
    client: SecretsManagerClient,
    tag_key: String,
}

impl SecretsManagerSource {
    pub fn new(client: SecretsManagerClient, tag_key: impl Into<String>) -> Self {
        Self {
            client,
            tag_key: tag_key.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for SecretsManagerSource {
    async fn list_credential_ids(&self) -> Result<Vec<String>> {
        self.client.list_tagged_secrets(&self.tag_key).await
    }

    async fn fetch_credential(&self, id: &str) -> Result<CredentialRecord> {
        let payload = self.client.get_secret_string(id).await?;
        Ok(CredentialRecord::from_secret_json(id, &payload)?)
    }
}
