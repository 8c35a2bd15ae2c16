use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::RwLock;

use crate::error::{AwsError, Result};
use crate::sigv4;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Refresh assumed-role credentials this long before they expire.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Static AWS credentials used to sign requests.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN` from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError::MissingCredentials`] naming the first variable
    /// that is absent.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| AwsError::MissingCredentials("AWS_ACCESS_KEY_ID".to_string()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| AwsError::MissingCredentials("AWS_SECRET_ACCESS_KEY".to_string()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

struct AssumedRole {
    credentials: AwsCredentials,
    expires_at: DateTime<Utc>,
}

/// Supplies signing credentials: the base static pair, or temporary
/// credentials from STS AssumeRole when a cross-account role is configured.
pub struct CredentialsProvider {
    base: AwsCredentials,
    region: String,
    assume_role_arn: Option<String>,
    session_name: String,
    client: reqwest::Client,
    cached: RwLock<Option<AssumedRole>>,
}

impl CredentialsProvider {
    pub fn new(
        base: AwsCredentials,
        region: &str,
        assume_role_arn: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base,
            region: region.to_string(),
            assume_role_arn,
            session_name: "database-collector".to_string(),
            client,
            cached: RwLock::new(None),
        })
    }

    /// Current signing credentials. With a role configured, assumed
    /// credentials are cached and refreshed shortly before expiry.
    pub async fn credentials(&self) -> Result<AwsCredentials> {
        let Some(role_arn) = self.assume_role_arn.clone() else {
            return Ok(self.base.clone());
        };

        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.expires_at - Utc::now() > Duration::seconds(EXPIRY_SKEW_SECS) {
                    return Ok(entry.credentials.clone());
                }
            }
        }

        let assumed = self.assume_role(&role_arn).await?;
        let credentials = assumed.credentials.clone();
        *self.cached.write().await = Some(assumed);
        tracing::debug!(role = %role_arn, "Refreshed assumed-role credentials");
        Ok(credentials)
    }

    async fn assume_role(&self, role_arn: &str) -> Result<AssumedRole> {
        let endpoint = format!("https://sts.{}.amazonaws.com/", self.region);
        let url: reqwest::Url = endpoint
            .parse()
            .map_err(|_| AwsError::ConfigError(format!("invalid STS endpoint {endpoint}")))?;

        let form = format!(
            "Action=AssumeRole&Version=2011-06-15&RoleArn={}&RoleSessionName={}&DurationSeconds=3600",
            sigv4::uri_encode(role_arn),
            sigv4::uri_encode(&self.session_name),
        );

        let signed = sigv4::sign(
            &self.base,
            &self.region,
            "sts",
            "POST",
            &url,
            &[("content-type", FORM_CONTENT_TYPE)],
            form.as_bytes(),
            Utc::now(),
        )?;

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", FORM_CONTENT_TYPE)
            .header("Accept", "application/json")
            .header("X-Amz-Date", &signed.amz_date)
            .header("Authorization", &signed.authorization);
        if let Some(token) = &signed.security_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request.body(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AwsError::HttpError {
                service: "sts".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = serde_json::from_str(&body)?;
        let credentials = json
            .pointer("/AssumeRoleResponse/AssumeRoleResult/Credentials")
            .ok_or_else(|| AwsError::ApiResponseError {
                service: "sts".to_string(),
                message: "missing Credentials in AssumeRole response".to_string(),
            })?;

        Ok(AssumedRole {
            credentials: AwsCredentials {
                access_key_id: string_field(credentials, "AccessKeyId")?,
                secret_access_key: string_field(credentials, "SecretAccessKey")?,
                session_token: Some(string_field(credentials, "SessionToken")?),
            },
            expires_at: parse_expiration(credentials.get("Expiration"))?,
        })
    }
}

fn string_field(value: &serde_json::Value, name: &str) -> Result<String> {
    value
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| AwsError::ApiResponseError {
            service: "sts".to_string(),
            message: format!("missing {name} in AssumeRole credentials"),
        })
}

/// STS reports Expiration as epoch seconds in the JSON protocol, but ISO
/// timestamps show up in older serializations.
fn parse_expiration(value: Option<&serde_json::Value>) -> Result<DateTime<Utc>> {
    let invalid = |message: String| AwsError::ApiResponseError {
        service: "sts".to_string(),
        message,
    };
    let value = value
        .ok_or_else(|| invalid("missing Expiration in AssumeRole credentials".to_string()))?;

    if let Some(epoch) = value.as_f64() {
        return Utc
            .timestamp_opt(epoch as i64, 0)
            .single()
            .ok_or_else(|| invalid(format!("Expiration {epoch} out of range")));
    }
    if let Some(text) = value.as_str() {
        return DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| invalid(format!("invalid Expiration {text:?}: {e}")));
    }
    Err(invalid("Expiration is neither a number nor a string".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_credentials() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        }
    }

    #[tokio::test]
    async fn should_return_base_credentials_when_no_role_configured() {
        let provider = CredentialsProvider::new(static_credentials(), "us-west-2", None).unwrap();
        let credentials = provider.credentials().await.unwrap();
        assert_eq!(credentials.access_key_id, "AKIDEXAMPLE");
        assert!(credentials.session_token.is_none());
    }

    #[test]
    fn should_parse_epoch_expiration() {
        let value = serde_json::json!(1_735_689_600.0);
        let parsed = parse_expiration(Some(&value)).unwrap();
        assert_eq!(parsed.timestamp(), 1_735_689_600);
    }

    #[test]
    fn should_parse_iso_expiration() {
        let value = serde_json::json!("2025-01-01T00:00:00Z");
        let parsed = parse_expiration(Some(&value)).unwrap();
        assert_eq!(parsed.timestamp(), 1_735_689_600);
    }

    #[test]
    fn should_reject_malformed_expiration() {
        let value = serde_json::json!({"weird": true});
        assert!(parse_expiration(Some(&value)).is_err());
        assert!(parse_expiration(None).is_err());
    }
}
