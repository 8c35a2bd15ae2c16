use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Job label value attached to every outgoing series.
pub const DEFAULT_JOB: &str = "database-collector";

/// Database engine kind of a discovered credential.
///
/// # Examples
///
/// ```
/// use dbmon_common::types::EngineKind;
///
/// let kind: EngineKind = "mysql".parse().unwrap();
/// assert_eq!(kind, EngineKind::Mysql);
/// assert_eq!(kind.to_string(), "mysql");
/// // Managed stores report enterprise Oracle under its own name.
/// assert_eq!("oracle-ee".parse::<EngineKind>().unwrap(), EngineKind::Oracle);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Mysql,
    #[serde(alias = "postgresql")]
    Postgres,
    #[serde(alias = "oracle-ee")]
    Oracle,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Mysql => write!(f, "mysql"),
            EngineKind::Postgres => write!(f, "postgres"),
            EngineKind::Oracle => write!(f, "oracle"),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(EngineKind::Mysql),
            "postgres" | "postgresql" => Ok(EngineKind::Postgres),
            "oracle" | "oracle-ee" => Ok(EngineKind::Oracle),
            _ => Err(format!("unknown engine kind: {s}")),
        }
    }
}

/// Connection parameters carried in a credential payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Database to connect to; MySQL probes connect without one.
    #[serde(default)]
    pub dbname: Option<String>,
}

/// Secret stores are inconsistent about the port type: managed records carry
/// a number, hand-created ones often a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Num(u64),
    Text(String),
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match PortValue::deserialize(deserializer)? {
        PortValue::Num(n) => u16::try_from(n)
            .map_err(|_| serde::de::Error::custom(format!("port {n} out of range"))),
        PortValue::Text(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| serde::de::Error::custom(format!("port {s:?} is not a number"))),
    }
}

/// Error produced when a fetched secret payload cannot become a
/// [`CredentialRecord`].
#[derive(Debug, Clone, Error)]
pub enum CredentialParseError {
    #[error("credential {id} has malformed payload: {reason}")]
    Malformed { id: String, reason: String },
    #[error("credential {id} uses unsupported engine {engine:?}")]
    UnsupportedEngine { id: String, engine: String },
}

#[derive(Deserialize)]
struct SecretPayload {
    engine: String,
    host: String,
    #[serde(deserialize_with = "deserialize_port")]
    port: u16,
    username: String,
    password: String,
    #[serde(default)]
    dbname: Option<String>,
}

/// One discovered credential, validated into typed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: String,
    pub engine: EngineKind,
    pub connection: ConnectionParams,
}

impl CredentialRecord {
    /// Parses the raw secret JSON (`engine`, `host`, `port`, `username`,
    /// `password`, optional `dbname`) into a typed record.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialParseError::Malformed`] when a required field is
    /// missing or the wrong shape, and
    /// [`CredentialParseError::UnsupportedEngine`] when the engine string is
    /// not a known kind.
    pub fn from_secret_json(id: &str, payload: &str) -> Result<Self, CredentialParseError> {
        let raw: SecretPayload =
            serde_json::from_str(payload).map_err(|e| CredentialParseError::Malformed {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        let engine = raw
            .engine
            .parse::<EngineKind>()
            .map_err(|_| CredentialParseError::UnsupportedEngine {
                id: id.to_string(),
                engine: raw.engine.clone(),
            })?;

        if raw.host.trim().is_empty() {
            return Err(CredentialParseError::Malformed {
                id: id.to_string(),
                reason: "host is empty".to_string(),
            });
        }
        if raw.username.trim().is_empty() {
            return Err(CredentialParseError::Malformed {
                id: id.to_string(),
                reason: "username is empty".to_string(),
            });
        }

        Ok(Self {
            id: id.to_string(),
            engine,
            connection: ConnectionParams {
                host: raw.host,
                port: raw.port,
                username: raw.username,
                password: raw.password,
                dbname: raw.dbname,
            },
        })
    }
}

/// Fixed labels attached to every outgoing series regardless of source, so a
/// consumer can attribute any sample to its origin instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentLabels {
    pub identifier: String,
    pub job: String,
    pub region: String,
    pub account_id: String,
    pub engine: String,
}

impl EnrichmentLabels {
    /// Label pairs in wire spelling. `accountId` keeps the casing existing
    /// dashboards query by.
    pub fn pairs(&self) -> [(&'static str, &str); 5] {
        [
            ("identifier", self.identifier.as_str()),
            ("job", self.job.as_str()),
            ("region", self.region.as_str()),
            ("accountId", self.account_id.as_str()),
            ("engine", self.engine.as_str()),
        ]
    }
}

/// Instance identifier derived from a connection host: everything up to the
/// first dot.
///
/// # Examples
///
/// ```
/// use dbmon_common::types::instance_identifier;
///
/// assert_eq!(
///     instance_identifier("orders-db.cluster-abc123.us-west-2.rds.amazonaws.com"),
///     "orders-db"
/// );
/// assert_eq!(instance_identifier("localhost"), "localhost");
/// ```
pub fn instance_identifier(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}
