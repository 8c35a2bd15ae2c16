use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::credentials::AwsCredentials;
use crate::error::{AwsError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Headers produced by signing one request. `security_token` is present when
/// the signing credentials are temporary and must travel with the request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub security_token: Option<String>,
}

/// AWS Signature Version 4 signing algorithm.
///
/// `extra_headers` are request headers to fold into the signature as
/// `(name, value)` pairs; `host` and `x-amz-date` are always signed, and
/// `x-amz-security-token` joins them when the credentials carry one.
pub fn sign(
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    method: &str,
    url: &Url,
    extra_headers: &[(&str, &str)],
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<SignedHeaders> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let host = match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{h}:{p}"),
        (Some(h), None) => h.to_string(),
        (None, _) => return Err(AwsError::ConfigError("request URL has no host".to_string())),
    };

    // Step 1: Build canonical request
    let canonical_uri = if url.path().is_empty() { "/" } else { url.path() };
    let canonical_querystring = canonical_query(url);

    let mut headers: Vec<(String, String)> = vec![
        ("host".to_string(), host),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    for (name, value) in extra_headers {
        headers.push((name.to_lowercase(), value.trim().to_string()));
    }
    if let Some(token) = credentials.session_token.as_deref() {
        headers.push(("x-amz-security-token".to_string(), token.to_string()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let hashed_payload = format!("{:x}", Sha256::digest(payload));
    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{canonical_querystring}\n{canonical_headers}\n{signed_headers}\n{hashed_payload}"
    );
    let hashed_canonical_request = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

    // Step 2: Build string to sign
    let credential_scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{hashed_canonical_request}"
    );

    // Step 3: Calculate signature
    let secret_date = hmac_sha256(
        format!("AWS4{}", credentials.secret_access_key).as_bytes(),
        date.as_bytes(),
    )?;
    let secret_region = hmac_sha256(&secret_date, region.as_bytes())?;
    let secret_service = hmac_sha256(&secret_region, service.as_bytes())?;
    let secret_signing = hmac_sha256(&secret_service, b"aws4_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes())?);

    // Step 4: Build authorization header
    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, credential_scope, signed_headers, signature
    );

    Ok(SignedHeaders {
        authorization,
        amz_date,
        security_token: credentials.session_token.clone(),
    })
}

/// Query pairs sorted by their encoded form, as the signature requires.
fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 percent-encoding with the unreserved set AWS expects.
pub(crate) fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// HMAC-SHA256 helper function
fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| AwsError::HmacError(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
