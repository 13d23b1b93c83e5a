//! SigV4 presigned authentication tokens
//!
//! Cloud IAM database authentication replaces the password with a signed,
//! time-limited token: a presigned `host:port/?Action=connect&DBUser=...` URL
//! scoped to the `rds-db` service. Token generation is the expensive, networked
//! step of an IAM resolution (the credential lookup may hit an instance
//! metadata service), which is exactly what the reconfiguration predicate is
//! meant to gate.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Tokens are valid for 15 minutes, matching the service-side limit.
const TOKEN_EXPIRY_SECONDS: u32 = 900;

const SIGNING_SERVICE: &str = "rds-db";
const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// An access key set resolved from a credential source.
#[derive(Clone)]
pub struct AwsCredentials {
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Session token, present for temporary credentials
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// An opaque source of signing credentials.
///
/// Resolution may involve network calls and may return different credentials
/// over time (assumed roles, instance profiles). Errors surface as
/// [`Error::Resolution`].
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Resolve the current credentials.
    async fn credentials(&self) -> Result<AwsCredentials>;
}

/// The ambient environment-derived credential chain:
/// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and optionally
/// `AWS_SESSION_TOKEN`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialsProvider;

#[async_trait]
impl CredentialsProvider for EnvCredentialsProvider {
    async fn credentials(&self) -> Result<AwsCredentials> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            Error::Resolution("AWS_ACCESS_KEY_ID is not set in the environment".into())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            Error::Resolution("AWS_SECRET_ACCESS_KEY is not set in the environment".into())
        })?;
        Ok(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

/// Build a presigned IAM authentication token for `address` (`host:port`).
///
/// The token is the presigned URL minus its scheme, as database drivers expect
/// it in the password field. Deterministic for a fixed signing time, which the
/// tests rely on.
pub fn build_auth_token(
    credentials: &AwsCredentials,
    address: &str,
    region: &str,
    username: &str,
    at: DateTime<Utc>,
) -> String {
    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date = at.format("%Y%m%d").to_string();
    let scope = format!("{date}/{region}/{SIGNING_SERVICE}/aws4_request");
    let credential = format!("{}/{}", credentials.access_key_id, scope);

    let mut query: Vec<(String, String)> = vec![
        ("Action".into(), "connect".into()),
        ("DBUser".into(), username.into()),
        ("X-Amz-Algorithm".into(), SIGNING_ALGORITHM.into()),
        ("X-Amz-Credential".into(), credential),
        ("X-Amz-Date".into(), amz_date.clone()),
        ("X-Amz-Expires".into(), TOKEN_EXPIRY_SECONDS.to_string()),
        ("X-Amz-SignedHeaders".into(), "host".into()),
    ];
    if let Some(token) = &credentials.session_token {
        query.push(("X-Amz-Security-Token".into(), token.clone()));
    }
    // Canonical query string: sorted by encoded key
    query.sort_by(|a, b| a.0.cmp(&b.0));
    let canonical_query = query
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_request = format!(
        "GET\n/\n{canonical_query}\nhost:{address}\n\nhost\n{}",
        hex_encode(&Sha256::digest(b""))
    );

    let string_to_sign = format!(
        "{SIGNING_ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex_encode(&Sha256::digest(canonical_request.as_bytes()))
    );

    let signing_key = derive_signing_key(&credentials.secret_access_key, &date, region);
    let signature = hex_encode(&hmac(&signing_key, string_to_sign.as_bytes()));

    format!("{address}/?{canonical_query}&X-Amz-Signature={signature}")
}

/// HMAC key derivation chain: AWS4+secret -> date -> region -> service -> aws4_request.
fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, SIGNING_SERVICE.as_bytes());
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key should be valid");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Percent-encode per the SigV4 rules: unreserved characters pass through,
/// everything else becomes uppercase `%XX`.
fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => {
                out.push('%');
                out.push_str(&format!("{other:02X}"));
            }
        }
    }
    out
}
