//! Proof-token encoding and HMAC verification.
//!
//! Tokens use the compact form `base64url(header).base64url(claims).base64url(mac)`
//! with no padding:
//!
//! - header: `{"alg":"HS256","typ":"JWT","kid":<key id>}`
//! - claims: `{"iss":<application id>,"sub":<key id>,"exp":<unix seconds>}`
//! - mac: HMAC-SHA256 over `header_b64 "." claims_b64`, keyed with the key's secret
//!
//! The `kid` header is an untrusted hint. It only selects which secret to
//! verify with; the caller must still check the decoded claims against the
//! authoritative key record.

use crate::error::{LicenseError, LicenseResult};
use crate::secret::Secret;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use keyserv_types::{ApplicationId, KeyId};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The only accepted signature algorithm.
pub const ALGORITHM: &str = "HS256";

/// Token type written into the header.
pub const TOKEN_TYPE: &str = "JWT";

/// Resolves the secret for a hinted key id.
pub trait SecretLookup {
    /// Returns the secret to verify with, or an error if none can be found.
    fn lookup_secret(&self, hint: KeyId) -> LicenseResult<Secret>;
}

impl<F> SecretLookup for F
where
    F: Fn(KeyId) -> LicenseResult<Secret>,
{
    fn lookup_secret(&self, hint: KeyId) -> LicenseResult<Secret> {
        self(hint)
    }
}

/// The signed claims of a proof token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofClaims {
    /// Application the presenter claims the key belongs to.
    #[serde(rename = "iss")]
    pub application_id: ApplicationId,
    /// Key being claimed.
    #[serde(rename = "sub")]
    pub key_id: KeyId,
    /// Expiry as seconds since the Unix epoch.
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

impl ProofClaims {
    #[must_use]
    pub fn new(application_id: ApplicationId, key_id: KeyId, expires_at: DateTime<Utc>) -> Self {
        Self {
            application_id,
            key_id,
            expires_at: expires_at.timestamp(),
        }
    }

    /// Returns the expiry as a UTC timestamp, if representable.
    #[must_use]
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }

    /// Returns true if the token is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.expires_at
    }
}

#[derive(Serialize)]
struct HeaderOut<'a> {
    alg: &'a str,
    typ: &'a str,
    kid: KeyId,
}

#[derive(Deserialize)]
struct HeaderIn {
    alg: String,
    #[serde(default)]
    kid: Option<serde_json::Value>,
}

/// Encodes and signs `claims`, hinting at `claims.key_id`.
///
/// This is the client-side operation; a client holding its key's secret
/// mints a fresh token for each activation or validation request.
pub fn encode(claims: &ProofClaims, secret: &Secret) -> LicenseResult<String> {
    encode_with_hint(claims.key_id, claims, secret)
}

/// Encodes and signs `claims` with an explicit `kid` header.
pub fn encode_with_hint(hint: KeyId, claims: &ProofClaims, secret: &Secret) -> LicenseResult<String> {
    let header = HeaderOut {
        alg: ALGORITHM,
        typ: TOKEN_TYPE,
        kid: hint,
    };
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = new_mac(secret)?;
    mac.update(signing_input.as_bytes());
    let mac_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{mac_b64}"))
}

/// Decodes and verifies a proof token.
///
/// Failures are reported in this order:
/// 1. [`LicenseError::MalformedToken`] if the token cannot be parsed, uses
///    another algorithm, or has a missing or non-integer `kid`
/// 2. [`LicenseError::LookupFailed`] if `lookup` cannot resolve the hint
/// 3. [`LicenseError::SignatureInvalid`] if the MAC does not match
/// 4. [`LicenseError::Expired`] if `now` is at or past `exp`
pub fn decode<L: SecretLookup + ?Sized>(
    token: &str,
    lookup: &L,
    now: DateTime<Utc>,
) -> LicenseResult<ProofClaims> {
    let token = token.trim();
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(LicenseError::MalformedToken(
            "token must have exactly three dot-separated parts".to_string(),
        ));
    }
    let (header_b64, claims_b64, mac_b64) = (parts[0], parts[1], parts[2]);

    let header: HeaderIn = serde_json::from_slice(&decode_part(header_b64, "header")?)
        .map_err(|e| LicenseError::MalformedToken(format!("invalid header JSON: {e}")))?;
    if header.alg != ALGORITHM {
        return Err(LicenseError::MalformedToken(format!(
            "unsupported algorithm {}",
            header.alg
        )));
    }
    let hint = key_hint(header.kid)?;

    let claims: ProofClaims = serde_json::from_slice(&decode_part(claims_b64, "claims")?)
        .map_err(|e| LicenseError::MalformedToken(format!("invalid claims JSON: {e}")))?;
    let mac_bytes = decode_part(mac_b64, "signature")?;

    let secret = lookup
        .lookup_secret(hint)
        .map_err(|e| LicenseError::LookupFailed(e.to_string()))?;

    let mut mac = new_mac(&secret).map_err(|e| LicenseError::LookupFailed(e.to_string()))?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(claims_b64.as_bytes());
    mac.verify_slice(&mac_bytes)
        .map_err(|_| LicenseError::SignatureInvalid)?;

    if claims.is_expired_at(now) {
        return Err(LicenseError::Expired(claims.expires_at));
    }

    Ok(claims)
}

fn decode_part(part: &str, name: &str) -> LicenseResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| LicenseError::MalformedToken(format!("invalid {name} base64: {e}")))
}

fn key_hint(kid: Option<serde_json::Value>) -> LicenseResult<KeyId> {
    match kid {
        None => Err(LicenseError::MalformedToken("kid not in header".to_string())),
        Some(serde_json::Value::Number(n)) => n.as_u64().map(KeyId::new).ok_or_else(|| {
            LicenseError::MalformedToken(format!("kid header is not a key id: {n}"))
        }),
        Some(other) => Err(LicenseError::MalformedToken(format!(
            "kid header has wrong type: {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn new_mac(secret: &Secret) -> LicenseResult<HmacSha256> {
    // HMAC accepts keys of any length; only an empty secret is refused.
    if secret.is_empty() {
        return Err(LicenseError::InvalidSecret("secret is empty".to_string()));
    }
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| LicenseError::InvalidSecret(e.to_string()))
}
