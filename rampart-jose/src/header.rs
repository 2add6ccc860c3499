//! Protected-header parsing and `kid` extraction.
//!
//! Only the first (protected) header of a compact serialization is ever
//! consulted; the service uses the embedded `kid` to select the right
//! material-key version before any cryptography runs.

use crate::alg::Algorithm;
use crate::b64;
use crate::error::JoseError;
use crate::jwk::Jwk;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// The protected header of a JWE or JWS compact serialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Header {
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Caller context, bound into the associated data (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctx: Option<String>,
    /// Ephemeral public key (ECDH-ES family).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epk: Option<Jwk>,
    /// Key-wrap nonce and tag (AxGCMKW family).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Header {
    pub(crate) fn new(alg: &str) -> Self {
        Header {
            alg: alg.to_string(),
            enc: None,
            kid: None,
            ctx: None,
            epk: None,
            iv: None,
            tag: None,
        }
    }

    pub(crate) fn kid_uuid(&self) -> Result<Uuid, JoseError> {
        let kid = self.kid.as_deref().ok_or(JoseError::InvalidHeader)?;
        Uuid::from_str(kid).map_err(|_| JoseError::InvalidHeader)
    }
}

/// Decode the first dot-separated segment of a compact serialization.
pub(crate) fn parse_protected(message: &[u8]) -> Result<Header, JoseError> {
    let text = std::str::from_utf8(message).map_err(|_| JoseError::InvalidHeader)?;
    let first = text.split('.').next().ok_or(JoseError::InvalidHeader)?;
    let json = b64::decode(first).map_err(|_| JoseError::InvalidHeader)?;
    serde_json::from_slice(&json).map_err(|_| JoseError::InvalidHeader)
}

/// Read the `kid` from a JWE's protected header.
pub fn extract_kid(jwe: &[u8]) -> Result<Uuid, JoseError> {
    parse_protected(jwe)?.kid_uuid()
}

/// Read the `kid` and signature algorithm from a JWS's protected header.
pub fn extract_kid_alg(jws: &[u8]) -> Result<(Uuid, Algorithm), JoseError> {
    let header = parse_protected(jws)?;
    let kid = header.kid_uuid()?;
    let alg: Algorithm = header.alg.parse().map_err(|_| JoseError::InvalidHeader)?;
    Ok((kid, alg))
}
