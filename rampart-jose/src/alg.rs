//! Algorithm catalogue and classification.
//!
//! Every key handle is bound to exactly one [`Algorithm`]: either a JWE pair
//! (content encryption + key management) or a JWS signature algorithm. The
//! rendered form of a JWE pair is `ENC+ALG` (e.g. `A256GCM+dir`); JWS
//! algorithms render as their JOSE name (e.g. `ES256`).

use crate::error::JoseError;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Content encryption ("enc" header)
// ---------------------------------------------------------------------------

/// JWE content-encryption algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncAlg {
    A128CbcHs256,
    A192CbcHs384,
    A256CbcHs512,
    A128Gcm,
    A192Gcm,
    A256Gcm,
}

impl EncAlg {
    pub const ALL: [EncAlg; 6] = [
        EncAlg::A128CbcHs256,
        EncAlg::A192CbcHs384,
        EncAlg::A256CbcHs512,
        EncAlg::A128Gcm,
        EncAlg::A192Gcm,
        EncAlg::A256Gcm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EncAlg::A128CbcHs256 => "A128CBC-HS256",
            EncAlg::A192CbcHs384 => "A192CBC-HS384",
            EncAlg::A256CbcHs512 => "A256CBC-HS512",
            EncAlg::A128Gcm => "A128GCM",
            EncAlg::A192Gcm => "A192GCM",
            EncAlg::A256Gcm => "A256GCM",
        }
    }

    /// Content-encryption key length in bytes.
    ///
    /// The CBC-HS composites consume a double-length key: one half for the
    /// HMAC, one half for AES-CBC.
    pub fn key_len(&self) -> usize {
        match self {
            EncAlg::A128CbcHs256 => 32,
            EncAlg::A192CbcHs384 => 48,
            EncAlg::A256CbcHs512 => 64,
            EncAlg::A128Gcm => 16,
            EncAlg::A192Gcm => 24,
            EncAlg::A256Gcm => 32,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Key management ("alg" header of a JWE)
// ---------------------------------------------------------------------------

/// JWE key-management algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyMgmtAlg {
    Dir,
    A128Kw,
    A192Kw,
    A256Kw,
    A128GcmKw,
    A192GcmKw,
    A256GcmKw,
    RsaOaep,
    RsaOaep256,
    EcdhEs,
    EcdhEsA128Kw,
    EcdhEsA192Kw,
    EcdhEsA256Kw,
}

impl KeyMgmtAlg {
    pub const ALL: [KeyMgmtAlg; 13] = [
        KeyMgmtAlg::Dir,
        KeyMgmtAlg::A128Kw,
        KeyMgmtAlg::A192Kw,
        KeyMgmtAlg::A256Kw,
        KeyMgmtAlg::A128GcmKw,
        KeyMgmtAlg::A192GcmKw,
        KeyMgmtAlg::A256GcmKw,
        KeyMgmtAlg::RsaOaep,
        KeyMgmtAlg::RsaOaep256,
        KeyMgmtAlg::EcdhEs,
        KeyMgmtAlg::EcdhEsA128Kw,
        KeyMgmtAlg::EcdhEsA192Kw,
        KeyMgmtAlg::EcdhEsA256Kw,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KeyMgmtAlg::Dir => "dir",
            KeyMgmtAlg::A128Kw => "A128KW",
            KeyMgmtAlg::A192Kw => "A192KW",
            KeyMgmtAlg::A256Kw => "A256KW",
            KeyMgmtAlg::A128GcmKw => "A128GCMKW",
            KeyMgmtAlg::A192GcmKw => "A192GCMKW",
            KeyMgmtAlg::A256GcmKw => "A256GCMKW",
            KeyMgmtAlg::RsaOaep => "RSA-OAEP",
            KeyMgmtAlg::RsaOaep256 => "RSA-OAEP-256",
            KeyMgmtAlg::EcdhEs => "ECDH-ES",
            KeyMgmtAlg::EcdhEsA128Kw => "ECDH-ES+A128KW",
            KeyMgmtAlg::EcdhEsA192Kw => "ECDH-ES+A192KW",
            KeyMgmtAlg::EcdhEsA256Kw => "ECDH-ES+A256KW",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }

    /// The key-wrap length in bytes for the AES-KW / AES-GCMKW / ECDH+KW
    /// family; `None` for algorithms that do not wrap with AES.
    pub fn wrap_key_len(&self) -> Option<usize> {
        match self {
            KeyMgmtAlg::A128Kw | KeyMgmtAlg::A128GcmKw | KeyMgmtAlg::EcdhEsA128Kw => Some(16),
            KeyMgmtAlg::A192Kw | KeyMgmtAlg::A192GcmKw | KeyMgmtAlg::EcdhEsA192Kw => Some(24),
            KeyMgmtAlg::A256Kw | KeyMgmtAlg::A256GcmKw | KeyMgmtAlg::EcdhEsA256Kw => Some(32),
            _ => None,
        }
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(
            self,
            KeyMgmtAlg::Dir
                | KeyMgmtAlg::A128Kw
                | KeyMgmtAlg::A192Kw
                | KeyMgmtAlg::A256Kw
                | KeyMgmtAlg::A128GcmKw
                | KeyMgmtAlg::A192GcmKw
                | KeyMgmtAlg::A256GcmKw
        )
    }

    pub fn is_ecdh(&self) -> bool {
        matches!(
            self,
            KeyMgmtAlg::EcdhEs
                | KeyMgmtAlg::EcdhEsA128Kw
                | KeyMgmtAlg::EcdhEsA192Kw
                | KeyMgmtAlg::EcdhEsA256Kw
        )
    }
}

// ---------------------------------------------------------------------------
// Signatures ("alg" header of a JWS)
// ---------------------------------------------------------------------------

/// JWS signature algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SigAlg {
    Hs256,
    Hs384,
    Hs512,
    Rs256,
    Rs384,
    Rs512,
    Ps256,
    Ps384,
    Ps512,
    Es256,
    Es384,
    Es512,
    EdDsa,
}

impl SigAlg {
    pub const ALL: [SigAlg; 13] = [
        SigAlg::Hs256,
        SigAlg::Hs384,
        SigAlg::Hs512,
        SigAlg::Rs256,
        SigAlg::Rs384,
        SigAlg::Rs512,
        SigAlg::Ps256,
        SigAlg::Ps384,
        SigAlg::Ps512,
        SigAlg::Es256,
        SigAlg::Es384,
        SigAlg::Es512,
        SigAlg::EdDsa,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SigAlg::Hs256 => "HS256",
            SigAlg::Hs384 => "HS384",
            SigAlg::Hs512 => "HS512",
            SigAlg::Rs256 => "RS256",
            SigAlg::Rs384 => "RS384",
            SigAlg::Rs512 => "RS512",
            SigAlg::Ps256 => "PS256",
            SigAlg::Ps384 => "PS384",
            SigAlg::Ps512 => "PS512",
            SigAlg::Es256 => "ES256",
            SigAlg::Es384 => "ES384",
            SigAlg::Es512 => "ES512",
            SigAlg::EdDsa => "EdDSA",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(self, SigAlg::Hs256 | SigAlg::Hs384 | SigAlg::Hs512)
    }
}

// ---------------------------------------------------------------------------
// Combined algorithm
// ---------------------------------------------------------------------------

/// The algorithm bound to a key handle.
///
/// Partitioned: an algorithm is either JWE or JWS, never both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Jwe { alg: KeyMgmtAlg, enc: EncAlg },
    Jws(SigAlg),
}

impl Algorithm {
    pub fn is_jwe(&self) -> bool {
        matches!(self, Algorithm::Jwe { .. })
    }

    pub fn is_jws(&self) -> bool {
        matches!(self, Algorithm::Jws(_))
    }

    pub fn is_symmetric(&self) -> bool {
        match self {
            Algorithm::Jwe { alg, .. } => alg.is_symmetric(),
            Algorithm::Jws(sig) => sig.is_symmetric(),
        }
    }

    pub fn is_asymmetric(&self) -> bool {
        !self.is_symmetric()
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Jwe { alg, enc } => write!(f, "{}+{}", enc.name(), alg.name()),
            Algorithm::Jws(sig) => write!(f, "{}", sig.name()),
        }
    }
}

impl FromStr for Algorithm {
    type Err = JoseError;

    /// Parse `ENC+ALG` (JWE) or a bare JWS name. The split is on the first
    /// `+` only, because key-management names themselves contain `+`
    /// (`ECDH-ES+A128KW`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((enc_name, alg_name)) = s.split_once('+') {
            let enc = EncAlg::from_name(enc_name);
            let alg = KeyMgmtAlg::from_name(alg_name);
            if let (Some(enc), Some(alg)) = (enc, alg) {
                return Ok(Algorithm::Jwe { alg, enc });
            }
            return Err(JoseError::UnsupportedAlgorithm(s.to_string()));
        }
        SigAlg::from_name(s)
            .map(Algorithm::Jws)
            .ok_or_else(|| JoseError::UnsupportedAlgorithm(s.to_string()))
    }
}

impl serde::Serialize for Algorithm {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Algorithm {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
