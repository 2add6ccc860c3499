//! Error types for the JOSE layer.

use std::fmt;

/// Uniform failure for JWE decryption and JWS verification.
///
/// Every parse, key-selection, unwrap, and authentication failure on the
/// receiving path collapses into this value so that callers cannot be used
/// as a padding or key-confusion oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidCiphertext;

impl fmt::Display for InvalidCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid ciphertext or signature")
    }
}

impl std::error::Error for InvalidCiphertext {}

// ---------------------------------------------------------------------------
// Top-level JOSE error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoseError {
    /// Decryption or verification failed (uniform).
    InvalidCiphertext,
    /// The protected header is missing, malformed, or carries a bad `kid`.
    InvalidHeader,
    /// The algorithm name is unknown, or the operation does not apply to it.
    UnsupportedAlgorithm(String),
    /// The JWK is malformed or lacks the material the operation needs.
    InvalidKey,
    /// Encrypt-path failure (RNG, wrap, encoding).
    Encoding,
}

impl fmt::Display for JoseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCiphertext => write!(f, "invalid ciphertext or signature"),
            Self::InvalidHeader => write!(f, "invalid protected header"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm: {}", alg),
            Self::InvalidKey => write!(f, "invalid key material"),
            Self::Encoding => write!(f, "encoding error"),
        }
    }
}

impl std::error::Error for JoseError {}

impl From<InvalidCiphertext> for JoseError {
    fn from(_: InvalidCiphertext) -> Self {
        JoseError::InvalidCiphertext
    }
}

/// Normalize encrypt-path errors into the uniform decrypt error.
///
/// Used on the receiving path, where a key that fails to load must be
/// indistinguishable from a tag that fails to authenticate.
impl From<JoseError> for InvalidCiphertext {
    fn from(_: JoseError) -> Self {
        InvalidCiphertext
    }
}
