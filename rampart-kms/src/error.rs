//! Error taxonomy surfaced by the KMS core.
//!
//! Validation errors pass through unchanged; storage and cryptographic
//! faults are wrapped with the failing operation's name before they
//! propagate. Transactions roll back before any error is returned.

use crate::lifecycle::KeyStatus;
use crate::types::MaterialKeyId;
use rampart_jose::JoseError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KmsError {
    /// Ambient tenant missing or zero.
    TenantRequired,
    /// Entity absent, or not visible to this tenant.
    NotFound(&'static str),
    /// Unique-constraint violation.
    Conflict(String),
    /// Validation failure: bad UUID, bad paging, unsupported value.
    InvalidInput(String),
    /// Foreign-key violation.
    InvalidReference(String),
    /// The state machine rejected the requested status change. `to` is
    /// `None` when no target status exists at all (e.g. deleting a key
    /// already pending delete).
    InvalidTransition {
        from: KeyStatus,
        to: Option<KeyStatus>,
    },
    /// Operation inapplicable to the algorithm, provider, or status.
    NotSupported(String),
    /// JWE/JWS authentication or decryption failure.
    InvalidCiphertext,
    /// JWE/JWS protected header missing or malformed.
    InvalidHeader,
    /// The MaterialKey's revocation date is already set.
    AlreadyRevoked(MaterialKeyId),
    /// Ambient context cancelled or past its deadline.
    Cancelled,
    /// Storage or cryptographic fault not covered above.
    Internal(String),
}

impl fmt::Display for KmsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TenantRequired => write!(f, "tenant identity required"),
            Self::NotFound(entity) => write!(f, "{} not found", entity),
            Self::Conflict(msg) => write!(f, "conflict: {}", msg),
            Self::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Self::InvalidReference(msg) => write!(f, "invalid reference: {}", msg),
            Self::InvalidTransition { from, to: Some(to) } => {
                write!(f, "invalid transition: {} → {}", from, to)
            }
            Self::InvalidTransition { from, to: None } => {
                write!(f, "no transition available from {}", from)
            }
            Self::NotSupported(msg) => write!(f, "not supported: {}", msg),
            Self::InvalidCiphertext => write!(f, "invalid ciphertext or signature"),
            Self::InvalidHeader => write!(f, "invalid protected header"),
            Self::AlreadyRevoked(id) => write!(f, "material key {} already revoked", id),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for KmsError {}

impl KmsError {
    /// Attach the operation name to internal faults. Validation errors are
    /// returned unchanged.
    pub(crate) fn in_op(self, op: &'static str) -> KmsError {
        match self {
            KmsError::Internal(msg) => KmsError::Internal(format!("{}: {}", op, msg)),
            other => other,
        }
    }
}

impl From<JoseError> for KmsError {
    fn from(err: JoseError) -> Self {
        match err {
            JoseError::InvalidCiphertext => KmsError::InvalidCiphertext,
            JoseError::InvalidHeader => KmsError::InvalidHeader,
            JoseError::UnsupportedAlgorithm(alg) => {
                KmsError::NotSupported(format!("algorithm {}", alg))
            }
            JoseError::InvalidKey => KmsError::Internal("invalid key material".into()),
            JoseError::Encoding => KmsError::Internal("encoding failure".into()),
        }
    }
}
