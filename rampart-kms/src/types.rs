//! Core types: identifiers, ElasticKey, MaterialKey, request context.

use crate::error::KmsError;
use crate::lifecycle::KeyStatus;
use chrono::{DateTime, Utc};
use rampart_jose::Algorithm;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Milliseconds since the Unix epoch, the on-disk timestamp form.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------
//
// All ids are version-7 UUIDs: the leading bits are a millisecond timestamp,
// so ids compare in creation order and "latest" is the greatest id.

/// Tenant identifier: the authorization boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Reject the zero UUID.
    pub fn from_uuid(uuid: Uuid) -> Result<Self, KmsError> {
        if uuid.is_nil() {
            return Err(KmsError::InvalidInput("tenant id must not be zero".into()));
        }
        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable key-handle identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElasticKeyId(Uuid);

impl ElasticKeyId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Result<Self, KmsError> {
        if uuid.is_nil() {
            return Err(KmsError::InvalidInput("elastic key id must not be zero".into()));
        }
        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ElasticKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one version of key material under an ElasticKey.
///
/// Equal to the `kid` embedded in every JWE/JWS the material produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialKeyId(Uuid);

impl MaterialKeyId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Result<Self, KmsError> {
        if uuid.is_nil() {
            return Err(KmsError::InvalidInput("material key id must not be zero".into()));
        }
        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MaterialKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Where key material lives and who runs the cryptography.
///
/// Only the in-process software provider is implemented; the enum reserves
/// room for HSM-backed providers behind the same service contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    Internal,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Internal => "Internal",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Internal" => Some(Provider::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// ElasticKey
// ---------------------------------------------------------------------------

/// The stable, user-addressable key handle. Its cryptographic material
/// rotates underneath it as MaterialKeys are appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElasticKey {
    pub elastic_key_id: ElasticKeyId,
    pub tenant_id: TenantId,
    /// Unique within the tenant.
    pub name: String,
    pub description: String,
    pub provider: Provider,
    /// Immutable after creation.
    pub algorithm: Algorithm,
    pub versioning_allowed: bool,
    /// Immutable after creation; decides the initial status.
    pub import_allowed: bool,
    pub status: KeyStatus,
}

/// Creation spec for [`ElasticKey`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElasticKeyCreate {
    pub name: String,
    pub description: String,
    pub provider: Provider,
    pub algorithm: Algorithm,
    pub versioning_allowed: bool,
    pub import_allowed: bool,
}

/// Mutable attributes of an [`ElasticKey`]. Everything else is fixed at
/// creation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ElasticKeyUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// MaterialKey
// ---------------------------------------------------------------------------

/// One version of cryptographic bytes under an ElasticKey. Append-only:
/// after insertion only `revocation_date` may ever be set, once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialKey {
    pub material_key_id: MaterialKeyId,
    pub elastic_key_id: ElasticKeyId,
    /// Public JWK bytes; `None` for symmetric material and for imports.
    pub clear_public: Option<Vec<u8>>,
    /// Barrier-sealed private or secret JWK bytes.
    pub encrypted_non_public: Vec<u8>,
    /// Exactly one of `generate_date` / `import_date` is set.
    pub generate_date: Option<i64>,
    pub import_date: Option<i64>,
    pub expiration_date: Option<i64>,
    pub revocation_date: Option<i64>,
}

impl MaterialKey {
    pub fn is_revoked(&self) -> bool {
        self.revocation_date.is_some()
    }
}

// ---------------------------------------------------------------------------
// Request context
// ---------------------------------------------------------------------------

/// Ambient per-request state: the tenant identity injected by the upstream
/// gate, plus cancellation and deadline.
///
/// Cancellation is cooperative: the flag is consulted at transaction
/// boundaries, and dropping the operation future aborts at the next await.
#[derive(Clone, Debug)]
pub struct RequestContext {
    tenant: Option<Uuid>,
    deadline: Option<DateTime<Utc>>,
    cancelled: Arc<AtomicBool>,
}

impl RequestContext {
    /// A context with no tenant. Tenant-scoped operations will fail with
    /// `TenantRequired`.
    pub fn anonymous() -> Self {
        Self {
            tenant: None,
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn for_tenant(tenant: TenantId) -> Self {
        Self {
            tenant: Some(tenant.as_uuid()),
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context carrying a raw tenant value, validated at extraction time.
    pub fn with_tenant_uuid(tenant: Uuid) -> Self {
        Self {
            tenant: Some(tenant),
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The tenant identity, or `TenantRequired` when absent or zero.
    pub fn tenant_id(&self) -> Result<TenantId, KmsError> {
        match self.tenant {
            Some(uuid) if !uuid.is_nil() => Ok(TenantId(uuid)),
            _ => Err(KmsError::TenantRequired),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Utc::now() > deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ids_rejected() {
        assert!(TenantId::from_uuid(Uuid::nil()).is_err());
        assert!(ElasticKeyId::from_uuid(Uuid::nil()).is_err());
        assert!(MaterialKeyId::from_uuid(Uuid::nil()).is_err());
    }

    #[test]
    fn ids_are_time_ordered() {
        let a = MaterialKeyId::generate();
        let b = MaterialKeyId::generate();
        assert!(a < b);
        // The textual form orders the same way as the typed form.
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn context_tenant_extraction() {
        assert!(matches!(
            RequestContext::anonymous().tenant_id(),
            Err(KmsError::TenantRequired)
        ));
        assert!(matches!(
            RequestContext::with_tenant_uuid(Uuid::nil()).tenant_id(),
            Err(KmsError::TenantRequired)
        ));
        let tenant = TenantId::generate();
        assert_eq!(
            RequestContext::for_tenant(tenant).tenant_id().unwrap(),
            tenant
        );
    }

    #[test]
    fn context_cancellation_and_deadline() {
        let ctx = RequestContext::anonymous();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());

        let expired = RequestContext::anonymous()
            .with_deadline(Utc::now() - chrono::Duration::seconds(1));
        assert!(expired.is_cancelled());
    }
}
