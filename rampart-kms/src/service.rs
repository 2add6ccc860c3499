//! Business-logic service: orchestrates storage, barrier, JOSE, and the
//! lifecycle machine over a tenant-scoped request context.
//!
//! Every operation extracts the tenant, runs inside one transaction
//! (ReadOnly for queries, ReadWrite for mutations), and never hands sealed
//! bytes or private JWKs back to the caller. Any failure rolls the whole
//! transaction back; no partial state is observable.

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::barrier::Barrier;
use crate::error::KmsError;
use crate::lifecycle::{self, KeyStatus};
use crate::store::{ElasticKeyFilter, MaterialKeyFilter, Repository, Tx, TxMode};
use crate::types::{
    now_millis, ElasticKey, ElasticKeyCreate, ElasticKeyId, ElasticKeyUpdate, MaterialKey,
    MaterialKeyId, Provider, RequestContext, TenantId,
};
use rampart_jose::{extract_kid, extract_kid_alg, generate_jwk, jwe, jws, Algorithm, Jwk};
use std::fmt;
use std::sync::Arc;

/// Output of [`Kms::generate_wrapped_key`]: a fresh child key whose private
/// bytes are envelope-encrypted under an ElasticKey.
pub struct WrappedKeyMaterial {
    /// JWE of the child's private or secret JWK bytes.
    pub encrypted: Vec<u8>,
    /// The child's private or secret JWK bytes, in clear.
    pub clear_private: Vec<u8>,
    /// The child's public JWK bytes, for asymmetric algorithms.
    pub clear_public: Option<Vec<u8>>,
}

impl fmt::Debug for WrappedKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedKeyMaterial")
            .field("encrypted_len", &self.encrypted.len())
            .field("public", &self.clear_public.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct Kms {
    repo: Arc<Repository>,
    barrier: Arc<Barrier>,
    audit: Arc<dyn AuditSink>,
}

impl Kms {
    pub fn new(repo: Arc<Repository>, barrier: Arc<Barrier>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            repo,
            barrier,
            audit,
        }
    }

    // -----------------------------------------------------------------------
    // ElasticKey CRUD
    // -----------------------------------------------------------------------

    /// Create an ElasticKey. For generated keys the first MaterialKey is
    /// created, sealed, and inserted in the same transaction, and the key
    /// comes back Active. Import-enabled keys start in PendingImport with no
    /// material; the first import promotes them.
    pub async fn add_elastic_key(
        &self,
        ctx: &RequestContext,
        create: ElasticKeyCreate,
    ) -> Result<ElasticKey, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        if create.provider != Provider::Internal {
            return Err(KmsError::NotSupported(format!(
                "provider {}",
                create.provider
            )));
        }
        if create.name.is_empty() {
            return Err(KmsError::InvalidInput("name must not be empty".into()));
        }

        let initial = if create.import_allowed {
            KeyStatus::PendingImport
        } else {
            KeyStatus::PendingGenerate
        };
        lifecycle::transition(KeyStatus::Creating, initial)?;

        let result = self.repo.with_transaction(ctx, TxMode::ReadWrite, |tx| {
            let mut key = ElasticKey {
                elastic_key_id: ElasticKeyId::generate(),
                tenant_id,
                name: create.name.clone(),
                description: create.description.clone(),
                provider: create.provider,
                algorithm: create.algorithm,
                versioning_allowed: create.versioning_allowed,
                import_allowed: create.import_allowed,
                status: initial,
            };
            tx.add_elastic_key(&key)?;

            if key.import_allowed {
                return Ok(key);
            }

            let material = self.generate_sealed_material(tx, &key)?;
            tx.add_material_key(&material)?;

            lifecycle::transition(key.status, KeyStatus::Active)?;
            tx.update_elastic_key_status(tenant_id, key.elastic_key_id, KeyStatus::Active)?;
            key.status = KeyStatus::Active;
            Ok(key)
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::ElasticKeyCreated),
            |event, key: &ElasticKey| event.with_elastic_key(key.elastic_key_id),
        );
        result.map_err(|e| e.in_op("add_elastic_key"))
    }

    pub async fn get_elastic_key(
        &self,
        ctx: &RequestContext,
        id: ElasticKeyId,
    ) -> Result<ElasticKey, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        self.repo
            .with_transaction(ctx, TxMode::ReadOnly, |tx| {
                tx.get_elastic_key(tenant_id, id)
            })
            .map_err(|e| e.in_op("get_elastic_key"))
    }

    pub async fn get_elastic_keys(
        &self,
        ctx: &RequestContext,
        filter: ElasticKeyFilter,
    ) -> Result<Vec<ElasticKey>, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        self.repo
            .with_transaction(ctx, TxMode::ReadOnly, |tx| {
                tx.get_elastic_keys(tenant_id, &filter)
            })
            .map_err(|e| e.in_op("get_elastic_keys"))
    }

    /// Update `name` and/or `description`. Uniqueness of `(tenant, name)`
    /// is enforced by the storage layer.
    pub async fn update_elastic_key(
        &self,
        ctx: &RequestContext,
        id: ElasticKeyId,
        update: ElasticKeyUpdate,
    ) -> Result<ElasticKey, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        let result = self.repo.with_transaction(ctx, TxMode::ReadWrite, |tx| {
            let current = tx.get_elastic_key(tenant_id, id)?;
            let name = update.name.as_deref().unwrap_or(&current.name);
            if name.is_empty() {
                return Err(KmsError::InvalidInput("name must not be empty".into()));
            }
            let description = update
                .description
                .as_deref()
                .unwrap_or(&current.description);
            tx.update_elastic_key(tenant_id, id, name, description)
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::ElasticKeyUpdated)
                .with_elastic_key(id),
            |event, _| event,
        );
        result.map_err(|e| e.in_op("update_elastic_key"))
    }

    /// Soft delete: move to the PendingDelete… status matching the current
    /// one. Statuses without a mapping cannot be deleted.
    pub async fn delete_elastic_key(
        &self,
        ctx: &RequestContext,
        id: ElasticKeyId,
    ) -> Result<ElasticKey, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        let result = self.repo.with_transaction(ctx, TxMode::ReadWrite, |tx| {
            let key = tx.get_elastic_key(tenant_id, id)?;
            let target = key
                .status
                .pending_delete_status()
                .ok_or(KmsError::InvalidTransition {
                    from: key.status,
                    to: None,
                })?;
            lifecycle::transition(key.status, target)?;
            tx.update_elastic_key_status(tenant_id, id, target)?;
            Ok(ElasticKey {
                status: target,
                ..key
            })
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::ElasticKeyDeleted)
                .with_elastic_key(id),
            |event, _| event,
        );
        result.map_err(|e| e.in_op("delete_elastic_key"))
    }

    /// Disable an Active key; its material stays but operations that follow
    /// a status gate will refuse it.
    pub async fn disable_elastic_key(
        &self,
        ctx: &RequestContext,
        id: ElasticKeyId,
    ) -> Result<ElasticKey, KmsError> {
        self.change_status(ctx, id, KeyStatus::Disabled, AuditAction::ElasticKeyDisabled)
            .await
            .map_err(|e| e.in_op("disable_elastic_key"))
    }

    /// Re-enable a Disabled key.
    pub async fn enable_elastic_key(
        &self,
        ctx: &RequestContext,
        id: ElasticKeyId,
    ) -> Result<ElasticKey, KmsError> {
        self.change_status(ctx, id, KeyStatus::Active, AuditAction::ElasticKeyEnabled)
            .await
            .map_err(|e| e.in_op("enable_elastic_key"))
    }

    async fn change_status(
        &self,
        ctx: &RequestContext,
        id: ElasticKeyId,
        target: KeyStatus,
        action: AuditAction,
    ) -> Result<ElasticKey, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        let result = self.repo.with_transaction(ctx, TxMode::ReadWrite, |tx| {
            let key = tx.get_elastic_key(tenant_id, id)?;
            lifecycle::transition(key.status, target)?;
            tx.update_elastic_key_status(tenant_id, id, target)?;
            Ok(ElasticKey {
                status: target,
                ..key
            })
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, action).with_elastic_key(id),
            |event, _| event,
        );
        result
    }

    // -----------------------------------------------------------------------
    // MaterialKey lifecycle
    // -----------------------------------------------------------------------

    /// Append a fresh MaterialKey. Requires status Active or
    /// PendingGenerate; appending past the first version requires
    /// `versioning_allowed`. The ElasticKey status is left unchanged.
    pub async fn generate_material_key(
        &self,
        ctx: &RequestContext,
        elastic_key_id: ElasticKeyId,
    ) -> Result<MaterialKey, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        let result = self.repo.with_transaction(ctx, TxMode::ReadWrite, |tx| {
            let key = tx.get_elastic_key(tenant_id, elastic_key_id)?;
            ensure_internal(&key)?;
            if !matches!(key.status, KeyStatus::Active | KeyStatus::PendingGenerate) {
                return Err(KmsError::NotSupported(format!(
                    "cannot generate material key in status {}",
                    key.status
                )));
            }
            if !key.versioning_allowed
                && !tx
                    .material_keys_for_elastic_key(elastic_key_id, &MaterialKeyFilter::default())?
                    .is_empty()
            {
                return Err(KmsError::NotSupported(
                    "versioning is not allowed for this key".into(),
                ));
            }
            let material = self.generate_sealed_material(tx, &key)?;
            tx.add_material_key(&material)?;
            Ok(material)
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::MaterialKeyGenerated)
                .with_elastic_key(elastic_key_id),
            |event, material: &MaterialKey| event.with_material_key(material.material_key_id),
        );
        result.map_err(|e| e.in_op("generate_material_key"))
    }

    /// Import caller-supplied JWK bytes as a new MaterialKey. The bytes are
    /// sealed opaquely, never parsed, so `clear_public` stays empty even
    /// for asymmetric material. The first import promotes PendingImport to
    /// Active.
    pub async fn import_material_key(
        &self,
        ctx: &RequestContext,
        elastic_key_id: ElasticKeyId,
        jwk_bytes: &[u8],
    ) -> Result<MaterialKey, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        if jwk_bytes.is_empty() {
            return Err(KmsError::InvalidInput("imported key is empty".into()));
        }
        let result = self.repo.with_transaction(ctx, TxMode::ReadWrite, |tx| {
            let key = tx.get_elastic_key(tenant_id, elastic_key_id)?;
            ensure_internal(&key)?;
            if !key.import_allowed {
                return Err(KmsError::NotSupported(
                    "import is not allowed for this key".into(),
                ));
            }
            if !matches!(key.status, KeyStatus::Active | KeyStatus::PendingImport) {
                return Err(KmsError::NotSupported(format!(
                    "cannot import material key in status {}",
                    key.status
                )));
            }

            let material = MaterialKey {
                material_key_id: MaterialKeyId::generate(),
                elastic_key_id,
                clear_public: None,
                encrypted_non_public: self.barrier.seal(tx, jwk_bytes, None)?,
                generate_date: None,
                import_date: Some(now_millis()),
                expiration_date: None,
                revocation_date: None,
            };
            tx.add_material_key(&material)?;

            if key.status == KeyStatus::PendingImport {
                lifecycle::transition(key.status, KeyStatus::Active)?;
                tx.update_elastic_key_status(tenant_id, elastic_key_id, KeyStatus::Active)?;
            }
            Ok(material)
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::MaterialKeyImported)
                .with_elastic_key(elastic_key_id),
            |event, material: &MaterialKey| event.with_material_key(material.material_key_id),
        );
        result.map_err(|e| e.in_op("import_material_key"))
    }

    /// Set the revocation date, exactly once.
    pub async fn revoke_material_key(
        &self,
        ctx: &RequestContext,
        elastic_key_id: ElasticKeyId,
        material_key_id: MaterialKeyId,
    ) -> Result<MaterialKey, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        let result = self.repo.with_transaction(ctx, TxMode::ReadWrite, |tx| {
            tx.get_elastic_key(tenant_id, elastic_key_id)?;
            tx.revoke_material_key(elastic_key_id, material_key_id, now_millis())
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::MaterialKeyRevoked)
                .with_elastic_key(elastic_key_id)
                .with_material_key(material_key_id),
            |event, _| event,
        );
        result.map_err(|e| e.in_op("revoke_material_key"))
    }

    /// Reserved. MaterialKeys are append-only history; hard deletion is not
    /// implemented.
    pub async fn delete_material_key(
        &self,
        _ctx: &RequestContext,
        _elastic_key_id: ElasticKeyId,
        _material_key_id: MaterialKeyId,
    ) -> Result<(), KmsError> {
        Err(KmsError::NotSupported(
            "material key deletion is not implemented".into(),
        ))
    }

    pub async fn list_material_keys(
        &self,
        ctx: &RequestContext,
        elastic_key_id: ElasticKeyId,
        filter: MaterialKeyFilter,
    ) -> Result<Vec<MaterialKey>, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        self.repo
            .with_transaction(ctx, TxMode::ReadOnly, |tx| {
                tx.get_elastic_key(tenant_id, elastic_key_id)?;
                tx.material_keys_for_elastic_key(elastic_key_id, &filter)
            })
            .map_err(|e| e.in_op("list_material_keys"))
    }

    // -----------------------------------------------------------------------
    // Cryptographic operations
    // -----------------------------------------------------------------------

    /// Encrypt under the latest MaterialKey. Asymmetric keys use the stored
    /// public JWK; symmetric keys unseal the secret. The output JWE names
    /// the MaterialKey in its `kid`.
    pub async fn encrypt(
        &self,
        ctx: &RequestContext,
        elastic_key_id: ElasticKeyId,
        context: Option<&[u8]>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        let result = self.repo.with_transaction(ctx, TxMode::ReadOnly, |tx| {
            self.encrypt_in_tx(tx, tenant_id, elastic_key_id, context, plaintext)
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::EncryptPerformed)
                .with_elastic_key(elastic_key_id),
            |event, _| event,
        );
        result.map_err(|e| e.in_op("encrypt_by_elastic_key"))
    }

    /// Decrypt a JWE produced by this ElasticKey, selecting the MaterialKey
    /// version named by the embedded `kid`, not the latest.
    pub async fn decrypt(
        &self,
        ctx: &RequestContext,
        elastic_key_id: ElasticKeyId,
        jwe_bytes: &[u8],
    ) -> Result<Vec<u8>, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        let result = self.repo.with_transaction(ctx, TxMode::ReadOnly, |tx| {
            let key = tx.get_elastic_key(tenant_id, elastic_key_id)?;
            ensure_internal(&key)?;
            if !key.algorithm.is_jwe() {
                return Err(KmsError::NotSupported(format!(
                    "decrypt with algorithm {}",
                    key.algorithm
                )));
            }
            let kid = extract_kid(jwe_bytes)?;
            // A kid that names no material under this key is treated like a
            // wrong key, not a missing record.
            let material = tx
                .material_key_version(elastic_key_id, MaterialKeyId::from_uuid(kid)?)
                .map_err(not_found_to_invalid_ciphertext)?;
            let secret = self.unseal_non_public(tx, &material)?;
            jwe::decrypt(std::slice::from_ref(&secret), jwe_bytes).map_err(KmsError::from)
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::DecryptPerformed)
                .with_elastic_key(elastic_key_id),
            |event, _| event,
        );
        result.map_err(|e| e.in_op("decrypt_by_elastic_key"))
    }

    /// Sign with the latest MaterialKey's private or secret JWK.
    pub async fn sign(
        &self,
        ctx: &RequestContext,
        elastic_key_id: ElasticKeyId,
        payload: &[u8],
    ) -> Result<Vec<u8>, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        let result = self.repo.with_transaction(ctx, TxMode::ReadOnly, |tx| {
            let key = tx.get_elastic_key(tenant_id, elastic_key_id)?;
            ensure_internal(&key)?;
            if !key.algorithm.is_jws() {
                return Err(KmsError::NotSupported(format!(
                    "sign with algorithm {}",
                    key.algorithm
                )));
            }
            let material = tx.latest_material_key(elastic_key_id)?;
            let secret = self.unseal_non_public(tx, &material)?;
            jws::sign(&secret, payload).map_err(KmsError::from)
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::SignPerformed)
                .with_elastic_key(elastic_key_id),
            |event, _| event,
        );
        result.map_err(|e| e.in_op("sign_by_elastic_key"))
    }

    /// Verify a JWS against the `kid`-selected MaterialKey, preferring the
    /// stored public JWK. Returns the payload on success.
    pub async fn verify(
        &self,
        ctx: &RequestContext,
        elastic_key_id: ElasticKeyId,
        jws_bytes: &[u8],
    ) -> Result<Vec<u8>, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        let result = self.repo.with_transaction(ctx, TxMode::ReadOnly, |tx| {
            let key = tx.get_elastic_key(tenant_id, elastic_key_id)?;
            ensure_internal(&key)?;
            if !key.algorithm.is_jws() {
                return Err(KmsError::NotSupported(format!(
                    "verify with algorithm {}",
                    key.algorithm
                )));
            }
            let (kid, _) = extract_kid_alg(jws_bytes)?;
            let material = tx
                .material_key_version(elastic_key_id, MaterialKeyId::from_uuid(kid)?)
                .map_err(not_found_to_invalid_ciphertext)?;
            let verify_key = match &material.clear_public {
                Some(public) => Jwk::from_bytes(public)?,
                None => self.unseal_non_public(tx, &material)?,
            };
            jws::verify(std::slice::from_ref(&verify_key), jws_bytes).map_err(KmsError::from)
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::VerifyPerformed)
                .with_elastic_key(elastic_key_id),
            |event, _| event,
        );
        result.map_err(|e| e.in_op("verify_by_elastic_key"))
    }

    /// Generate a fresh, independent key of `algorithm` and envelope-wrap
    /// its private bytes under this ElasticKey's latest material.
    pub async fn generate_wrapped_key(
        &self,
        ctx: &RequestContext,
        elastic_key_id: ElasticKeyId,
        algorithm: Algorithm,
        context: Option<&[u8]>,
    ) -> Result<WrappedKeyMaterial, KmsError> {
        let tenant_id = ctx.tenant_id()?;
        let result = self.repo.with_transaction(ctx, TxMode::ReadOnly, |tx| {
            let child = generate_jwk(&algorithm)?;
            let encrypted =
                self.encrypt_in_tx(tx, tenant_id, elastic_key_id, context, &child.private_bytes)?;
            Ok(WrappedKeyMaterial {
                encrypted,
                clear_private: child.private_bytes,
                clear_public: child.public_bytes,
            })
        });

        self.record(
            &result,
            AuditEvent::operation(tenant_id, AuditAction::WrappedKeyGenerated)
                .with_elastic_key(elastic_key_id),
            |event, _| event,
        );
        result.map_err(|e| e.in_op("generate_by_elastic_key"))
    }

    // -----------------------------------------------------------------------
    // Helper methods
    // -----------------------------------------------------------------------

    fn encrypt_in_tx(
        &self,
        tx: &Tx<'_>,
        tenant_id: TenantId,
        elastic_key_id: ElasticKeyId,
        context: Option<&[u8]>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, KmsError> {
        let key = tx.get_elastic_key(tenant_id, elastic_key_id)?;
        ensure_internal(&key)?;
        if !key.algorithm.is_jwe() {
            return Err(KmsError::NotSupported(format!(
                "encrypt with algorithm {}",
                key.algorithm
            )));
        }
        let material = tx.latest_material_key(elastic_key_id)?;
        let encrypt_key = match &material.clear_public {
            Some(public) => Jwk::from_bytes(public)?,
            None => self.unseal_non_public(tx, &material)?,
        };
        jwe::encrypt(&encrypt_key, plaintext, context).map_err(KmsError::from)
    }

    /// Unseal a MaterialKey's non-public JWK. The clear bytes live only for
    /// the current transaction.
    fn unseal_non_public(&self, tx: &Tx<'_>, material: &MaterialKey) -> Result<Jwk, KmsError> {
        let clear = self.barrier.unseal(tx, &material.encrypted_non_public)?;
        Jwk::from_bytes(&clear).map_err(KmsError::from)
    }

    /// Generate fresh material for `key`'s algorithm and seal the non-public
    /// half through the barrier, inside the caller's transaction.
    fn generate_sealed_material(
        &self,
        tx: &Tx<'_>,
        key: &ElasticKey,
    ) -> Result<MaterialKey, KmsError> {
        let generated = generate_jwk(&key.algorithm)?;
        let sealed = self.barrier.seal(tx, &generated.private_bytes, None)?;
        Ok(MaterialKey {
            material_key_id: MaterialKeyId::from_uuid(generated.kid)?,
            elastic_key_id: key.elastic_key_id,
            clear_public: generated.public_bytes,
            encrypted_non_public: sealed,
            generate_date: Some(now_millis()),
            import_date: None,
            expiration_date: None,
            revocation_date: None,
        })
    }

    fn record<T>(
        &self,
        result: &Result<T, KmsError>,
        event: AuditEvent,
        enrich: impl FnOnce(AuditEvent, &T) -> AuditEvent,
    ) {
        match result {
            Ok(value) => self.audit.record(enrich(event, value)),
            Err(_) => self.audit.record(event.with_failure()),
        }
    }
}

/// The seam where an HSM-backed provider would swap in its own client.
/// With only the software provider implemented this always succeeds.
fn ensure_internal(key: &ElasticKey) -> Result<(), KmsError> {
    match key.provider {
        Provider::Internal => Ok(()),
    }
}

fn not_found_to_invalid_ciphertext(err: KmsError) -> KmsError {
    match err {
        KmsError::NotFound(_) => KmsError::InvalidCiphertext,
        other => other,
    }
}
