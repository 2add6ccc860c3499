//! # Rampart KMS
//!
//! Multi-tenant key lifecycle management.
//!
//! A stable *ElasticKey* handle owns an append-only history of *MaterialKeys*
//! (the actual cryptographic bytes). Private material is sealed at rest by an
//! envelope *Barrier* (unseal keys → root → intermediate → content), and the
//! JOSE operations select the right material version from the `kid` embedded
//! in every message.
//!
//! ## Quick Start
//!
//! ```ignore
//! use rampart_kms::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let repo = Arc::new(Repository::open("kms.db").unwrap());
//! let barrier = Arc::new(Barrier::new(UnsealKeySet::generate(1).unwrap()));
//! let kms = Kms::new(repo, barrier, Arc::new(TracingAuditSink));
//!
//! let ctx = RequestContext::for_tenant(TenantId::generate());
//! let key = kms.add_elastic_key(&ctx, ElasticKeyCreate {
//!     name: "orders".into(),
//!     description: String::new(),
//!     provider: Provider::Internal,
//!     algorithm: "A256GCM+dir".parse().unwrap(),
//!     versioning_allowed: true,
//!     import_allowed: false,
//! }).await.unwrap();
//!
//! let ct = kms.encrypt(&ctx, key.elastic_key_id, None, b"secret").await.unwrap();
//! let pt = kms.decrypt(&ctx, key.elastic_key_id, &ct).await.unwrap();
//! assert_eq!(pt, b"secret");
//! # });
//! ```

pub mod audit;
pub mod barrier;
pub mod error;
pub mod lifecycle;
pub mod service;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use rampart_jose::Algorithm;

pub use audit::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use barrier::{Barrier, UnsealKey, UnsealKeySet};
pub use error::KmsError;
pub use lifecycle::{transition, KeyStatus};
pub use service::{Kms, WrappedKeyMaterial};
pub use store::{
    BarrierKey, BarrierTier, ElasticKeyFilter, ElasticKeySortField, MaterialKeyFilter,
    MaterialKeySortField, Page, Repository, SortDir, Tx, TxMode,
};
pub use types::{
    ElasticKey, ElasticKeyCreate, ElasticKeyId, ElasticKeyUpdate, MaterialKey, MaterialKeyId,
    Provider, RequestContext, TenantId,
};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_jose::{extract_kid, Algorithm};
    use std::panic::AssertUnwindSafe;
    use std::sync::Arc;

    struct TestEnv {
        kms: Kms,
        repo: Arc<Repository>,
        barrier: Arc<Barrier>,
        audit: Arc<InMemoryAuditSink>,
        ctx: RequestContext,
        _dir: tempfile::TempDir,
    }

    fn test_env() -> TestEnv {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(Repository::open(dir.path().join("kms.db")).unwrap());
        let barrier = Arc::new(Barrier::new(UnsealKeySet::generate(1).unwrap()));
        let audit = Arc::new(InMemoryAuditSink::new());
        let kms = Kms::new(repo.clone(), barrier.clone(), audit.clone());
        let ctx = RequestContext::for_tenant(TenantId::generate());
        TestEnv {
            kms,
            repo,
            barrier,
            audit,
            ctx,
            _dir: dir,
        }
    }

    fn create(name: &str, algorithm: &str) -> ElasticKeyCreate {
        ElasticKeyCreate {
            name: name.into(),
            description: "test key".into(),
            provider: Provider::Internal,
            algorithm: algorithm.parse().unwrap(),
            versioning_allowed: true,
            import_allowed: false,
        }
    }

    // === ElasticKey creation ===

    #[tokio::test]
    async fn create_key_is_active_with_one_material() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k", "A256GCM+dir"))
            .await
            .unwrap();

        assert_eq!(key.status, KeyStatus::Active);
        assert_eq!(key.name, "k");
        assert_eq!(key.provider, Provider::Internal);

        let materials = env
            .kms
            .list_material_keys(&env.ctx, key.elastic_key_id, MaterialKeyFilter::default())
            .await
            .unwrap();
        assert_eq!(materials.len(), 1);
        assert!(materials[0].generate_date.is_some());
        assert!(materials[0].import_date.is_none());
        // Symmetric material has no public half.
        assert!(materials[0].clear_public.is_none());
        // Sealed, never clear.
        assert!(!materials[0].encrypted_non_public.is_empty());
    }

    #[tokio::test]
    async fn create_asymmetric_key_stores_public_jwk() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k", "ES256"))
            .await
            .unwrap();
        let materials = env
            .kms
            .list_material_keys(&env.ctx, key.elastic_key_id, MaterialKeyFilter::default())
            .await
            .unwrap();
        assert!(materials[0].clear_public.is_some());
    }

    #[tokio::test]
    async fn duplicate_name_in_tenant_is_conflict() {
        let env = test_env();
        env.kms
            .add_elastic_key(&env.ctx, create("same", "A256GCM+dir"))
            .await
            .unwrap();
        let err = env
            .kms
            .add_elastic_key(&env.ctx, create("same", "HS256"))
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::Conflict(_)));
    }

    #[tokio::test]
    async fn same_name_in_other_tenant_is_fine() {
        let env = test_env();
        env.kms
            .add_elastic_key(&env.ctx, create("same", "A256GCM+dir"))
            .await
            .unwrap();
        let other = RequestContext::for_tenant(TenantId::generate());
        env.kms
            .add_elastic_key(&other, create("same", "A256GCM+dir"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tenant_required_for_all_operations() {
        let env = test_env();
        let ctx = RequestContext::anonymous();
        assert!(matches!(
            env.kms.add_elastic_key(&ctx, create("k", "HS256")).await,
            Err(KmsError::TenantRequired)
        ));
        assert!(matches!(
            env.kms
                .get_elastic_keys(&ctx, ElasticKeyFilter::default())
                .await,
            Err(KmsError::TenantRequired)
        ));
        let zero = RequestContext::with_tenant_uuid(uuid::Uuid::nil());
        assert!(matches!(
            env.kms.add_elastic_key(&zero, create("k", "HS256")).await,
            Err(KmsError::TenantRequired)
        ));
    }

    // === Scenario: symmetric round-trip ===

    #[tokio::test]
    async fn symmetric_roundtrip() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k1", "A256GCM+dir"))
            .await
            .unwrap();

        let ct = env
            .kms
            .encrypt(&env.ctx, key.elastic_key_id, None, b"hello")
            .await
            .unwrap();
        let pt = env
            .kms
            .decrypt(&env.ctx, key.elastic_key_id, &ct)
            .await
            .unwrap();
        assert_eq!(pt, b"hello");
    }

    // === Scenario: context binding ===

    #[tokio::test]
    async fn context_tamper_is_invalid_ciphertext() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k1", "A256GCM+dir"))
            .await
            .unwrap();

        let ct = env
            .kms
            .encrypt(&env.ctx, key.elastic_key_id, Some(b"ctx-A"), b"payload")
            .await
            .unwrap();
        // Intact ciphertext decrypts.
        assert_eq!(
            env.kms
                .decrypt(&env.ctx, key.elastic_key_id, &ct)
                .await
                .unwrap(),
            b"payload"
        );

        // Rewrite the ctx header parameter: the header still parses and the
        // kid is intact, but the associated data no longer matches.
        let text = String::from_utf8(ct.clone()).unwrap();
        let mut parts: Vec<String> = text.split('.').map(String::from).collect();
        let header_json = base64_decode(&parts[0]);
        let mut header: serde_json::Value = serde_json::from_slice(&header_json).unwrap();
        header["ctx"] = serde_json::Value::String(base64_encode(b"ctx-B"));
        parts[0] = base64_encode(&serde_json::to_vec(&header).unwrap());
        let tampered = parts.join(".").into_bytes();

        let err = env
            .kms
            .decrypt(&env.ctx, key.elastic_key_id, &tampered)
            .await
            .unwrap_err();
        assert_eq!(err, KmsError::InvalidCiphertext);
    }

    fn base64_encode(data: &[u8]) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
    }

    fn base64_decode(data: &str) -> Vec<u8> {
        use base64::Engine as _;
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(data)
            .unwrap()
    }

    // === Scenario: asymmetric sign/verify ===

    #[tokio::test]
    async fn sign_verify_roundtrip_and_foreign_key_rejection() {
        let env = test_env();
        let k2 = env
            .kms
            .add_elastic_key(&env.ctx, create("k2", "ES256"))
            .await
            .unwrap();
        let k3 = env
            .kms
            .add_elastic_key(&env.ctx, create("k3", "ES256"))
            .await
            .unwrap();

        let signed = env
            .kms
            .sign(&env.ctx, k2.elastic_key_id, b"message to sign")
            .await
            .unwrap();
        let payload = env
            .kms
            .verify(&env.ctx, k2.elastic_key_id, &signed)
            .await
            .unwrap();
        assert_eq!(payload, b"message to sign");

        // An unrelated key must reject the signature.
        let err = env
            .kms
            .verify(&env.ctx, k3.elastic_key_id, &signed)
            .await
            .unwrap_err();
        assert_eq!(err, KmsError::InvalidCiphertext);
    }

    #[tokio::test]
    async fn hmac_sign_verify_roundtrip() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("mac", "HS384"))
            .await
            .unwrap();
        let signed = env
            .kms
            .sign(&env.ctx, key.elastic_key_id, b"payload")
            .await
            .unwrap();
        assert_eq!(
            env.kms
                .verify(&env.ctx, key.elastic_key_id, &signed)
                .await
                .unwrap(),
            b"payload"
        );
    }

    #[tokio::test]
    async fn crypto_operations_respect_algorithm_family() {
        let env = test_env();
        let enc_key = env
            .kms
            .add_elastic_key(&env.ctx, create("enc", "A128GCM+dir"))
            .await
            .unwrap();
        let sig_key = env
            .kms
            .add_elastic_key(&env.ctx, create("sig", "RS256"))
            .await
            .unwrap();

        assert!(matches!(
            env.kms.sign(&env.ctx, enc_key.elastic_key_id, b"m").await,
            Err(KmsError::NotSupported(_))
        ));
        assert!(matches!(
            env.kms
                .encrypt(&env.ctx, sig_key.elastic_key_id, None, b"m")
                .await,
            Err(KmsError::NotSupported(_))
        ));
        assert!(matches!(
            env.kms
                .decrypt(&env.ctx, sig_key.elastic_key_id, b"anything")
                .await,
            Err(KmsError::NotSupported(_))
        ));
    }

    // === Scenario: rotation ===

    #[tokio::test]
    async fn rotation_keeps_old_ciphertexts_decryptable() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k4", "A256GCM+dir"))
            .await
            .unwrap();
        let id = key.elastic_key_id;

        let m1 = env
            .kms
            .list_material_keys(&env.ctx, id, MaterialKeyFilter::default())
            .await
            .unwrap()[0]
            .material_key_id;

        let c1 = env.kms.encrypt(&env.ctx, id, None, b"v1").await.unwrap();
        assert_eq!(extract_kid(&c1).unwrap(), m1.as_uuid());

        let m2 = env
            .kms
            .generate_material_key(&env.ctx, id)
            .await
            .unwrap()
            .material_key_id;
        assert!(m1 < m2);

        let c2 = env.kms.encrypt(&env.ctx, id, None, b"v2").await.unwrap();
        assert_eq!(extract_kid(&c2).unwrap(), m2.as_uuid());

        // Both generations decrypt through the same handle.
        assert_eq!(env.kms.decrypt(&env.ctx, id, &c1).await.unwrap(), b"v1");
        assert_eq!(env.kms.decrypt(&env.ctx, id, &c2).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn versioning_disallowed_blocks_second_material() {
        let env = test_env();
        let mut create = create("fixed", "A256GCM+dir");
        create.versioning_allowed = false;
        let key = env.kms.add_elastic_key(&env.ctx, create).await.unwrap();
        assert!(matches!(
            env.kms
                .generate_material_key(&env.ctx, key.elastic_key_id)
                .await,
            Err(KmsError::NotSupported(_))
        ));
    }

    // === Scenario: lifecycle ===

    #[tokio::test]
    async fn delete_moves_to_pending_and_rejects_double_delete() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k5", "A256GCM+dir"))
            .await
            .unwrap();

        let deleted = env
            .kms
            .delete_elastic_key(&env.ctx, key.elastic_key_id)
            .await
            .unwrap();
        assert_eq!(deleted.status, KeyStatus::PendingDeleteWasActive);

        let err = env
            .kms
            .delete_elastic_key(&env.ctx, key.elastic_key_id)
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn disable_and_enable_follow_the_machine() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k", "A256GCM+dir"))
            .await
            .unwrap();
        let id = key.elastic_key_id;

        let disabled = env.kms.disable_elastic_key(&env.ctx, id).await.unwrap();
        assert_eq!(disabled.status, KeyStatus::Disabled);
        // Disabled → Disabled is not in the table.
        assert!(matches!(
            env.kms.disable_elastic_key(&env.ctx, id).await,
            Err(KmsError::InvalidTransition { .. })
        ));
        let enabled = env.kms.enable_elastic_key(&env.ctx, id).await.unwrap();
        assert_eq!(enabled.status, KeyStatus::Active);

        // Deleting a disabled key lands in its own pending state.
        env.kms.disable_elastic_key(&env.ctx, id).await.unwrap();
        let deleted = env.kms.delete_elastic_key(&env.ctx, id).await.unwrap();
        assert_eq!(deleted.status, KeyStatus::PendingDeleteWasDisabled);
    }

    // === Scenario: tenant isolation ===

    #[tokio::test]
    async fn tenants_cannot_see_each_other() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k6", "A256GCM+dir"))
            .await
            .unwrap();

        let other = RequestContext::for_tenant(TenantId::generate());
        assert!(matches!(
            env.kms.get_elastic_key(&other, key.elastic_key_id).await,
            Err(KmsError::NotFound(_))
        ));
        assert!(env
            .kms
            .get_elastic_keys(&other, ElasticKeyFilter::default())
            .await
            .unwrap()
            .is_empty());
        // Mutations are just as invisible.
        assert!(matches!(
            env.kms.delete_elastic_key(&other, key.elastic_key_id).await,
            Err(KmsError::NotFound(_))
        ));
    }

    // === Revocation ===

    #[tokio::test]
    async fn revocation_is_immutable() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k", "A256GCM+dir"))
            .await
            .unwrap();
        let id = key.elastic_key_id;
        let material = env
            .kms
            .list_material_keys(&env.ctx, id, MaterialKeyFilter::default())
            .await
            .unwrap()[0]
            .material_key_id;

        let revoked = env
            .kms
            .revoke_material_key(&env.ctx, id, material)
            .await
            .unwrap();
        let first_date = revoked.revocation_date.unwrap();

        let err = env
            .kms
            .revoke_material_key(&env.ctx, id, material)
            .await
            .unwrap_err();
        assert_eq!(err, KmsError::AlreadyRevoked(material));

        // The stored date did not move.
        let after = env
            .kms
            .list_material_keys(&env.ctx, id, MaterialKeyFilter::default())
            .await
            .unwrap()[0]
            .clone();
        assert_eq!(after.revocation_date, Some(first_date));
    }

    #[tokio::test]
    async fn delete_material_key_is_reserved() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k", "A256GCM+dir"))
            .await
            .unwrap();
        let material = env
            .kms
            .list_material_keys(&env.ctx, key.elastic_key_id, MaterialKeyFilter::default())
            .await
            .unwrap()[0]
            .material_key_id;
        assert!(matches!(
            env.kms
                .delete_material_key(&env.ctx, key.elastic_key_id, material)
                .await,
            Err(KmsError::NotSupported(_))
        ));
    }

    // === Import ===

    #[tokio::test]
    async fn import_flow_promotes_pending_import() {
        let env = test_env();
        let mut create = create("imported", "A256GCM+dir");
        create.import_allowed = true;
        let key = env.kms.add_elastic_key(&env.ctx, create).await.unwrap();
        assert_eq!(key.status, KeyStatus::PendingImport);

        // No material yet.
        assert!(env
            .kms
            .list_material_keys(&env.ctx, key.elastic_key_id, MaterialKeyFilter::default())
            .await
            .unwrap()
            .is_empty());

        let jwk_bytes = br#"{"kty":"oct","k":"AAAA"}"#;
        let material = env
            .kms
            .import_material_key(&env.ctx, key.elastic_key_id, jwk_bytes)
            .await
            .unwrap();
        assert!(material.import_date.is_some());
        assert!(material.generate_date.is_none());
        // Imported material is opaque: no public half is derived.
        assert!(material.clear_public.is_none());

        let reloaded = env
            .kms
            .get_elastic_key(&env.ctx, key.elastic_key_id)
            .await
            .unwrap();
        assert_eq!(reloaded.status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn import_requires_permission() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("no-import", "A256GCM+dir"))
            .await
            .unwrap();
        assert!(matches!(
            env.kms
                .import_material_key(&env.ctx, key.elastic_key_id, b"{}")
                .await,
            Err(KmsError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn generate_is_refused_while_pending_import() {
        let env = test_env();
        let mut create = create("imp", "A256GCM+dir");
        create.import_allowed = true;
        let key = env.kms.add_elastic_key(&env.ctx, create).await.unwrap();
        assert!(matches!(
            env.kms
                .generate_material_key(&env.ctx, key.elastic_key_id)
                .await,
            Err(KmsError::NotSupported(_))
        ));
    }

    // === Update ===

    #[tokio::test]
    async fn update_changes_name_and_description_only() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("before", "A256GCM+dir"))
            .await
            .unwrap();

        let updated = env
            .kms
            .update_elastic_key(
                &env.ctx,
                key.elastic_key_id,
                ElasticKeyUpdate {
                    name: Some("after".into()),
                    description: Some("new text".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "after");
        assert_eq!(updated.description, "new text");
        assert_eq!(updated.algorithm, key.algorithm);
        assert_eq!(updated.status, key.status);
    }

    #[tokio::test]
    async fn update_to_taken_name_is_conflict() {
        let env = test_env();
        env.kms
            .add_elastic_key(&env.ctx, create("taken", "A256GCM+dir"))
            .await
            .unwrap();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("mine", "A256GCM+dir"))
            .await
            .unwrap();
        let err = env
            .kms
            .update_elastic_key(
                &env.ctx,
                key.elastic_key_id,
                ElasticKeyUpdate {
                    name: Some("taken".into()),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::Conflict(_)));
    }

    // === Wrapped key generation ===

    #[tokio::test]
    async fn generate_wrapped_key_roundtrips_through_decrypt() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("wrapper", "A256GCM+dir"))
            .await
            .unwrap();

        let child_alg: Algorithm = "ES256".parse().unwrap();
        let wrapped = env
            .kms
            .generate_wrapped_key(&env.ctx, key.elastic_key_id, child_alg, None)
            .await
            .unwrap();
        assert!(wrapped.clear_public.is_some());

        let unwrapped = env
            .kms
            .decrypt(&env.ctx, key.elastic_key_id, &wrapped.encrypted)
            .await
            .unwrap();
        assert_eq!(unwrapped, wrapped.clear_private);
    }

    // === Listing, filters, paging ===

    #[tokio::test]
    async fn listing_defaults_to_id_ascending() {
        let env = test_env();
        let a = env
            .kms
            .add_elastic_key(&env.ctx, create("a", "A256GCM+dir"))
            .await
            .unwrap();
        let b = env
            .kms
            .add_elastic_key(&env.ctx, create("b", "HS256"))
            .await
            .unwrap();

        let keys = env
            .kms
            .get_elastic_keys(&env.ctx, ElasticKeyFilter::default())
            .await
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].elastic_key_id, a.elastic_key_id);
        assert_eq!(keys[1].elastic_key_id, b.elastic_key_id);
    }

    #[tokio::test]
    async fn filters_by_name_algorithm_and_flags() {
        let env = test_env();
        env.kms
            .add_elastic_key(&env.ctx, create("alpha", "A256GCM+dir"))
            .await
            .unwrap();
        env.kms
            .add_elastic_key(&env.ctx, create("beta", "ES256"))
            .await
            .unwrap();

        let by_name = env
            .kms
            .get_elastic_keys(
                &env.ctx,
                ElasticKeyFilter {
                    names: vec!["alpha".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "alpha");

        let by_alg = env
            .kms
            .get_elastic_keys(
                &env.ctx,
                ElasticKeyFilter {
                    algorithms: vec!["ES256".parse().unwrap()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_alg.len(), 1);
        assert_eq!(by_alg[0].name, "beta");

        let none = env
            .kms
            .get_elastic_keys(
                &env.ctx,
                ElasticKeyFilter {
                    import_allowed: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn paging_boundaries() {
        let env = test_env();
        for name in ["one", "two", "three"] {
            env.kms
                .add_elastic_key(&env.ctx, create(name, "A256GCM+dir"))
                .await
                .unwrap();
        }

        // Page 0 is the first page; size 1 yields one row per page.
        let page = |number| ElasticKeyFilter {
            page: Some(Page { number, size: 1 }),
            ..Default::default()
        };
        let first = env.kms.get_elastic_keys(&env.ctx, page(0)).await.unwrap();
        let second = env.kms.get_elastic_keys(&env.ctx, page(1)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].elastic_key_id, second[0].elastic_key_id);

        assert!(matches!(
            env.kms.get_elastic_keys(&env.ctx, page(-1)).await,
            Err(KmsError::InvalidInput(_))
        ));
        let zero_size = ElasticKeyFilter {
            page: Some(Page { number: 0, size: 0 }),
            ..Default::default()
        };
        assert!(matches!(
            env.kms.get_elastic_keys(&env.ctx, zero_size).await,
            Err(KmsError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn date_range_validation() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("k", "A256GCM+dir"))
            .await
            .unwrap();
        let id = key.elastic_key_id;
        let now = chrono::Utc::now().timestamp_millis();

        // min == max is accepted.
        env.kms
            .list_material_keys(
                &env.ctx,
                id,
                MaterialKeyFilter {
                    min_generate_date: Some(now - 1000),
                    max_generate_date: Some(now - 1000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            env.kms
                .list_material_keys(
                    &env.ctx,
                    id,
                    MaterialKeyFilter {
                        min_generate_date: Some(now),
                        max_generate_date: Some(now - 1),
                        ..Default::default()
                    },
                )
                .await,
            Err(KmsError::InvalidInput(_))
        ));
        assert!(matches!(
            env.kms
                .list_material_keys(
                    &env.ctx,
                    id,
                    MaterialKeyFilter {
                        min_generate_date: Some(now + 60_000),
                        ..Default::default()
                    },
                )
                .await,
            Err(KmsError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn zero_uuid_in_filter_is_invalid() {
        let env = test_env();
        // A nil id can only arrive through deserialized input.
        let nil: ElasticKeyId =
            serde_json::from_value(serde_json::json!("00000000-0000-0000-0000-000000000000"))
                .unwrap();
        let filter = ElasticKeyFilter {
            ids: vec![nil],
            ..Default::default()
        };
        assert!(matches!(
            env.kms.get_elastic_keys(&env.ctx, filter).await,
            Err(KmsError::InvalidInput(_))
        ));
    }

    // === Transactions ===

    #[tokio::test]
    async fn failed_transaction_leaves_no_rows() {
        let env = test_env();
        let tenant_id = env.ctx.tenant_id().unwrap();
        let key = ElasticKey {
            elastic_key_id: ElasticKeyId::generate(),
            tenant_id,
            name: "ghost".into(),
            description: String::new(),
            provider: Provider::Internal,
            algorithm: "A256GCM+dir".parse().unwrap(),
            versioning_allowed: true,
            import_allowed: false,
            status: KeyStatus::PendingGenerate,
        };

        let result: Result<(), KmsError> =
            env.repo
                .with_transaction(&env.ctx, TxMode::ReadWrite, |tx| {
                    tx.add_elastic_key(&key)?;
                    Err(KmsError::Internal("forced failure".into()))
                });
        assert!(result.is_err());

        let gone = env
            .repo
            .with_transaction(&env.ctx, TxMode::ReadOnly, |tx| {
                tx.get_elastic_key(tenant_id, key.elastic_key_id)
            });
        assert!(matches!(gone, Err(KmsError::NotFound(_))));
    }

    #[tokio::test]
    async fn panicking_transaction_rolls_back_and_rethrows() {
        let env = test_env();
        let tenant_id = env.ctx.tenant_id().unwrap();
        let key = ElasticKey {
            elastic_key_id: ElasticKeyId::generate(),
            tenant_id,
            name: "panic".into(),
            description: String::new(),
            provider: Provider::Internal,
            algorithm: "HS256".parse().unwrap(),
            versioning_allowed: true,
            import_allowed: false,
            status: KeyStatus::PendingGenerate,
        };

        let panicked = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), KmsError> =
                env.repo
                    .with_transaction(&env.ctx, TxMode::ReadWrite, |tx| {
                        tx.add_elastic_key(&key).unwrap();
                        panic!("unit of work exploded");
                    });
        }));
        assert!(panicked.is_err());

        let gone = env
            .repo
            .with_transaction(&env.ctx, TxMode::ReadOnly, |tx| {
                tx.get_elastic_key(tenant_id, key.elastic_key_id)
            });
        assert!(matches!(gone, Err(KmsError::NotFound(_))));
    }

    #[tokio::test]
    async fn read_only_transactions_reject_writes() {
        let env = test_env();
        let tenant_id = env.ctx.tenant_id().unwrap();
        let key = ElasticKey {
            elastic_key_id: ElasticKeyId::generate(),
            tenant_id,
            name: "ro".into(),
            description: String::new(),
            provider: Provider::Internal,
            algorithm: "HS256".parse().unwrap(),
            versioning_allowed: true,
            import_allowed: false,
            status: KeyStatus::PendingGenerate,
        };
        let result = env
            .repo
            .with_transaction(&env.ctx, TxMode::ReadOnly, |tx| tx.add_elastic_key(&key));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancelled_context_aborts_before_work() {
        let env = test_env();
        env.ctx.cancel();
        assert!(matches!(
            env.kms
                .get_elastic_keys(&env.ctx, ElasticKeyFilter::default())
                .await,
            Err(KmsError::Cancelled)
        ));
    }

    // === Barrier ===

    #[tokio::test]
    async fn barrier_seal_unseal_roundtrip_and_tamper() {
        let env = test_env();
        let sealed = env
            .repo
            .with_transaction(&env.ctx, TxMode::ReadWrite, |tx| {
                env.barrier.seal(tx, b"sensitive bytes", Some(b"binding"))
            })
            .unwrap();

        let opened = env
            .repo
            .with_transaction(&env.ctx, TxMode::ReadOnly, |tx| {
                env.barrier.unseal(tx, &sealed)
            })
            .unwrap();
        assert_eq!(opened, b"sensitive bytes");

        // One flipped byte at the tail lands in the tag.
        let mut tampered = sealed.clone();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
        let err = env
            .repo
            .with_transaction(&env.ctx, TxMode::ReadOnly, |tx| {
                env.barrier.unseal(tx, &tampered)
            })
            .unwrap_err();
        assert_eq!(err, KmsError::InvalidCiphertext);
    }

    #[tokio::test]
    async fn barrier_rejects_empty_content() {
        let env = test_env();
        let result = env
            .repo
            .with_transaction(&env.ctx, TxMode::ReadWrite, |tx| {
                env.barrier.seal(tx, b"", None)
            });
        assert!(matches!(result, Err(KmsError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn barrier_builds_one_key_per_tier_lazily() {
        let env = test_env();
        env.repo
            .with_transaction(&env.ctx, TxMode::ReadWrite, |tx| {
                env.barrier.seal(tx, b"first", None)
            })
            .unwrap();

        let (roots, intermediates, contents) = env
            .repo
            .with_transaction(&env.ctx, TxMode::ReadOnly, |tx| {
                Ok((
                    tx.barrier_keys(BarrierTier::Root)?,
                    tx.barrier_keys(BarrierTier::Intermediate)?,
                    tx.barrier_keys(BarrierTier::Content)?,
                ))
            })
            .unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(intermediates.len(), 1);
        assert_eq!(contents.len(), 1);
        // The chain is linked tier to tier.
        assert_eq!(contents[0].kek_uuid, intermediates[0].uuid);
        assert_eq!(intermediates[0].kek_uuid, roots[0].uuid);
    }

    #[tokio::test]
    async fn barrier_rotation_preserves_old_blobs() {
        let env = test_env();
        let first = env
            .repo
            .with_transaction(&env.ctx, TxMode::ReadWrite, |tx| {
                env.barrier.seal(tx, b"old generation", None)
            })
            .unwrap();

        env.repo
            .with_transaction(&env.ctx, TxMode::ReadWrite, |tx| {
                env.barrier.rotate_content_key(tx)
            })
            .unwrap();

        let second = env
            .repo
            .with_transaction(&env.ctx, TxMode::ReadWrite, |tx| {
                env.barrier.seal(tx, b"new generation", None)
            })
            .unwrap();

        assert_ne!(extract_kid(&first).unwrap(), extract_kid(&second).unwrap());
        for (blob, expected) in [
            (first, &b"old generation"[..]),
            (second, &b"new generation"[..]),
        ] {
            let opened = env
                .repo
                .with_transaction(&env.ctx, TxMode::ReadOnly, |tx| {
                    env.barrier.unseal(tx, &blob)
                })
                .unwrap();
            assert_eq!(opened, expected);
        }
    }

    #[tokio::test]
    async fn deleting_missing_barrier_key_is_noop() {
        let env = test_env();
        env.repo
            .with_transaction(&env.ctx, TxMode::ReadWrite, |tx| {
                tx.delete_barrier_key(BarrierTier::Content, uuid::Uuid::now_v7())
            })
            .unwrap();
    }

    // === Audit ===

    #[tokio::test]
    async fn operations_emit_audit_events() {
        let env = test_env();
        let key = env
            .kms
            .add_elastic_key(&env.ctx, create("audited", "A256GCM+dir"))
            .await
            .unwrap();
        env.kms
            .encrypt(&env.ctx, key.elastic_key_id, None, b"x")
            .await
            .unwrap();

        let events = env.audit.events_for_elastic_key(key.elastic_key_id).await;
        assert!(events
            .iter()
            .any(|e| e.action == AuditAction::ElasticKeyCreated && e.success));
        assert!(events
            .iter()
            .any(|e| e.action == AuditAction::EncryptPerformed && e.success));

        // Failures are recorded too.
        let _ = env
            .kms
            .decrypt(&env.ctx, key.elastic_key_id, b"garbage")
            .await;
        let events = env.audit.events_for_elastic_key(key.elastic_key_id).await;
        assert!(events
            .iter()
            .any(|e| e.action == AuditAction::DecryptPerformed && !e.success));
    }
}
