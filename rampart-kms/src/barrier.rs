//! Envelope barrier: seals arbitrary bytes under a three-tier key hierarchy.
//!
//! Root keys are wrapped by externally supplied unseal keys, intermediate
//! keys by the latest root, content keys by the latest intermediate. Content
//! is sealed as a JWE under the latest content key; the content-key id rides
//! in the JWE header so unseal can walk the exact chain that produced a
//! blob, however old. No unsealed key material outlives the transaction.

use crate::error::KmsError;
use crate::store::{BarrierKey, BarrierTier, Tx};
use rampart_jose::{extract_kid, generate_jwk, jwe, Algorithm, EncAlg, Jwk, KeyMgmtAlg};
use rand_core::{OsRng, RngCore};
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Every tier key and every sealed blob uses direct AES-256-GCM.
fn barrier_algorithm() -> Algorithm {
    Algorithm::Jwe {
        alg: KeyMgmtAlg::Dir,
        enc: EncAlg::A256Gcm,
    }
}

// ---------------------------------------------------------------------------
// Unseal keys
// ---------------------------------------------------------------------------

/// One externally provisioned 256-bit unseal key.
#[derive(Clone)]
pub struct UnsealKey {
    id: Uuid,
    jwk: Jwk,
}

impl UnsealKey {
    pub fn new(id: Uuid, secret: &[u8; 32]) -> Self {
        Self {
            id,
            jwk: Jwk::new_oct(id, &barrier_algorithm(), secret),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Debug never prints the key material.
impl fmt::Debug for UnsealKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsealKey").field("id", &self.id).finish()
    }
}

/// The ordered unseal-key bundle. The latest entry wraps new root keys; any
/// entry unwraps root keys that still reference it. Retiring an entry
/// invalidates those root keys.
#[derive(Clone)]
pub struct UnsealKeySet {
    keys: Vec<UnsealKey>,
}

impl UnsealKeySet {
    pub fn new(keys: Vec<UnsealKey>) -> Result<Self, KmsError> {
        if keys.is_empty() {
            return Err(KmsError::InvalidInput("unseal key set is empty".into()));
        }
        Ok(Self { keys })
    }

    /// Fresh random unseal keys, for development and tests.
    pub fn generate(count: usize) -> Result<Self, KmsError> {
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            let mut secret = Zeroizing::new([0u8; 32]);
            OsRng.fill_bytes(&mut *secret);
            keys.push(UnsealKey::new(Uuid::now_v7(), &secret));
        }
        Self::new(keys)
    }

    /// Append a rotated-in unseal key; it becomes the wrapping key for new
    /// root keys.
    pub fn append(&mut self, key: UnsealKey) {
        self.keys.push(key);
    }

    fn latest(&self) -> &UnsealKey {
        self.keys.last().expect("unseal key set is never empty")
    }

    fn by_id(&self, id: Uuid) -> Option<&UnsealKey> {
        self.keys.iter().find(|key| key.id == id)
    }
}

// ---------------------------------------------------------------------------
// Barrier
// ---------------------------------------------------------------------------

pub struct Barrier {
    unseal: UnsealKeySet,
}

impl Barrier {
    pub fn new(unseal: UnsealKeySet) -> Self {
        Self { unseal }
    }

    /// Seal `content` under the latest content key, creating the key chain
    /// lazily on first use. The content must be non-empty; the optional
    /// context is bound as associated data.
    pub fn seal(
        &self,
        tx: &Tx<'_>,
        content: &[u8],
        context: Option<&[u8]>,
    ) -> Result<Vec<u8>, KmsError> {
        if content.is_empty() {
            return Err(KmsError::InvalidInput("cannot seal empty content".into()));
        }
        let content_key = self.latest_content_key(tx)?;
        jwe::encrypt(&content_key, content, context).map_err(KmsError::from)
    }

    /// Unseal a blob by walking its exact chain: content key id from the
    /// header, then the wrapping intermediate, then the wrapping root, then
    /// the unseal key that root references.
    pub fn unseal(&self, tx: &Tx<'_>, sealed: &[u8]) -> Result<Vec<u8>, KmsError> {
        let content_key_id = extract_kid(sealed).map_err(|_| KmsError::InvalidCiphertext)?;
        let row = tx
            .get_barrier_key(BarrierTier::Content, content_key_id)?
            .ok_or(KmsError::NotFound("barrier content key"))?;
        let content_key = self.unwrap_content_key(tx, &row)?;
        jwe::decrypt(std::slice::from_ref(&content_key), sealed).map_err(KmsError::from)
    }

    // -- Rotation -----------------------------------------------------------
    //
    // Rotation appends; old tier keys stay so that blobs sealed under them
    // remain unsealable.

    pub fn rotate_root_key(&self, tx: &Tx<'_>) -> Result<Uuid, KmsError> {
        let jwk = self.create_root_key(tx)?;
        Ok(jwk.kid_uuid()?)
    }

    pub fn rotate_intermediate_key(&self, tx: &Tx<'_>) -> Result<Uuid, KmsError> {
        let root = self.latest_root_key(tx)?;
        let jwk = self.create_wrapped_key(tx, BarrierTier::Intermediate, &root)?;
        Ok(jwk.kid_uuid()?)
    }

    pub fn rotate_content_key(&self, tx: &Tx<'_>) -> Result<Uuid, KmsError> {
        let intermediate = self.latest_intermediate_key(tx)?;
        let jwk = self.create_wrapped_key(tx, BarrierTier::Content, &intermediate)?;
        Ok(jwk.kid_uuid()?)
    }

    // -- Chain walking ------------------------------------------------------

    fn latest_content_key(&self, tx: &Tx<'_>) -> Result<Jwk, KmsError> {
        if let Some(row) = tx.latest_barrier_key(BarrierTier::Content)? {
            return self.unwrap_content_key(tx, &row);
        }
        let intermediate = self.latest_intermediate_key(tx)?;
        self.create_wrapped_key(tx, BarrierTier::Content, &intermediate)
    }

    fn latest_intermediate_key(&self, tx: &Tx<'_>) -> Result<Jwk, KmsError> {
        if let Some(row) = tx.latest_barrier_key(BarrierTier::Intermediate)? {
            let root = self.unwrap_root_for(tx, row.kek_uuid)?;
            return decode_jwk(&jwe::decrypt(std::slice::from_ref(&root), &row.encrypted)?);
        }
        let root = self.latest_root_key(tx)?;
        self.create_wrapped_key(tx, BarrierTier::Intermediate, &root)
    }

    fn latest_root_key(&self, tx: &Tx<'_>) -> Result<Jwk, KmsError> {
        if let Some(row) = tx.latest_barrier_key(BarrierTier::Root)? {
            return self.unwrap_root_row(&row);
        }
        self.create_root_key(tx)
    }

    fn unwrap_content_key(&self, tx: &Tx<'_>, row: &BarrierKey) -> Result<Jwk, KmsError> {
        let intermediate_row = tx
            .get_barrier_key(BarrierTier::Intermediate, row.kek_uuid)?
            .ok_or(KmsError::NotFound("barrier intermediate key"))?;
        let root = self.unwrap_root_for(tx, intermediate_row.kek_uuid)?;
        let intermediate = decode_jwk(&jwe::decrypt(
            std::slice::from_ref(&root),
            &intermediate_row.encrypted,
        )?)?;
        decode_jwk(&jwe::decrypt(
            std::slice::from_ref(&intermediate),
            &row.encrypted,
        )?)
    }

    fn unwrap_root_for(&self, tx: &Tx<'_>, root_uuid: Uuid) -> Result<Jwk, KmsError> {
        let row = tx
            .get_barrier_key(BarrierTier::Root, root_uuid)?
            .ok_or(KmsError::NotFound("barrier root key"))?;
        self.unwrap_root_row(&row)
    }

    fn unwrap_root_row(&self, row: &BarrierKey) -> Result<Jwk, KmsError> {
        let unseal = self
            .unseal
            .by_id(row.kek_uuid)
            .ok_or(KmsError::NotFound("unseal key"))?;
        decode_jwk(&jwe::decrypt(
            std::slice::from_ref(&unseal.jwk),
            &row.encrypted,
        )?)
    }

    // -- Tier creation ------------------------------------------------------

    fn create_root_key(&self, tx: &Tx<'_>) -> Result<Jwk, KmsError> {
        let unseal = self.unseal.latest();
        let fresh = generate_jwk(&barrier_algorithm())?;
        let encrypted = jwe::encrypt(&unseal.jwk, &fresh.private_bytes, None)?;
        tx.add_barrier_key(
            BarrierTier::Root,
            &BarrierKey {
                uuid: fresh.kid,
                encrypted,
                kek_uuid: unseal.id,
            },
        )?;
        Ok(fresh.private_jwk)
    }

    fn create_wrapped_key(
        &self,
        tx: &Tx<'_>,
        tier: BarrierTier,
        parent: &Jwk,
    ) -> Result<Jwk, KmsError> {
        let fresh = generate_jwk(&barrier_algorithm())?;
        let encrypted = jwe::encrypt(parent, &fresh.private_bytes, None)?;
        tx.add_barrier_key(
            tier,
            &BarrierKey {
                uuid: fresh.kid,
                encrypted,
                kek_uuid: parent.kid_uuid()?,
            },
        )?;
        Ok(fresh.private_jwk)
    }
}

fn decode_jwk(bytes: &[u8]) -> Result<Jwk, KmsError> {
    Jwk::from_bytes(bytes).map_err(KmsError::from)
}
