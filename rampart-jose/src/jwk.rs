//! JWK representation, generation, and key-material conversion.
//!
//! A [`Jwk`] is the single in-memory form for every key the service manages:
//! `oct` secrets, RSA and EC key pairs, and Ed25519 (`OKP`). The `alg` field
//! carries the combined [`Algorithm`] name (`A256GCM+dir`, `ES256`, ...) so a
//! key is always self-describing; the `kid` is the material-key id that ends
//! up in every message produced with the key.

use crate::alg::{Algorithm, EncAlg, KeyMgmtAlg, SigAlg};
use crate::b64;
use crate::error::JoseError;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use rand_core::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use zeroize::Zeroizing;

/// RSA modulus size used for all RSA algorithms.
pub const RSA_KEY_BITS: usize = 2048;

// ---------------------------------------------------------------------------
// JWK
// ---------------------------------------------------------------------------

/// A JSON Web Key. Optional fields are omitted from the serialized form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Symmetric secret (`oct`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    /// RSA modulus and public exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Private exponent (RSA) or private scalar (EC/OKP).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// RSA prime factors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// EC / OKP curve name and point coordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// Debug never prints secret fields.
impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("crv", &self.crv)
            .field("private", &self.is_private())
            .finish()
    }
}

impl Jwk {
    fn empty(kty: &str) -> Self {
        Jwk {
            kty: kty.to_string(),
            kid: None,
            alg: None,
            k: None,
            n: None,
            e: None,
            d: None,
            p: None,
            q: None,
            crv: None,
            x: None,
            y: None,
        }
    }

    /// Build an `oct` JWK from caller-supplied secret bytes.
    ///
    /// Used for externally provisioned symmetric keys (e.g. unseal keys)
    /// whose material is not generated here.
    pub fn new_oct(kid: Uuid, alg: &Algorithm, secret: &[u8]) -> Jwk {
        let mut jwk = Jwk::empty("oct");
        jwk.kid = Some(kid.to_string());
        jwk.alg = Some(alg.to_string());
        jwk.k = Some(b64::encode(secret));
        jwk
    }

    /// Parse a JWK from its JSON encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, JoseError> {
        serde_json::from_slice(bytes).map_err(|_| JoseError::InvalidKey)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, JoseError> {
        serde_json::to_vec(self).map_err(|_| JoseError::Encoding)
    }

    /// The `kid` parsed as a UUID.
    pub fn kid_uuid(&self) -> Result<Uuid, JoseError> {
        self.kid
            .as_deref()
            .and_then(|k| Uuid::from_str(k).ok())
            .ok_or(JoseError::InvalidKey)
    }

    /// The combined algorithm this key is bound to.
    pub fn algorithm(&self) -> Result<Algorithm, JoseError> {
        self.alg
            .as_deref()
            .ok_or(JoseError::InvalidKey)?
            .parse::<Algorithm>()
    }

    /// Whether this JWK carries private or secret material.
    pub fn is_private(&self) -> bool {
        self.d.is_some() || self.k.is_some()
    }

    /// The public counterpart, or `None` for symmetric keys.
    pub fn to_public(&self) -> Option<Jwk> {
        if self.kty == "oct" {
            return None;
        }
        let mut public = self.clone();
        public.d = None;
        public.p = None;
        public.q = None;
        public.k = None;
        Some(public)
    }

    /// Decode the `oct` secret.
    pub(crate) fn symmetric_key(&self) -> Result<Zeroizing<Vec<u8>>, JoseError> {
        if self.kty != "oct" {
            return Err(JoseError::InvalidKey);
        }
        let k = self.k.as_deref().ok_or(JoseError::InvalidKey)?;
        let bytes = b64::decode(k).map_err(|_| JoseError::InvalidKey)?;
        Ok(Zeroizing::new(bytes))
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Output of [`generate_jwk`]: the fresh key in both structured and
/// serialized form, keyed by a time-ordered `kid`.
pub struct GeneratedJwk {
    pub kid: Uuid,
    pub private_jwk: Jwk,
    /// `None` for symmetric algorithms.
    pub public_jwk: Option<Jwk>,
    /// JSON encoding of `private_jwk`, ready to hand to an envelope seal.
    pub private_bytes: Vec<u8>,
    pub public_bytes: Option<Vec<u8>>,
}

impl fmt::Debug for GeneratedJwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedJwk")
            .field("kid", &self.kid)
            .field("public", &self.public_jwk.is_some())
            .finish()
    }
}

/// Generate fresh key material for `alg` under a new time-ordered `kid`.
pub fn generate_jwk(alg: &Algorithm) -> Result<GeneratedJwk, JoseError> {
    let kid = Uuid::now_v7();
    let private_jwk = match alg {
        Algorithm::Jwe { alg: kma, enc } => match kma {
            KeyMgmtAlg::Dir => oct_jwk(kid, alg, enc.key_len())?,
            KeyMgmtAlg::A128Kw
            | KeyMgmtAlg::A192Kw
            | KeyMgmtAlg::A256Kw
            | KeyMgmtAlg::A128GcmKw
            | KeyMgmtAlg::A192GcmKw
            | KeyMgmtAlg::A256GcmKw => {
                let len = kma.wrap_key_len().ok_or(JoseError::Encoding)?;
                oct_jwk(kid, alg, len)?
            }
            KeyMgmtAlg::RsaOaep | KeyMgmtAlg::RsaOaep256 => rsa_jwk(kid, alg)?,
            KeyMgmtAlg::EcdhEs
            | KeyMgmtAlg::EcdhEsA128Kw
            | KeyMgmtAlg::EcdhEsA192Kw
            | KeyMgmtAlg::EcdhEsA256Kw => ec_jwk(kid, alg, EcCurve::P256)?,
        },
        Algorithm::Jws(sig) => match sig {
            SigAlg::Hs256 => oct_jwk(kid, alg, 32)?,
            SigAlg::Hs384 => oct_jwk(kid, alg, 48)?,
            SigAlg::Hs512 => oct_jwk(kid, alg, 64)?,
            SigAlg::Rs256 | SigAlg::Rs384 | SigAlg::Rs512 | SigAlg::Ps256 | SigAlg::Ps384
            | SigAlg::Ps512 => rsa_jwk(kid, alg)?,
            SigAlg::Es256 => ec_jwk(kid, alg, EcCurve::P256)?,
            SigAlg::Es384 => ec_jwk(kid, alg, EcCurve::P384)?,
            SigAlg::Es512 => ec_jwk(kid, alg, EcCurve::P521)?,
            SigAlg::EdDsa => ed25519_jwk(kid, alg)?,
        },
    };

    let public_jwk = private_jwk.to_public();
    let private_bytes = private_jwk.to_bytes()?;
    let public_bytes = match &public_jwk {
        Some(public) => Some(public.to_bytes()?),
        None => None,
    };

    Ok(GeneratedJwk {
        kid,
        private_jwk,
        public_jwk,
        private_bytes,
        public_bytes,
    })
}

fn oct_jwk(kid: Uuid, alg: &Algorithm, len: usize) -> Result<Jwk, JoseError> {
    let mut secret = Zeroizing::new(vec![0u8; len]);
    getrandom::getrandom(&mut secret).map_err(|_| JoseError::Encoding)?;
    let mut jwk = Jwk::empty("oct");
    jwk.kid = Some(kid.to_string());
    jwk.alg = Some(alg.to_string());
    jwk.k = Some(b64::encode(&secret));
    Ok(jwk)
}

fn rsa_jwk(kid: Uuid, alg: &Algorithm) -> Result<Jwk, JoseError> {
    let key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(|_| JoseError::Encoding)?;
    let primes = key.primes();
    if primes.len() != 2 {
        return Err(JoseError::Encoding);
    }
    let mut jwk = Jwk::empty("RSA");
    jwk.kid = Some(kid.to_string());
    jwk.alg = Some(alg.to_string());
    jwk.n = Some(b64::encode(key.n().to_bytes_be()));
    jwk.e = Some(b64::encode(key.e().to_bytes_be()));
    jwk.d = Some(b64::encode(key.d().to_bytes_be()));
    jwk.p = Some(b64::encode(primes[0].to_bytes_be()));
    jwk.q = Some(b64::encode(primes[1].to_bytes_be()));
    Ok(jwk)
}

fn ec_jwk(kid: Uuid, alg: &Algorithm, curve: EcCurve) -> Result<Jwk, JoseError> {
    let mut jwk = Jwk::empty("EC");
    jwk.kid = Some(kid.to_string());
    jwk.alg = Some(alg.to_string());
    jwk.crv = Some(curve.name().to_string());
    match curve {
        EcCurve::P256 => {
            let sk = p256::SecretKey::random(&mut OsRng);
            let point = sk.public_key().to_encoded_point(false);
            jwk.x = Some(b64::encode(point.x().ok_or(JoseError::Encoding)?));
            jwk.y = Some(b64::encode(point.y().ok_or(JoseError::Encoding)?));
            jwk.d = Some(b64::encode(sk.to_bytes()));
        }
        EcCurve::P384 => {
            let sk = p384::SecretKey::random(&mut OsRng);
            let point = sk.public_key().to_encoded_point(false);
            jwk.x = Some(b64::encode(point.x().ok_or(JoseError::Encoding)?));
            jwk.y = Some(b64::encode(point.y().ok_or(JoseError::Encoding)?));
            jwk.d = Some(b64::encode(sk.to_bytes()));
        }
        EcCurve::P521 => {
            let sk = p521::SecretKey::random(&mut OsRng);
            let point = sk.public_key().to_encoded_point(false);
            jwk.x = Some(b64::encode(point.x().ok_or(JoseError::Encoding)?));
            jwk.y = Some(b64::encode(point.y().ok_or(JoseError::Encoding)?));
            jwk.d = Some(b64::encode(sk.to_bytes()));
        }
    }
    Ok(jwk)
}

fn ed25519_jwk(kid: Uuid, alg: &Algorithm) -> Result<Jwk, JoseError> {
    let sk = ed25519_dalek::SigningKey::generate(&mut OsRng);
    let mut jwk = Jwk::empty("OKP");
    jwk.kid = Some(kid.to_string());
    jwk.alg = Some(alg.to_string());
    jwk.crv = Some("Ed25519".to_string());
    jwk.x = Some(b64::encode(sk.verifying_key().to_bytes()));
    jwk.d = Some(b64::encode(sk.to_bytes()));
    Ok(jwk)
}

// ---------------------------------------------------------------------------
// Material conversion (crate-internal, used by the JWE/JWS codecs)
// ---------------------------------------------------------------------------

/// Supported elliptic curves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    pub fn name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P384 => "P-384",
            EcCurve::P521 => "P-521",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "P-256" => Some(EcCurve::P256),
            "P-384" => Some(EcCurve::P384),
            "P-521" => Some(EcCurve::P521),
            _ => None,
        }
    }
}

pub(crate) enum EcPublic {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
    P521(p521::PublicKey),
}

pub(crate) enum EcPrivate {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
}

fn field(value: &Option<String>) -> Result<Vec<u8>, JoseError> {
    let encoded = value.as_deref().ok_or(JoseError::InvalidKey)?;
    b64::decode(encoded).map_err(|_| JoseError::InvalidKey)
}

pub(crate) fn rsa_public_key(jwk: &Jwk) -> Result<RsaPublicKey, JoseError> {
    if jwk.kty != "RSA" {
        return Err(JoseError::InvalidKey);
    }
    let n = rsa::BigUint::from_bytes_be(&field(&jwk.n)?);
    let e = rsa::BigUint::from_bytes_be(&field(&jwk.e)?);
    RsaPublicKey::new(n, e).map_err(|_| JoseError::InvalidKey)
}

pub(crate) fn rsa_private_key(jwk: &Jwk) -> Result<RsaPrivateKey, JoseError> {
    if jwk.kty != "RSA" {
        return Err(JoseError::InvalidKey);
    }
    let n = rsa::BigUint::from_bytes_be(&field(&jwk.n)?);
    let e = rsa::BigUint::from_bytes_be(&field(&jwk.e)?);
    let d = rsa::BigUint::from_bytes_be(&field(&jwk.d)?);
    let p = rsa::BigUint::from_bytes_be(&field(&jwk.p)?);
    let q = rsa::BigUint::from_bytes_be(&field(&jwk.q)?);
    RsaPrivateKey::from_components(n, e, d, vec![p, q]).map_err(|_| JoseError::InvalidKey)
}

pub(crate) fn ec_curve(jwk: &Jwk) -> Result<EcCurve, JoseError> {
    if jwk.kty != "EC" {
        return Err(JoseError::InvalidKey);
    }
    jwk.crv
        .as_deref()
        .and_then(EcCurve::from_name)
        .ok_or(JoseError::InvalidKey)
}

pub(crate) fn ec_public_key(jwk: &Jwk) -> Result<EcPublic, JoseError> {
    let curve = ec_curve(jwk)?;
    let x = field(&jwk.x)?;
    let y = field(&jwk.y)?;
    let coord_len = match curve {
        EcCurve::P256 => 32,
        EcCurve::P384 => 48,
        EcCurve::P521 => 66,
    };
    if x.len() != coord_len || y.len() != coord_len {
        return Err(JoseError::InvalidKey);
    }
    match curve {
        EcCurve::P256 => {
            let point = p256::EncodedPoint::from_affine_coordinates(
                p256::FieldBytes::from_slice(&x),
                p256::FieldBytes::from_slice(&y),
                false,
            );
            Option::from(p256::PublicKey::from_encoded_point(&point))
                .map(EcPublic::P256)
                .ok_or(JoseError::InvalidKey)
        }
        EcCurve::P384 => {
            let point = p384::EncodedPoint::from_affine_coordinates(
                p384::FieldBytes::from_slice(&x),
                p384::FieldBytes::from_slice(&y),
                false,
            );
            Option::from(p384::PublicKey::from_encoded_point(&point))
                .map(EcPublic::P384)
                .ok_or(JoseError::InvalidKey)
        }
        EcCurve::P521 => {
            let point = p521::EncodedPoint::from_affine_coordinates(
                p521::FieldBytes::from_slice(&x),
                p521::FieldBytes::from_slice(&y),
                false,
            );
            Option::from(p521::PublicKey::from_encoded_point(&point))
                .map(EcPublic::P521)
                .ok_or(JoseError::InvalidKey)
        }
    }
}

pub(crate) fn ec_private_key(jwk: &Jwk) -> Result<EcPrivate, JoseError> {
    let curve = ec_curve(jwk)?;
    let d = Zeroizing::new(field(&jwk.d)?);
    match curve {
        EcCurve::P256 => p256::SecretKey::from_slice(&d)
            .map(EcPrivate::P256)
            .map_err(|_| JoseError::InvalidKey),
        EcCurve::P384 => p384::SecretKey::from_slice(&d)
            .map(EcPrivate::P384)
            .map_err(|_| JoseError::InvalidKey),
        EcCurve::P521 => p521::SecretKey::from_slice(&d)
            .map(EcPrivate::P521)
            .map_err(|_| JoseError::InvalidKey),
    }
}

/// Build the ephemeral-public-key JWK embedded in ECDH-ES headers.
pub(crate) fn ec_epk_jwk(public: &EcPublic) -> Result<Jwk, JoseError> {
    let mut jwk = Jwk::empty("EC");
    match public {
        EcPublic::P256(pk) => {
            let point = pk.to_encoded_point(false);
            jwk.crv = Some(EcCurve::P256.name().to_string());
            jwk.x = Some(b64::encode(point.x().ok_or(JoseError::Encoding)?));
            jwk.y = Some(b64::encode(point.y().ok_or(JoseError::Encoding)?));
        }
        EcPublic::P384(pk) => {
            let point = pk.to_encoded_point(false);
            jwk.crv = Some(EcCurve::P384.name().to_string());
            jwk.x = Some(b64::encode(point.x().ok_or(JoseError::Encoding)?));
            jwk.y = Some(b64::encode(point.y().ok_or(JoseError::Encoding)?));
        }
        EcPublic::P521(pk) => {
            let point = pk.to_encoded_point(false);
            jwk.crv = Some(EcCurve::P521.name().to_string());
            jwk.x = Some(b64::encode(point.x().ok_or(JoseError::Encoding)?));
            jwk.y = Some(b64::encode(point.y().ok_or(JoseError::Encoding)?));
        }
    }
    Ok(jwk)
}

pub(crate) fn ed25519_signing_key(jwk: &Jwk) -> Result<ed25519_dalek::SigningKey, JoseError> {
    if jwk.kty != "OKP" || jwk.crv.as_deref() != Some("Ed25519") {
        return Err(JoseError::InvalidKey);
    }
    let d = Zeroizing::new(field(&jwk.d)?);
    let bytes: [u8; 32] = d.as_slice().try_into().map_err(|_| JoseError::InvalidKey)?;
    Ok(ed25519_dalek::SigningKey::from_bytes(&bytes))
}

pub(crate) fn ed25519_verifying_key(jwk: &Jwk) -> Result<ed25519_dalek::VerifyingKey, JoseError> {
    if jwk.kty != "OKP" || jwk.crv.as_deref() != Some("Ed25519") {
        return Err(JoseError::InvalidKey);
    }
    let x = field(&jwk.x)?;
    let bytes: [u8; 32] = x.as_slice().try_into().map_err(|_| JoseError::InvalidKey)?;
    ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| JoseError::InvalidKey)
}
