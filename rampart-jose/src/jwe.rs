//! JWE compact serialization: encrypt and decrypt.
//!
//! The protected header carries `alg`, `enc`, `kid`, and optionally `ctx`
//! (caller context), `epk` (ECDH), or `iv`/`tag` (GCM key wrap). The header
//! segment is the associated data of the content encryption, so any context
//! or header tamper is an authentication failure, not a parse error.

use crate::aead;
use crate::alg::{Algorithm, EncAlg, KeyMgmtAlg};
use crate::b64;
use crate::error::{InvalidCiphertext, JoseError};
use crate::header::{parse_protected, Header};
use crate::jwk::{
    ec_epk_jwk, ec_private_key, ec_public_key, rsa_private_key, rsa_public_key, EcCurve,
    EcPrivate, EcPublic, Jwk,
};
use crate::kdf::concat_kdf;
use aes::{Aes128, Aes192, Aes256};
use aes_kw::Kek;
use rand_core::OsRng;
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Encrypt `plaintext` under `jwk`, producing a compact JWE.
///
/// Asymmetric keys may be given in either public or private form; only the
/// public part is used. A supplied `context` is embedded in the protected
/// header and therefore bound as associated data.
pub fn encrypt(jwk: &Jwk, plaintext: &[u8], context: Option<&[u8]>) -> Result<Vec<u8>, JoseError> {
    let algorithm = jwk.algorithm()?;
    let (alg, enc) = match algorithm {
        Algorithm::Jwe { alg, enc } => (alg, enc),
        Algorithm::Jws(_) => return Err(JoseError::UnsupportedAlgorithm(algorithm.to_string())),
    };
    let kid = jwk.kid_uuid()?;

    let mut header = Header::new(alg.name());
    header.enc = Some(enc.name().to_string());
    header.kid = Some(kid.to_string());
    header.ctx = context.map(b64::encode);

    let (cek, encrypted_key) = wrap_cek(alg, enc, jwk, &mut header)?;

    let header_b64 = b64::encode(serde_json::to_vec(&header).map_err(|_| JoseError::Encoding)?);
    let sealed = aead::encrypt(enc, &cek, plaintext, header_b64.as_bytes())?;

    let compact = format!(
        "{}.{}.{}.{}.{}",
        header_b64,
        b64::encode(&encrypted_key),
        b64::encode(&sealed.iv),
        b64::encode(&sealed.ciphertext),
        b64::encode(&sealed.tag),
    );
    Ok(compact.into_bytes())
}

/// Decrypt a compact JWE, selecting the key whose `kid` matches the header.
///
/// Every failure mode collapses into [`JoseError::InvalidCiphertext`].
pub fn decrypt(keys: &[Jwk], jwe: &[u8]) -> Result<Vec<u8>, JoseError> {
    decrypt_inner(keys, jwe).map_err(JoseError::from)
}

fn decrypt_inner(keys: &[Jwk], jwe: &[u8]) -> Result<Vec<u8>, InvalidCiphertext> {
    let text = std::str::from_utf8(jwe).map_err(|_| InvalidCiphertext)?;
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 5 {
        return Err(InvalidCiphertext);
    }

    let header = parse_protected(jwe).map_err(|_| InvalidCiphertext)?;
    let kid = header.kid_uuid().map_err(|_| InvalidCiphertext)?;
    let jwk = keys
        .iter()
        .find(|k| k.kid_uuid().ok() == Some(kid))
        .ok_or(InvalidCiphertext)?;

    let alg = KeyMgmtAlg::from_name(&header.alg).ok_or(InvalidCiphertext)?;
    let enc = header
        .enc
        .as_deref()
        .and_then(EncAlg::from_name)
        .ok_or(InvalidCiphertext)?;

    let encrypted_key = b64::decode(parts[1]).map_err(|_| InvalidCiphertext)?;
    let sealed = aead::EncryptedContent {
        iv: b64::decode(parts[2]).map_err(|_| InvalidCiphertext)?,
        ciphertext: b64::decode(parts[3]).map_err(|_| InvalidCiphertext)?,
        tag: b64::decode(parts[4]).map_err(|_| InvalidCiphertext)?,
    };

    let cek = unwrap_cek(alg, enc, jwk, &header, &encrypted_key)?;

    // The associated data is the received header segment, verbatim.
    aead::decrypt(enc, &cek, &sealed, parts[0].as_bytes())
}

// ---------------------------------------------------------------------------
// Key management
// ---------------------------------------------------------------------------

fn wrap_cek(
    alg: KeyMgmtAlg,
    enc: EncAlg,
    jwk: &Jwk,
    header: &mut Header,
) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>), JoseError> {
    match alg {
        KeyMgmtAlg::Dir => {
            let cek = jwk.symmetric_key()?;
            if cek.len() != enc.key_len() {
                return Err(JoseError::InvalidKey);
            }
            Ok((cek, Vec::new()))
        }
        KeyMgmtAlg::A128Kw | KeyMgmtAlg::A192Kw | KeyMgmtAlg::A256Kw => {
            let kek = jwk.symmetric_key()?;
            expect_len(&kek, alg)?;
            let cek = aead::random_cek(enc)?;
            let wrapped = aes_wrap(&kek, &cek)?;
            Ok((cek, wrapped))
        }
        KeyMgmtAlg::A128GcmKw | KeyMgmtAlg::A192GcmKw | KeyMgmtAlg::A256GcmKw => {
            let kek = jwk.symmetric_key()?;
            expect_len(&kek, alg)?;
            let cek = aead::random_cek(enc)?;
            let (iv, wrapped, tag) = aead::gcm_wrap(&kek, &cek)?;
            header.iv = Some(b64::encode(iv));
            header.tag = Some(b64::encode(tag));
            Ok((cek, wrapped))
        }
        KeyMgmtAlg::RsaOaep | KeyMgmtAlg::RsaOaep256 => {
            let public = rsa_public_key(jwk)?;
            let cek = aead::random_cek(enc)?;
            let wrapped = match alg {
                KeyMgmtAlg::RsaOaep => public
                    .encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &cek)
                    .map_err(|_| JoseError::Encoding)?,
                _ => public
                    .encrypt(&mut OsRng, rsa::Oaep::new::<Sha256>(), &cek)
                    .map_err(|_| JoseError::Encoding)?,
            };
            Ok((cek, wrapped))
        }
        KeyMgmtAlg::EcdhEs => {
            let static_public = ec_public_key(jwk)?;
            let (ephemeral, epk) = ecdh_ephemeral(&static_public)?;
            let z = ecdh_z(&ephemeral, &static_public)?;
            header.epk = Some(ec_epk_jwk(&epk)?);
            let cek = concat_kdf(&z, enc.name(), enc.key_len());
            Ok((cek, Vec::new()))
        }
        KeyMgmtAlg::EcdhEsA128Kw | KeyMgmtAlg::EcdhEsA192Kw | KeyMgmtAlg::EcdhEsA256Kw => {
            let static_public = ec_public_key(jwk)?;
            let (ephemeral, epk) = ecdh_ephemeral(&static_public)?;
            let z = ecdh_z(&ephemeral, &static_public)?;
            header.epk = Some(ec_epk_jwk(&epk)?);
            let kek_len = alg.wrap_key_len().ok_or(JoseError::Encoding)?;
            let kek = concat_kdf(&z, alg.name(), kek_len);
            let cek = aead::random_cek(enc)?;
            let wrapped = aes_wrap(&kek, &cek)?;
            Ok((cek, wrapped))
        }
    }
}

fn unwrap_cek(
    alg: KeyMgmtAlg,
    enc: EncAlg,
    jwk: &Jwk,
    header: &Header,
    encrypted_key: &[u8],
) -> Result<Zeroizing<Vec<u8>>, InvalidCiphertext> {
    match alg {
        KeyMgmtAlg::Dir => {
            if !encrypted_key.is_empty() {
                return Err(InvalidCiphertext);
            }
            Ok(jwk.symmetric_key()?)
        }
        KeyMgmtAlg::A128Kw | KeyMgmtAlg::A192Kw | KeyMgmtAlg::A256Kw => {
            let kek = jwk.symmetric_key()?;
            expect_len(&kek, alg)?;
            aes_unwrap(&kek, encrypted_key)
        }
        KeyMgmtAlg::A128GcmKw | KeyMgmtAlg::A192GcmKw | KeyMgmtAlg::A256GcmKw => {
            let kek = jwk.symmetric_key()?;
            expect_len(&kek, alg)?;
            let iv = header
                .iv
                .as_deref()
                .and_then(|v| b64::decode(v).ok())
                .ok_or(InvalidCiphertext)?;
            let tag = header
                .tag
                .as_deref()
                .and_then(|v| b64::decode(v).ok())
                .ok_or(InvalidCiphertext)?;
            aead::gcm_unwrap(&kek, &iv, encrypted_key, &tag).map(Zeroizing::new)
        }
        KeyMgmtAlg::RsaOaep | KeyMgmtAlg::RsaOaep256 => {
            let private = rsa_private_key(jwk)?;
            let cek = match alg {
                KeyMgmtAlg::RsaOaep => private
                    .decrypt(rsa::Oaep::new::<Sha1>(), encrypted_key)
                    .map_err(|_| InvalidCiphertext)?,
                _ => private
                    .decrypt(rsa::Oaep::new::<Sha256>(), encrypted_key)
                    .map_err(|_| InvalidCiphertext)?,
            };
            Ok(Zeroizing::new(cek))
        }
        KeyMgmtAlg::EcdhEs => {
            if !encrypted_key.is_empty() {
                return Err(InvalidCiphertext);
            }
            let z = ecdh_header_z(jwk, header)?;
            Ok(concat_kdf(&z, enc.name(), enc.key_len()))
        }
        KeyMgmtAlg::EcdhEsA128Kw | KeyMgmtAlg::EcdhEsA192Kw | KeyMgmtAlg::EcdhEsA256Kw => {
            let z = ecdh_header_z(jwk, header)?;
            let kek_len = alg.wrap_key_len().ok_or(InvalidCiphertext)?;
            let kek = concat_kdf(&z, alg.name(), kek_len);
            aes_unwrap(&kek, encrypted_key)
        }
    }
}

fn expect_len(kek: &[u8], alg: KeyMgmtAlg) -> Result<(), JoseError> {
    if Some(kek.len()) == alg.wrap_key_len() {
        Ok(())
    } else {
        Err(JoseError::InvalidKey)
    }
}

// ---------------------------------------------------------------------------
// AES key wrap, cipher chosen by KEK length
// ---------------------------------------------------------------------------

fn aes_wrap(kek: &[u8], cek: &[u8]) -> Result<Vec<u8>, JoseError> {
    let mut out = vec![0u8; cek.len() + 8];
    match kek.len() {
        16 => Kek::<Aes128>::try_from(kek)
            .map_err(|_| JoseError::InvalidKey)?
            .wrap(cek, &mut out)
            .map_err(|_| JoseError::Encoding)?,
        24 => Kek::<Aes192>::try_from(kek)
            .map_err(|_| JoseError::InvalidKey)?
            .wrap(cek, &mut out)
            .map_err(|_| JoseError::Encoding)?,
        32 => Kek::<Aes256>::try_from(kek)
            .map_err(|_| JoseError::InvalidKey)?
            .wrap(cek, &mut out)
            .map_err(|_| JoseError::Encoding)?,
        _ => return Err(JoseError::InvalidKey),
    };
    Ok(out)
}

fn aes_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, InvalidCiphertext> {
    if wrapped.len() < 8 {
        return Err(InvalidCiphertext);
    }
    let mut cek = vec![0u8; wrapped.len() - 8];
    match kek.len() {
        16 => Kek::<Aes128>::try_from(kek)
            .map_err(|_| InvalidCiphertext)?
            .unwrap(wrapped, &mut cek)
            .map_err(|_| InvalidCiphertext)?,
        24 => Kek::<Aes192>::try_from(kek)
            .map_err(|_| InvalidCiphertext)?
            .unwrap(wrapped, &mut cek)
            .map_err(|_| InvalidCiphertext)?,
        32 => Kek::<Aes256>::try_from(kek)
            .map_err(|_| InvalidCiphertext)?
            .unwrap(wrapped, &mut cek)
            .map_err(|_| InvalidCiphertext)?,
        _ => return Err(InvalidCiphertext),
    };
    Ok(Zeroizing::new(cek))
}

// ---------------------------------------------------------------------------
// ECDH-ES agreement
// ---------------------------------------------------------------------------

fn ecdh_ephemeral(static_public: &EcPublic) -> Result<(EcPrivate, EcPublic), JoseError> {
    let curve = match static_public {
        EcPublic::P256(_) => EcCurve::P256,
        EcPublic::P384(_) => EcCurve::P384,
        EcPublic::P521(_) => EcCurve::P521,
    };
    Ok(match curve {
        EcCurve::P256 => {
            let sk = p256::SecretKey::random(&mut OsRng);
            let pk = sk.public_key();
            (EcPrivate::P256(sk), EcPublic::P256(pk))
        }
        EcCurve::P384 => {
            let sk = p384::SecretKey::random(&mut OsRng);
            let pk = sk.public_key();
            (EcPrivate::P384(sk), EcPublic::P384(pk))
        }
        EcCurve::P521 => {
            let sk = p521::SecretKey::random(&mut OsRng);
            let pk = sk.public_key();
            (EcPrivate::P521(sk), EcPublic::P521(pk))
        }
    })
}

fn ecdh_z(private: &EcPrivate, public: &EcPublic) -> Result<Zeroizing<Vec<u8>>, JoseError> {
    match (private, public) {
        (EcPrivate::P256(sk), EcPublic::P256(pk)) => Ok(Zeroizing::new(
            p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                .raw_secret_bytes()
                .to_vec(),
        )),
        (EcPrivate::P384(sk), EcPublic::P384(pk)) => Ok(Zeroizing::new(
            p384::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                .raw_secret_bytes()
                .to_vec(),
        )),
        (EcPrivate::P521(sk), EcPublic::P521(pk)) => Ok(Zeroizing::new(
            p521::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                .raw_secret_bytes()
                .to_vec(),
        )),
        _ => Err(JoseError::InvalidKey),
    }
}

/// Receiving side: agree with the header's ephemeral public key.
fn ecdh_header_z(jwk: &Jwk, header: &Header) -> Result<Zeroizing<Vec<u8>>, InvalidCiphertext> {
    let static_private = ec_private_key(jwk)?;
    let epk = header.epk.as_ref().ok_or(InvalidCiphertext)?;
    let ephemeral_public = ec_public_key(epk)?;
    Ok(ecdh_z(&static_private, &ephemeral_public)?)
}
