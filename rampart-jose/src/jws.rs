//! JWS compact serialization: sign and verify.
//!
//! The signing input is `b64(header) || '.' || b64(payload)`; the header
//! carries `alg` and `kid`. Verification selects the key by `kid` and
//! returns the payload only when the signature holds. All verify-path
//! failures collapse into the uniform invalid-ciphertext error.

use crate::alg::{Algorithm, SigAlg};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use crate::b64;
use crate::error::{InvalidCiphertext, JoseError};
use crate::header::{parse_protected, Header};
use crate::jwk::{
    ec_private_key, ec_public_key, ed25519_signing_key, ed25519_verifying_key, rsa_private_key,
    rsa_public_key, EcPrivate, EcPublic, Jwk,
};
use hmac::{Hmac, Mac};
use rand_core::OsRng;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

/// Sign `payload` with the private or secret `jwk`, producing a compact JWS.
pub fn sign(jwk: &Jwk, payload: &[u8]) -> Result<Vec<u8>, JoseError> {
    let algorithm = jwk.algorithm()?;
    let sig_alg = match algorithm {
        Algorithm::Jws(sig) => sig,
        Algorithm::Jwe { .. } => {
            return Err(JoseError::UnsupportedAlgorithm(algorithm.to_string()))
        }
    };
    let kid = jwk.kid_uuid()?;

    let mut header = Header::new(sig_alg.name());
    header.kid = Some(kid.to_string());
    let header_b64 = b64::encode(serde_json::to_vec(&header).map_err(|_| JoseError::Encoding)?);
    let payload_b64 = b64::encode(payload);
    let signing_input = format!("{}.{}", header_b64, payload_b64);

    let signature = sign_raw(sig_alg, jwk, signing_input.as_bytes())?;
    Ok(format!("{}.{}", signing_input, b64::encode(signature)).into_bytes())
}

/// Verify a compact JWS against the `kid`-selected key, returning the payload.
pub fn verify(keys: &[Jwk], jws: &[u8]) -> Result<Vec<u8>, JoseError> {
    verify_inner(keys, jws).map_err(JoseError::from)
}

fn verify_inner(keys: &[Jwk], jws: &[u8]) -> Result<Vec<u8>, InvalidCiphertext> {
    let text = std::str::from_utf8(jws).map_err(|_| InvalidCiphertext)?;
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 3 {
        return Err(InvalidCiphertext);
    }

    let header = parse_protected(jws).map_err(|_| InvalidCiphertext)?;
    let kid = header.kid_uuid().map_err(|_| InvalidCiphertext)?;
    let jwk = keys
        .iter()
        .find(|k| k.kid_uuid().ok() == Some(kid))
        .ok_or(InvalidCiphertext)?;
    let sig_alg = SigAlg::from_name(&header.alg).ok_or(InvalidCiphertext)?;

    let signing_input = format!("{}.{}", parts[0], parts[1]);
    let signature = b64::decode(parts[2]).map_err(|_| InvalidCiphertext)?;

    verify_raw(sig_alg, jwk, signing_input.as_bytes(), &signature)?;
    b64::decode(parts[1]).map_err(|_| InvalidCiphertext)
}

// ---------------------------------------------------------------------------
// Per-algorithm signing
// ---------------------------------------------------------------------------

fn sign_raw(alg: SigAlg, jwk: &Jwk, input: &[u8]) -> Result<Vec<u8>, JoseError> {
    match alg {
        SigAlg::Hs256 | SigAlg::Hs384 | SigAlg::Hs512 => {
            let secret = jwk.symmetric_key()?;
            hmac_tag(alg, &secret, input)
        }
        SigAlg::Rs256 => {
            let key = rsa::pkcs1v15::SigningKey::<Sha256>::new(rsa_private_key(jwk)?);
            Ok(key.sign(input).to_vec())
        }
        SigAlg::Rs384 => {
            let key = rsa::pkcs1v15::SigningKey::<Sha384>::new(rsa_private_key(jwk)?);
            Ok(key.sign(input).to_vec())
        }
        SigAlg::Rs512 => {
            let key = rsa::pkcs1v15::SigningKey::<Sha512>::new(rsa_private_key(jwk)?);
            Ok(key.sign(input).to_vec())
        }
        SigAlg::Ps256 => {
            let key = rsa::pss::SigningKey::<Sha256>::new(rsa_private_key(jwk)?);
            Ok(key.sign_with_rng(&mut OsRng, input).to_vec())
        }
        SigAlg::Ps384 => {
            let key = rsa::pss::SigningKey::<Sha384>::new(rsa_private_key(jwk)?);
            Ok(key.sign_with_rng(&mut OsRng, input).to_vec())
        }
        SigAlg::Ps512 => {
            let key = rsa::pss::SigningKey::<Sha512>::new(rsa_private_key(jwk)?);
            Ok(key.sign_with_rng(&mut OsRng, input).to_vec())
        }
        SigAlg::Es256 | SigAlg::Es384 | SigAlg::Es512 => ec_sign(jwk, input),
        SigAlg::EdDsa => {
            use ed25519_dalek::Signer as _;
            let key = ed25519_signing_key(jwk)?;
            Ok(key.sign(input).to_bytes().to_vec())
        }
    }
}

fn hmac_tag(alg: SigAlg, secret: &[u8], input: &[u8]) -> Result<Vec<u8>, JoseError> {
    match alg {
        SigAlg::Hs256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(secret).map_err(|_| JoseError::InvalidKey)?;
            mac.update(input);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        SigAlg::Hs384 => {
            let mut mac =
                Hmac::<Sha384>::new_from_slice(secret).map_err(|_| JoseError::InvalidKey)?;
            mac.update(input);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        SigAlg::Hs512 => {
            let mut mac =
                Hmac::<Sha512>::new_from_slice(secret).map_err(|_| JoseError::InvalidKey)?;
            mac.update(input);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        _ => Err(JoseError::InvalidKey),
    }
}

fn ec_sign(jwk: &Jwk, input: &[u8]) -> Result<Vec<u8>, JoseError> {
    match ec_private_key(jwk)? {
        EcPrivate::P256(sk) => {
            let key = p256::ecdsa::SigningKey::from(&sk);
            let signature: p256::ecdsa::Signature = key.sign(input);
            Ok(signature.to_bytes().to_vec())
        }
        EcPrivate::P384(sk) => {
            let key = p384::ecdsa::SigningKey::from(&sk);
            let signature: p384::ecdsa::Signature = key.sign(input);
            Ok(signature.to_bytes().to_vec())
        }
        EcPrivate::P521(sk) => {
            let key = p521::ecdsa::SigningKey::from_bytes(&sk.to_bytes())
                .map_err(|_| JoseError::InvalidKey)?;
            let signature: p521::ecdsa::Signature = key.sign(input);
            Ok(signature.to_bytes().to_vec())
        }
    }
}

// ---------------------------------------------------------------------------
// Per-algorithm verification
// ---------------------------------------------------------------------------

fn verify_raw(
    alg: SigAlg,
    jwk: &Jwk,
    input: &[u8],
    signature: &[u8],
) -> Result<(), InvalidCiphertext> {
    match alg {
        SigAlg::Hs256 | SigAlg::Hs384 | SigAlg::Hs512 => {
            let secret = jwk.symmetric_key()?;
            let expected = hmac_tag(alg, &secret, input)?;
            if expected.ct_eq(signature).unwrap_u8() == 1 {
                Ok(())
            } else {
                Err(InvalidCiphertext)
            }
        }
        SigAlg::Rs256 => {
            let key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(rsa_public_key(jwk)?);
            let sig = rsa::pkcs1v15::Signature::try_from(signature)
                .map_err(|_| InvalidCiphertext)?;
            key.verify(input, &sig).map_err(|_| InvalidCiphertext)
        }
        SigAlg::Rs384 => {
            let key = rsa::pkcs1v15::VerifyingKey::<Sha384>::new(rsa_public_key(jwk)?);
            let sig = rsa::pkcs1v15::Signature::try_from(signature)
                .map_err(|_| InvalidCiphertext)?;
            key.verify(input, &sig).map_err(|_| InvalidCiphertext)
        }
        SigAlg::Rs512 => {
            let key = rsa::pkcs1v15::VerifyingKey::<Sha512>::new(rsa_public_key(jwk)?);
            let sig = rsa::pkcs1v15::Signature::try_from(signature)
                .map_err(|_| InvalidCiphertext)?;
            key.verify(input, &sig).map_err(|_| InvalidCiphertext)
        }
        SigAlg::Ps256 => {
            let key = rsa::pss::VerifyingKey::<Sha256>::new(rsa_public_key(jwk)?);
            let sig = rsa::pss::Signature::try_from(signature).map_err(|_| InvalidCiphertext)?;
            key.verify(input, &sig).map_err(|_| InvalidCiphertext)
        }
        SigAlg::Ps384 => {
            let key = rsa::pss::VerifyingKey::<Sha384>::new(rsa_public_key(jwk)?);
            let sig = rsa::pss::Signature::try_from(signature).map_err(|_| InvalidCiphertext)?;
            key.verify(input, &sig).map_err(|_| InvalidCiphertext)
        }
        SigAlg::Ps512 => {
            let key = rsa::pss::VerifyingKey::<Sha512>::new(rsa_public_key(jwk)?);
            let sig = rsa::pss::Signature::try_from(signature).map_err(|_| InvalidCiphertext)?;
            key.verify(input, &sig).map_err(|_| InvalidCiphertext)
        }
        SigAlg::Es256 | SigAlg::Es384 | SigAlg::Es512 => ec_verify(jwk, input, signature),
        SigAlg::EdDsa => {
            use ed25519_dalek::Verifier as _;
            let key = ed25519_verifying_key(jwk)?;
            let bytes: [u8; 64] = signature.try_into().map_err(|_| InvalidCiphertext)?;
            let sig = ed25519_dalek::Signature::from_bytes(&bytes);
            key.verify(input, &sig).map_err(|_| InvalidCiphertext)
        }
    }
}

fn ec_verify(jwk: &Jwk, input: &[u8], signature: &[u8]) -> Result<(), InvalidCiphertext> {
    match ec_public_key(jwk)? {
        EcPublic::P256(pk) => {
            let key = p256::ecdsa::VerifyingKey::from(&pk);
            let sig =
                p256::ecdsa::Signature::from_slice(signature).map_err(|_| InvalidCiphertext)?;
            key.verify(input, &sig).map_err(|_| InvalidCiphertext)
        }
        EcPublic::P384(pk) => {
            let key = p384::ecdsa::VerifyingKey::from(&pk);
            let sig =
                p384::ecdsa::Signature::from_slice(signature).map_err(|_| InvalidCiphertext)?;
            key.verify(input, &sig).map_err(|_| InvalidCiphertext)
        }
        EcPublic::P521(pk) => {
            let key = p521::ecdsa::VerifyingKey::from_encoded_point(&pk.to_encoded_point(false))
                .map_err(|_| InvalidCiphertext)?;
            let sig =
                p521::ecdsa::Signature::from_slice(signature).map_err(|_| InvalidCiphertext)?;
            key.verify(input, &sig).map_err(|_| InvalidCiphertext)
        }
    }
}
