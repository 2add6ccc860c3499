//! Content encryption: AES-GCM and the AES-CBC + HMAC composites.
//!
//! The CBC composites follow the encrypt-then-MAC construction: the content
//! key splits into a MAC half and an encryption half, the tag is the
//! truncated HMAC over `aad || iv || ciphertext || bitlen(aad)`.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{AesGcm, KeyInit};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::alg::EncAlg;
use crate::error::{InvalidCiphertext, JoseError};

type Aes128Gcm = AesGcm<Aes128, U12>;
type Aes192Gcm = AesGcm<Aes192, U12>;
type Aes256Gcm = AesGcm<Aes256, U12>;

pub(crate) const GCM_NONCE_BYTES: usize = 12;
pub(crate) const GCM_TAG_BYTES: usize = 16;
const CBC_IV_BYTES: usize = 16;

/// Parts of an encrypted content message.
pub(crate) struct EncryptedContent {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Random bytes for nonces and fresh content keys.
pub(crate) fn random_bytes(len: usize) -> Result<Vec<u8>, JoseError> {
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes).map_err(|_| JoseError::Encoding)?;
    Ok(bytes)
}

/// A fresh content-encryption key for `enc`.
pub(crate) fn random_cek(enc: EncAlg) -> Result<Zeroizing<Vec<u8>>, JoseError> {
    random_bytes(enc.key_len()).map(Zeroizing::new)
}

pub(crate) fn encrypt(
    enc: EncAlg,
    cek: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<EncryptedContent, JoseError> {
    if cek.len() != enc.key_len() {
        return Err(JoseError::InvalidKey);
    }
    match enc {
        EncAlg::A128Gcm => gcm_encrypt::<Aes128Gcm>(cek, plaintext, aad),
        EncAlg::A192Gcm => gcm_encrypt::<Aes192Gcm>(cek, plaintext, aad),
        EncAlg::A256Gcm => gcm_encrypt::<Aes256Gcm>(cek, plaintext, aad),
        EncAlg::A128CbcHs256 => cbc_hs_encrypt::<cbc::Encryptor<Aes128>, Hmac<Sha256>>(
            cek, plaintext, aad,
        ),
        EncAlg::A192CbcHs384 => cbc_hs_encrypt::<cbc::Encryptor<Aes192>, Hmac<Sha384>>(
            cek, plaintext, aad,
        ),
        EncAlg::A256CbcHs512 => cbc_hs_encrypt::<cbc::Encryptor<Aes256>, Hmac<Sha512>>(
            cek, plaintext, aad,
        ),
    }
}

pub(crate) fn decrypt(
    enc: EncAlg,
    cek: &[u8],
    content: &EncryptedContent,
    aad: &[u8],
) -> Result<Vec<u8>, InvalidCiphertext> {
    if cek.len() != enc.key_len() {
        return Err(InvalidCiphertext);
    }
    match enc {
        EncAlg::A128Gcm => gcm_decrypt::<Aes128Gcm>(cek, content, aad),
        EncAlg::A192Gcm => gcm_decrypt::<Aes192Gcm>(cek, content, aad),
        EncAlg::A256Gcm => gcm_decrypt::<Aes256Gcm>(cek, content, aad),
        EncAlg::A128CbcHs256 => {
            cbc_hs_decrypt::<cbc::Decryptor<Aes128>, Hmac<Sha256>>(cek, content, aad)
        }
        EncAlg::A192CbcHs384 => {
            cbc_hs_decrypt::<cbc::Decryptor<Aes192>, Hmac<Sha384>>(cek, content, aad)
        }
        EncAlg::A256CbcHs512 => {
            cbc_hs_decrypt::<cbc::Decryptor<Aes256>, Hmac<Sha512>>(cek, content, aad)
        }
    }
}

// ---------------------------------------------------------------------------
// AES-GCM
// ---------------------------------------------------------------------------

fn gcm_encrypt<C>(cek: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<EncryptedContent, JoseError>
where
    C: Aead + KeyInit + aes_gcm::aead::AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(cek).map_err(|_| JoseError::InvalidKey)?;
    let iv = random_bytes(GCM_NONCE_BYTES)?;
    let mut sealed = cipher
        .encrypt(
            GenericArray::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| JoseError::Encoding)?;
    let tag = sealed.split_off(sealed.len() - GCM_TAG_BYTES);
    Ok(EncryptedContent {
        iv,
        ciphertext: sealed,
        tag,
    })
}

fn gcm_decrypt<C>(
    cek: &[u8],
    content: &EncryptedContent,
    aad: &[u8],
) -> Result<Vec<u8>, InvalidCiphertext>
where
    C: Aead + KeyInit + aes_gcm::aead::AeadCore<NonceSize = U12>,
{
    if content.iv.len() != GCM_NONCE_BYTES || content.tag.len() != GCM_TAG_BYTES {
        return Err(InvalidCiphertext);
    }
    let cipher = C::new_from_slice(cek).map_err(|_| InvalidCiphertext)?;
    let mut sealed = Vec::with_capacity(content.ciphertext.len() + GCM_TAG_BYTES);
    sealed.extend_from_slice(&content.ciphertext);
    sealed.extend_from_slice(&content.tag);
    cipher
        .decrypt(
            GenericArray::from_slice(&content.iv),
            Payload {
                msg: &sealed,
                aad,
            },
        )
        .map_err(|_| InvalidCiphertext)
}

// ---------------------------------------------------------------------------
// AES-GCM key wrap (AxGCMKW)
// ---------------------------------------------------------------------------

/// Wrap a content key under an AES-GCM key-encryption key. The cipher is
/// chosen by KEK length. Returns `(iv, wrapped, tag)` for the header.
pub(crate) fn gcm_wrap(kek: &[u8], cek: &[u8]) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), JoseError> {
    let sealed = match kek.len() {
        16 => gcm_encrypt::<Aes128Gcm>(kek, cek, b"")?,
        24 => gcm_encrypt::<Aes192Gcm>(kek, cek, b"")?,
        32 => gcm_encrypt::<Aes256Gcm>(kek, cek, b"")?,
        _ => return Err(JoseError::InvalidKey),
    };
    Ok((sealed.iv, sealed.ciphertext, sealed.tag))
}

pub(crate) fn gcm_unwrap(
    kek: &[u8],
    iv: &[u8],
    wrapped: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, InvalidCiphertext> {
    let content = EncryptedContent {
        iv: iv.to_vec(),
        ciphertext: wrapped.to_vec(),
        tag: tag.to_vec(),
    };
    match kek.len() {
        16 => gcm_decrypt::<Aes128Gcm>(kek, &content, b""),
        24 => gcm_decrypt::<Aes192Gcm>(kek, &content, b""),
        32 => gcm_decrypt::<Aes256Gcm>(kek, &content, b""),
        _ => Err(InvalidCiphertext),
    }
}

// ---------------------------------------------------------------------------
// AES-CBC + HMAC
// ---------------------------------------------------------------------------

fn cbc_hs_tag<M>(mac_key: &[u8], aad: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, JoseError>
where
    M: Mac + KeyInit,
{
    let mut mac = <M as Mac>::new_from_slice(mac_key).map_err(|_| JoseError::InvalidKey)?;
    mac.update(aad);
    mac.update(iv);
    mac.update(ciphertext);
    mac.update(&((aad.len() as u64) * 8).to_be_bytes());
    let full = mac.finalize().into_bytes();
    // Truncate to half the digest, per the composite definition.
    Ok(full[..full.len() / 2].to_vec())
}

fn cbc_hs_encrypt<E, M>(cek: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<EncryptedContent, JoseError>
where
    E: BlockEncryptMut + KeyIvInit,
    M: Mac + KeyInit,
{
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let iv = random_bytes(CBC_IV_BYTES)?;
    let cipher = E::new_from_slices(enc_key, &iv).map_err(|_| JoseError::InvalidKey)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let tag = cbc_hs_tag::<M>(mac_key, aad, &iv, &ciphertext)?;
    Ok(EncryptedContent {
        iv,
        ciphertext,
        tag,
    })
}

fn cbc_hs_decrypt<D, M>(
    cek: &[u8],
    content: &EncryptedContent,
    aad: &[u8],
) -> Result<Vec<u8>, InvalidCiphertext>
where
    D: BlockDecryptMut + KeyIvInit,
    M: Mac + KeyInit,
{
    if content.iv.len() != CBC_IV_BYTES {
        return Err(InvalidCiphertext);
    }
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);

    // Authenticate before decrypting.
    let expected = cbc_hs_tag::<M>(mac_key, aad, &content.iv, &content.ciphertext)
        .map_err(|_| InvalidCiphertext)?;
    if expected.ct_eq(&content.tag).unwrap_u8() != 1 {
        return Err(InvalidCiphertext);
    }

    let cipher = D::new_from_slices(enc_key, &content.iv).map_err(|_| InvalidCiphertext)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&content.ciphertext)
        .map_err(|_| InvalidCiphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_enc_roundtrips() {
        for enc in EncAlg::ALL {
            let cek = random_cek(enc).unwrap();
            let sealed = encrypt(enc, &cek, b"content bytes", b"aad").unwrap();
            let opened = decrypt(enc, &cek, &sealed, b"aad").unwrap();
            assert_eq!(opened, b"content bytes", "enc {}", enc.name());
        }
    }

    #[test]
    fn wrong_aad_fails_uniformly() {
        for enc in EncAlg::ALL {
            let cek = random_cek(enc).unwrap();
            let sealed = encrypt(enc, &cek, b"content", b"good").unwrap();
            assert_eq!(decrypt(enc, &cek, &sealed, b"bad"), Err(InvalidCiphertext));
        }
    }

    #[test]
    fn tampered_tag_fails() {
        for enc in EncAlg::ALL {
            let cek = random_cek(enc).unwrap();
            let mut sealed = encrypt(enc, &cek, b"content", b"aad").unwrap();
            sealed.tag[0] ^= 0x01;
            assert_eq!(decrypt(enc, &cek, &sealed, b"aad"), Err(InvalidCiphertext));
        }
    }

    #[test]
    fn wrong_key_length_rejected() {
        let short = vec![0u8; 5];
        assert!(encrypt(EncAlg::A256Gcm, &short, b"x", b"").is_err());
        let sealed = EncryptedContent {
            iv: vec![0; 12],
            ciphertext: vec![0; 16],
            tag: vec![0; 16],
        };
        assert_eq!(
            decrypt(EncAlg::A256Gcm, &short, &sealed, b""),
            Err(InvalidCiphertext)
        );
    }
}
