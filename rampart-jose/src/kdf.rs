//! Concat KDF for ECDH-ES key agreement.
//!
//! Single-step KDF (NIST SP 800-56A §5.8.1) over SHA-256:
//!
//! ```text
//! otherinfo = len32(alg_id) || alg_id || len32(0) || len32(0) || keybits32
//! block_i   = SHA-256(counter_i || Z || otherinfo)      counter from 1
//! key       = block_1 || block_2 || ... truncated to key_len
//! ```
//!
//! The algorithm id is the `enc` name for direct ECDH-ES and the `alg` name
//! for the ECDH-ES+AxKW variants.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

pub(crate) fn concat_kdf(z: &[u8], alg_id: &str, key_len: usize) -> Zeroizing<Vec<u8>> {
    let mut otherinfo = Vec::with_capacity(alg_id.len() + 16);
    otherinfo.extend_from_slice(&(alg_id.len() as u32).to_be_bytes());
    otherinfo.extend_from_slice(alg_id.as_bytes());
    otherinfo.extend_from_slice(&0u32.to_be_bytes()); // PartyUInfo
    otherinfo.extend_from_slice(&0u32.to_be_bytes()); // PartyVInfo
    otherinfo.extend_from_slice(&((key_len as u32) * 8).to_be_bytes());

    let rounds = key_len.div_ceil(32);
    let mut out = Zeroizing::new(Vec::with_capacity(rounds * 32));
    for counter in 1..=rounds as u32 {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(z);
        hasher.update(&otherinfo);
        out.extend_from_slice(&hasher.finalize());
    }
    out.truncate(key_len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_length_matches_request() {
        for len in [16, 24, 32, 48, 64] {
            assert_eq!(concat_kdf(b"shared-secret", "A256GCM", len).len(), len);
        }
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let a = concat_kdf(b"z", "A128KW", 16);
        let b = concat_kdf(b"z", "A128KW", 16);
        assert_eq!(*a, *b);
    }

    #[test]
    fn alg_id_separates_outputs() {
        let a = concat_kdf(b"z", "A128KW", 16);
        let b = concat_kdf(b"z", "A256GCM", 16);
        assert_ne!(*a, *b);
    }

    #[test]
    fn long_outputs_span_hash_blocks() {
        let long = concat_kdf(b"z", "A256CBC-HS512", 64);
        let short = concat_kdf(b"z", "A256CBC-HS512", 32);
        assert_eq!(long[..32], short[..]);
        assert_ne!(long[..32], long[32..]);
    }
}
