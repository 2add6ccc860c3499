//! # Rampart JOSE
//!
//! JOSE primitives for the Rampart KMS: key generation, content encryption,
//! and signatures, all addressed by a time-ordered `kid`.
//!
//! ## Quick Start
//!
//! ```rust
//! use rampart_jose::{generate_jwk, jwe, Algorithm};
//!
//! let alg: Algorithm = "A256GCM+dir".parse().unwrap();
//! let key = generate_jwk(&alg).unwrap();
//!
//! let ciphertext = jwe::encrypt(&key.private_jwk, b"secret", Some(b"ctx")).unwrap();
//! let plaintext = jwe::decrypt(std::slice::from_ref(&key.private_jwk), &ciphertext).unwrap();
//!
//! assert_eq!(plaintext, b"secret");
//! ```
//!
//! ## Properties
//!
//! - **Uniform errors**: every decrypt/verify failure is the same value
//! - **Context binding**: the caller context lives in the protected header,
//!   which is the associated data of the content encryption
//! - **`kid` addressing**: the protected header names the exact key version
//!   that produced a message
//!
//! ## What's NOT Provided
//!
//! - Key storage or lifecycle (see `rampart-kms`)
//! - JSON (non-compact) serialization
//! - Nested JWT handling

#![deny(unsafe_code)]

mod aead;
mod alg;
mod b64;
mod error;
mod header;
mod jwk;
mod kdf;

pub mod jwe;
pub mod jws;

pub use alg::{Algorithm, EncAlg, KeyMgmtAlg, SigAlg};
pub use error::{InvalidCiphertext, JoseError};
pub use header::{extract_kid, extract_kid_alg, Header};
pub use jwk::{generate_jwk, EcCurve, GeneratedJwk, Jwk, RSA_KEY_BITS};
