//! Cryptographic helpers for Sextant

pub mod hash;

pub use hash::{hmac_sha256, CredentialHasher, Digest256};
