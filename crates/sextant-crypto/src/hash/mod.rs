//! Hash utilities

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// A 256-bit digest
pub type Digest256 = [u8; 32];

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the concatenation of `parts`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Digest256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Derives fixed-size keys from a username and secret
///
/// Keyed with random bytes drawn at construction, so digests are not
/// comparable across processes and a leaked digest cannot be checked against
/// a password list offline.
pub struct CredentialHasher {
    key: [u8; 32],
}

impl CredentialHasher {
    pub fn new() -> Self {
        Self {
            key: rand::random(),
        }
    }

    pub fn digest(&self, username: &str, secret: &[u8]) -> Digest256 {
        let len = (username.len() as u64).to_be_bytes();
        hmac_sha256(&self.key, &[&len[..], username.as_bytes(), secret])
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new()
    }
}
