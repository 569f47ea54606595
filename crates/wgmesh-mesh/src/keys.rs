//! WireGuard key material
//!
//! Keys are x25519 keypairs carried as base64 strings, generated natively
//! with x25519-dalek. No `wg genkey` binary is needed, and there is no
//! all-zero "uninitialized" sentinel anywhere: a device without an identity
//! is represented as `None` by the read path.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use wgmesh_common::{Error, Result};

/// An x25519 keypair in base64 form.
#[derive(Debug, Clone)]
pub struct Keypair {
    /// Base64-encoded private key
    pub private: String,
    /// Base64-encoded public key, derived from the private key
    pub public: String,
}

impl Keypair {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            private: STANDARD.encode(secret.to_bytes()),
            public: STANDARD.encode(public.as_bytes()),
        }
    }

    /// Rebuild a keypair from an existing base64 private key.
    pub fn from_private(private: &str) -> Result<Self> {
        let secret = StaticSecret::from(decode_key(private)?);
        let public = PublicKey::from(&secret);
        Ok(Self {
            private: private.to_string(),
            public: STANDARD.encode(public.as_bytes()),
        })
    }
}

/// Decode a base64 key and check its length.
pub fn decode_key(key: &str) -> Result<[u8; 32]> {
    let bytes = STANDARD
        .decode(key.trim())
        .map_err(|e| Error::key(format!("not valid base64: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| Error::key(format!("expected 32 bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_are_44_char_base64() {
        let keys = Keypair::generate();
        assert_eq!(keys.private.len(), 44);
        assert_eq!(keys.public.len(), 44);
        assert_eq!(decode_key(&keys.private).unwrap().len(), 32);
        assert_eq!(decode_key(&keys.public).unwrap().len(), 32);
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_ne!(a.private, b.private);
    }

    #[test]
    fn test_public_key_is_derivable_from_private() {
        let keys = Keypair::generate();
        let rebuilt = Keypair::from_private(&keys.private).unwrap();
        assert_eq!(rebuilt.public, keys.public);
    }

    #[test]
    fn test_malformed_keys_are_rejected() {
        assert!(decode_key("not base64 at all!!").is_err());
        // valid base64 but the wrong length
        assert!(decode_key("AAAA").is_err());
    }
}
