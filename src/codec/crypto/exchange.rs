//! X25519 ephemeral key exchange for session establishment.
//!
//! Both ends generate a fresh key pair per connection attempt, so every
//! session gets an independent key even though the local key is static.

use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use super::keys::KeyMaterial;

/// Errors from key exchange operations
#[derive(Debug, Error)]
pub enum KeyExchangeError {
    /// Invalid public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Peer key produced an all-zero shared secret (low-order point)
    #[error("Shared secret is not contributory")]
    NonContributory,
}

/// X25519 public key (32 bytes)
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from a slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, KeyExchangeError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| {
            KeyExchangeError::InvalidPublicKey(format!("Expected 32 bytes, got {}", slice.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PublicKey([{:02x}{:02x}{:02x}{:02x}...])",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// X25519 key pair (private + public)
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_static(StaticSecret::random_from_rng(OsRng))
    }

    /// Create from a secret key (32 bytes)
    pub fn from_secret(secret_bytes: [u8; 32]) -> Self {
        Self::from_static(StaticSecret::from(secret_bytes))
    }

    fn from_static(secret: StaticSecret) -> Self {
        let public = X25519Public::from(&secret);
        Self {
            secret,
            public: PublicKey::from_bytes(public.to_bytes()),
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Perform Diffie-Hellman key exchange
    pub fn diffie_hellman(&self, peer_public: &PublicKey) -> Result<KeyMaterial, KeyExchangeError> {
        let peer = X25519Public::from(*peer_public.as_bytes());
        let shared = self.secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(KeyExchangeError::NonContributory);
        }
        Ok(KeyMaterial::new(shared.as_bytes().to_vec()))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diffie_hellman_symmetric() {
        let client = KeyPair::generate();
        let device = KeyPair::generate();

        let a = client.diffie_hellman(device.public_key()).unwrap();
        let b = device.diffie_hellman(client.public_key()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_key_pair_from_secret_is_stable() {
        let a = KeyPair::from_secret([9u8; 32]);
        let b = KeyPair::from_secret([9u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_low_order_point_rejected() {
        let pair = KeyPair::generate();
        let zero = PublicKey::from_bytes([0u8; 32]);
        assert!(matches!(
            pair.diffie_hellman(&zero),
            Err(KeyExchangeError::NonContributory)
        ));
    }

    #[test]
    fn test_public_key_from_slice() {
        assert!(PublicKey::from_slice(&[1u8; 32]).is_ok());
        assert!(PublicKey::from_slice(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let pair = KeyPair::from_secret([0xAB; 32]);
        assert!(format!("{pair:?}").contains("REDACTED"));
    }
}
