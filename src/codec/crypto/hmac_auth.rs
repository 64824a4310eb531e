//! HMAC-SHA256 authentication for handshake frames.
//!
//! Handshake frames travel before a session key exists, so they are
//! authenticated (not encrypted) with a key derived from the local key.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::keys::KeyMaterial;
use super::HMAC_TAG_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Errors from HMAC operations
#[derive(Debug, Error)]
pub enum HmacError {
    /// Invalid key
    #[error("Invalid HMAC key: {0}")]
    InvalidKey(String),

    /// Tag verification failed
    #[error("HMAC verification failed")]
    VerificationFailed,

    /// Data too short
    #[error("Data too short for HMAC tag")]
    DataTooShort,
}

/// HMAC-SHA256 authenticator
#[derive(Debug)]
pub struct HmacAuth {
    key: KeyMaterial,
}

impl HmacAuth {
    /// Create a new HMAC authenticator with the given key
    pub fn new(key: KeyMaterial) -> Result<Self, HmacError> {
        if key.len() < 16 {
            return Err(HmacError::InvalidKey(format!(
                "Key too short: {} bytes (minimum 16)",
                key.len()
            )));
        }
        Ok(Self { key })
    }

    fn mac(&self) -> Result<HmacSha256, HmacError> {
        <HmacSha256 as Mac>::new_from_slice(self.key.as_bytes())
            .map_err(|e| HmacError::InvalidKey(e.to_string()))
    }

    /// Compute the tag over the concatenation of `parts`
    pub fn compute_tag(&self, parts: &[&[u8]]) -> Result<[u8; HMAC_TAG_SIZE], HmacError> {
        let mut mac = self.mac()?;
        for part in parts {
            mac.update(part);
        }
        let mut tag = [0u8; HMAC_TAG_SIZE];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }

    /// Verify a tag over the concatenation of `parts` in constant time
    pub fn verify_tag(&self, parts: &[&[u8]], tag: &[u8]) -> Result<(), HmacError> {
        let mut mac = self.mac()?;
        for part in parts {
            mac.update(part);
        }
        mac.verify_slice(tag)
            .map_err(|_| HmacError::VerificationFailed)
    }

    /// Returns `payload || tag(aad || payload)`
    pub fn sign(&self, payload: &[u8], aad: &[u8]) -> Result<Vec<u8>, HmacError> {
        let tag = self.compute_tag(&[aad, payload])?;
        let mut out = Vec::with_capacity(payload.len() + HMAC_TAG_SIZE);
        out.extend_from_slice(payload);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Verify `payload || tag` and return the payload
    pub fn verify(&self, signed: &[u8], aad: &[u8]) -> Result<Vec<u8>, HmacError> {
        if signed.len() < HMAC_TAG_SIZE {
            return Err(HmacError::DataTooShort);
        }
        let (payload, tag) = signed.split_at(signed.len() - HMAC_TAG_SIZE);
        self.verify_tag(&[aad, payload], tag)?;
        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> KeyMaterial {
        KeyMaterial::new(vec![7u8; 32])
    }

    #[test]
    fn test_hmac_sign_verify() {
        let auth = HmacAuth::new(test_key()).unwrap();
        let signed = auth.sign(b"{\"client_id\":\"x\"}", b"hdr").unwrap();
        assert_eq!(signed.len(), 17 + HMAC_TAG_SIZE);
        assert_eq!(auth.verify(&signed, b"hdr").unwrap(), b"{\"client_id\":\"x\"}");
    }

    #[test]
    fn test_hmac_tamper_detection() {
        let auth = HmacAuth::new(test_key()).unwrap();
        let mut signed = auth.sign(b"hello", b"hdr").unwrap();
        signed[0] ^= 0xFF;
        assert!(matches!(
            auth.verify(&signed, b"hdr"),
            Err(HmacError::VerificationFailed)
        ));
    }

    #[test]
    fn test_hmac_binds_aad() {
        let auth = HmacAuth::new(test_key()).unwrap();
        let signed = auth.sign(b"hello", b"hdr-a").unwrap();
        assert!(auth.verify(&signed, b"hdr-b").is_err());
    }

    #[test]
    fn test_hmac_wrong_key() {
        let a = HmacAuth::new(KeyMaterial::new(vec![1u8; 32])).unwrap();
        let b = HmacAuth::new(KeyMaterial::new(vec![2u8; 32])).unwrap();
        let signed = a.sign(b"hello", b"").unwrap();
        assert!(b.verify(&signed, b"").is_err());
    }

    #[test]
    fn test_hmac_parts_equal_concatenation() {
        let auth = HmacAuth::new(test_key()).unwrap();
        let split = auth.compute_tag(&[b"ab", b"cd"]).unwrap();
        let whole = auth.compute_tag(&[b"abcd"]).unwrap();
        assert_eq!(split, whole);
    }

    #[test]
    fn test_hmac_short_key_rejected() {
        assert!(HmacAuth::new(KeyMaterial::new(vec![0u8; 8])).is_err());
    }

    #[test]
    fn test_hmac_data_too_short() {
        let auth = HmacAuth::new(test_key()).unwrap();
        assert!(matches!(
            auth.verify(&[0u8; 4], b""),
            Err(HmacError::DataTooShort)
        ));
    }
}
