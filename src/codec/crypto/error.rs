//! Unified cryptographic error type.
//!
//! Aggregates the per-primitive errors so the chain survives into
//! [`RobovacError::Crypto`](crate::error::RobovacError::Crypto) via `#[source]`.

use thiserror::Error;

use super::aead::AeadError;
use super::exchange::KeyExchangeError;
use super::hmac_auth::HmacError;
use super::keys::KeyError;

/// Unified error type for all cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption/decryption error.
    #[error("AEAD: {0}")]
    Aead(#[source] AeadError),

    /// HMAC authentication error.
    #[error("HMAC: {0}")]
    Hmac(#[source] HmacError),

    /// Key material error (empty, too short, derivation).
    #[error("Key: {0}")]
    Key(#[source] KeyError),

    /// Key exchange error (X25519).
    #[error("Key exchange: {0}")]
    Exchange(#[source] KeyExchangeError),
}

impl From<AeadError> for CryptoError {
    fn from(err: AeadError) -> Self {
        CryptoError::Aead(err)
    }
}

impl From<HmacError> for CryptoError {
    fn from(err: HmacError) -> Self {
        CryptoError::Hmac(err)
    }
}

impl From<KeyError> for CryptoError {
    fn from(err: KeyError) -> Self {
        CryptoError::Key(err)
    }
}

impl From<KeyExchangeError> for CryptoError {
    fn from(err: KeyExchangeError) -> Self {
        CryptoError::Exchange(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_and_display() {
        let err: CryptoError = HmacError::VerificationFailed.into();
        assert!(matches!(err, CryptoError::Hmac(_)));
        assert!(err.to_string().contains("HMAC"));

        let err: CryptoError = KeyError::Empty.into();
        assert!(matches!(err, CryptoError::Key(_)));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let err: CryptoError = KeyExchangeError::NonContributory.into();
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Shared secret is not contributory"));
    }
}
