//! Cryptographic primitives for the relay
//!
//! This module provides:
//! - Stream ciphers (AES-CFB, AES-CTR, ChaCha20-IETF) with per-direction IVs
//! - `EVP_BytesToKey` style key derivation from the shared secret
//! - Secure random number generation

mod cipher;
mod kdf;

pub use cipher::{Cipher, CipherKind, CipherState, DecryptState, EncryptState, Keystream};
pub use kdf::bytes_to_key;

use thiserror::Error;

/// Largest IV of any supported cipher
pub const MAX_IV_LEN: usize = 16;

/// Largest key of any supported cipher
pub const MAX_KEY_LEN: usize = 32;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Unknown cipher method: {0}")]
    UnknownCipher(String),

    #[error("Invalid key or IV length")]
    InvalidLength,

    #[error("Empty shared secret")]
    EmptySecret,

    #[error("Keystream used before the IV was received")]
    MissingIv,

    #[error("Random number generator failure")]
    Random,
}

impl From<CryptoError> for std::io::Error {
    fn from(e: CryptoError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    }
}

/// Generate cryptographically secure random bytes
pub fn random_bytes(buf: &mut [u8]) -> Result<(), CryptoError> {
    use ring::rand::{SecureRandom, SystemRandom};
    SystemRandom::new().fill(buf).map_err(|_| CryptoError::Random)
}
