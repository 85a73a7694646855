//! Stream ciphers with per-direction initialization vectors
//!
//! A [`Cipher`] holds the method and the derived master key; it is shared by
//! the listener. Every accepted connection asks it for a fresh
//! [`CipherState`], whose two halves own the keystream cursors of the two
//! directions. Nothing mutable is ever shared between connections.

use super::{bytes_to_key, random_bytes, CryptoError, MAX_IV_LEN};
use aes::{Aes128, Aes256};
use bytes::BytesMut;
use cfb_mode::{BufDecryptor, BufEncryptor};
use chacha20::ChaCha20;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Supported stream cipher methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherKind {
    Aes128Cfb,
    Aes256Cfb,
    Aes128Ctr,
    Aes256Ctr,
    ChaCha20Ietf,
}

impl CipherKind {
    /// All supported methods
    pub const ALL: [CipherKind; 5] = [
        CipherKind::Aes128Cfb,
        CipherKind::Aes256Cfb,
        CipherKind::Aes128Ctr,
        CipherKind::Aes256Ctr,
        CipherKind::ChaCha20Ietf,
    ];

    /// Method name as used in configuration files
    pub fn name(self) -> &'static str {
        match self {
            CipherKind::Aes128Cfb => "aes-128-cfb",
            CipherKind::Aes256Cfb => "aes-256-cfb",
            CipherKind::Aes128Ctr => "aes-128-ctr",
            CipherKind::Aes256Ctr => "aes-256-ctr",
            CipherKind::ChaCha20Ietf => "chacha20-ietf",
        }
    }

    /// Symmetric key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            CipherKind::Aes128Cfb | CipherKind::Aes128Ctr => 16,
            CipherKind::Aes256Cfb | CipherKind::Aes256Ctr | CipherKind::ChaCha20Ietf => 32,
        }
    }

    /// IV length in bytes, sent once at the start of each direction
    pub fn iv_len(self) -> usize {
        match self {
            CipherKind::ChaCha20Ietf => 12,
            _ => 16,
        }
    }
}

impl Default for CipherKind {
    fn default() -> Self {
        CipherKind::Aes256Cfb
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherKind {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        CipherKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| CryptoError::UnknownCipher(s.to_string()))
    }
}

/// Keystream of one direction
///
/// CFB mode encrypts and decrypts differently, so it has a variant per
/// direction; counter-mode ciphers use the same transform both ways.
pub enum Keystream {
    Aes128CfbEnc(BufEncryptor<Aes128>),
    Aes128CfbDec(BufDecryptor<Aes128>),
    Aes256CfbEnc(BufEncryptor<Aes256>),
    Aes256CfbDec(BufDecryptor<Aes256>),
    Aes128Ctr(Ctr128BE<Aes128>),
    Aes256Ctr(Ctr128BE<Aes256>),
    ChaCha20(ChaCha20),
}

impl Keystream {
    /// Transform `data` in place and advance the keystream cursor
    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            Keystream::Aes128CfbEnc(c) => c.encrypt(data),
            Keystream::Aes128CfbDec(c) => c.decrypt(data),
            Keystream::Aes256CfbEnc(c) => c.encrypt(data),
            Keystream::Aes256CfbDec(c) => c.decrypt(data),
            Keystream::Aes128Ctr(c) => c.apply_keystream(data),
            Keystream::Aes256Ctr(c) => c.apply_keystream(data),
            Keystream::ChaCha20(c) => c.apply_keystream(data),
        }
    }
}

impl fmt::Debug for Keystream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Keystream::Aes128CfbEnc(_) => "aes-128-cfb/enc",
            Keystream::Aes128CfbDec(_) => "aes-128-cfb/dec",
            Keystream::Aes256CfbEnc(_) => "aes-256-cfb/enc",
            Keystream::Aes256CfbDec(_) => "aes-256-cfb/dec",
            Keystream::Aes128Ctr(_) => "aes-128-ctr",
            Keystream::Aes256Ctr(_) => "aes-256-ctr",
            Keystream::ChaCha20(_) => "chacha20-ietf",
        };
        f.debug_tuple("Keystream").field(&name).finish()
    }
}

/// Cipher method plus master key; a factory of per-connection state
#[derive(Clone)]
pub struct Cipher {
    kind: CipherKind,
    key: Arc<[u8]>,
}

impl Cipher {
    /// Derive the master key for `kind` from the shared secret
    pub fn new(kind: CipherKind, password: &str) -> Result<Self, CryptoError> {
        if password.is_empty() {
            return Err(CryptoError::EmptySecret);
        }
        let key = bytes_to_key(password.as_bytes(), kind.key_len());
        Ok(Self {
            kind,
            key: key.into(),
        })
    }

    /// Use a raw key (must be exactly `kind.key_len()` bytes)
    pub fn with_key(kind: CipherKind, key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != kind.key_len() {
            return Err(CryptoError::InvalidLength);
        }
        Ok(Self {
            kind,
            key: key.into(),
        })
    }

    /// Cipher method
    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// IV length of the method
    pub fn iv_len(&self) -> usize {
        self.kind.iv_len()
    }

    /// Fresh, independently owned state for one connection
    pub fn new_state(&self) -> CipherState {
        CipherState {
            decrypt: DecryptState {
                cipher: self.clone(),
                keystream: None,
            },
            encrypt: EncryptState {
                cipher: self.clone(),
                keystream: None,
            },
        }
    }

    /// Keystream for the sending direction
    pub fn encryptor(&self, iv: &[u8]) -> Result<Keystream, CryptoError> {
        let key = &self.key[..];
        let ks = match self.kind {
            CipherKind::Aes128Cfb => Keystream::Aes128CfbEnc(new_keystream(key, iv)?),
            CipherKind::Aes256Cfb => Keystream::Aes256CfbEnc(new_keystream(key, iv)?),
            CipherKind::Aes128Ctr => Keystream::Aes128Ctr(new_keystream(key, iv)?),
            CipherKind::Aes256Ctr => Keystream::Aes256Ctr(new_keystream(key, iv)?),
            CipherKind::ChaCha20Ietf => Keystream::ChaCha20(new_keystream(key, iv)?),
        };
        Ok(ks)
    }

    /// Keystream for the receiving direction
    pub fn decryptor(&self, iv: &[u8]) -> Result<Keystream, CryptoError> {
        let key = &self.key[..];
        let ks = match self.kind {
            CipherKind::Aes128Cfb => Keystream::Aes128CfbDec(new_keystream(key, iv)?),
            CipherKind::Aes256Cfb => Keystream::Aes256CfbDec(new_keystream(key, iv)?),
            CipherKind::Aes128Ctr => Keystream::Aes128Ctr(new_keystream(key, iv)?),
            CipherKind::Aes256Ctr => Keystream::Aes256Ctr(new_keystream(key, iv)?),
            CipherKind::ChaCha20Ietf => Keystream::ChaCha20(new_keystream(key, iv)?),
        };
        Ok(ks)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

fn new_keystream<T: KeyIvInit>(key: &[u8], iv: &[u8]) -> Result<T, CryptoError> {
    T::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidLength)
}

/// Both directions of one connection
#[derive(Debug)]
pub struct CipherState {
    pub decrypt: DecryptState,
    pub encrypt: EncryptState,
}

impl CipherState {
    /// Separate the directions so two tasks can own one each
    pub fn split(self) -> (DecryptState, EncryptState) {
        (self.decrypt, self.encrypt)
    }
}

/// Receiving direction: waits for the peer's IV, then decrypts
#[derive(Debug)]
pub struct DecryptState {
    cipher: Cipher,
    keystream: Option<Keystream>,
}

impl DecryptState {
    /// Number of IV bytes the peer sends first
    pub fn iv_len(&self) -> usize {
        self.cipher.iv_len()
    }

    /// Whether the peer's IV has been consumed
    pub fn is_initialized(&self) -> bool {
        self.keystream.is_some()
    }

    /// Start the keystream from the peer's IV. Only the first call counts.
    pub fn init(&mut self, iv: &[u8]) -> Result<(), CryptoError> {
        if iv.len() != self.iv_len() || iv.len() > MAX_IV_LEN {
            return Err(CryptoError::InvalidLength);
        }
        if self.keystream.is_none() {
            self.keystream = Some(self.cipher.decryptor(iv)?);
        }
        Ok(())
    }

    /// Decrypt ciphertext in place
    pub fn decrypt(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        let keystream = self.keystream.as_mut().ok_or(CryptoError::MissingIv)?;
        keystream.apply(data);
        Ok(())
    }
}

/// Sending direction: emits a random IV before the first ciphertext
#[derive(Debug)]
pub struct EncryptState {
    cipher: Cipher,
    keystream: Option<Keystream>,
}

impl EncryptState {
    /// Whether the IV has already gone out
    pub fn is_initialized(&self) -> bool {
        self.keystream.is_some()
    }

    /// Append the ciphertext of `plain` to `out`, prefixed by the IV on the
    /// first call only
    pub fn encrypt_into(&mut self, plain: &[u8], out: &mut BytesMut) -> Result<(), CryptoError> {
        let keystream = match self.keystream.as_mut() {
            Some(ks) => ks,
            None => {
                let mut iv = vec![0u8; self.cipher.iv_len()];
                random_bytes(&mut iv)?;
                let ks = self.cipher.encryptor(&iv)?;
                out.extend_from_slice(&iv);
                self.keystream.insert(ks)
            }
        };

        let start = out.len();
        out.extend_from_slice(plain);
        keystream.apply(&mut out[start..]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method_names() {
        for kind in CipherKind::ALL {
            assert_eq!(kind.name().parse::<CipherKind>().unwrap(), kind);
        }
        assert_eq!("AES-256-CFB".parse::<CipherKind>().unwrap(), CipherKind::Aes256Cfb);
        assert!(matches!(
            "rc4-md5".parse::<CipherKind>(),
            Err(CryptoError::UnknownCipher(_))
        ));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            Cipher::new(CipherKind::Aes256Cfb, ""),
            Err(CryptoError::EmptySecret)
        ));
        assert!(matches!(
            Cipher::with_key(CipherKind::Aes256Ctr, &[0u8; 16]),
            Err(CryptoError::InvalidLength)
        ));
    }

    #[test]
    fn test_iv_is_sent_once() {
        let cipher = Cipher::new(CipherKind::Aes256Cfb, "secret").unwrap();
        let mut state = cipher.new_state();

        let mut out = BytesMut::new();
        state.encrypt.encrypt_into(b"hello", &mut out).unwrap();
        assert_eq!(out.len(), 16 + 5);

        out.clear();
        state.encrypt.encrypt_into(b"world", &mut out).unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_chunked_stream_decrypts_in_one_go() {
        let message: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();

        for kind in CipherKind::ALL {
            let cipher = Cipher::new(kind, "correct horse").unwrap();
            let (_, mut sender) = cipher.new_state().split();
            let (mut receiver, _) = cipher.new_state().split();

            // Odd chunk sizes cross CFB block boundaries
            let mut wire = BytesMut::new();
            for chunk in message.chunks(37) {
                sender.encrypt_into(chunk, &mut wire).unwrap();
            }

            let iv_len = kind.iv_len();
            let (iv, body) = wire.split_at_mut(iv_len);
            assert_ne!(&body[..], &message[..], "{} produced plaintext", kind);

            receiver.init(iv).unwrap();
            receiver.decrypt(body).unwrap();
            assert_eq!(&body[..], &message[..], "{} did not round trip", kind);
        }
    }

    #[test]
    fn test_states_are_independent() {
        let cipher = Cipher::new(CipherKind::ChaCha20Ietf, "secret").unwrap();
        let mut a = cipher.new_state();
        let mut b = cipher.new_state();

        let mut out_a = BytesMut::new();
        let mut out_b = BytesMut::new();
        a.encrypt.encrypt_into(b"same", &mut out_a).unwrap();
        b.encrypt.encrypt_into(b"same", &mut out_b).unwrap();

        // Fresh random IV per connection
        assert_ne!(out_a, out_b);
    }

    #[test]
    fn test_decrypt_requires_iv() {
        let cipher = Cipher::new(CipherKind::Aes128Ctr, "secret").unwrap();
        let (mut receiver, _) = cipher.new_state().split();
        assert!(!receiver.is_initialized());
        assert!(matches!(
            receiver.decrypt(&mut [0u8; 4]),
            Err(CryptoError::MissingIv)
        ));
        assert!(matches!(
            receiver.init(&[0u8; 3]),
            Err(CryptoError::InvalidLength)
        ));
    }
}
