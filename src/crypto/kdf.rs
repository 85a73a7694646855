//! Key derivation
//!
//! Stream-cipher clients derive their key from the shared secret with the
//! classic OpenSSL `EVP_BytesToKey` (MD5, one iteration, no salt). Matching it
//! keeps the wire format interoperable.

use md5::{Digest, Md5};

/// Stretch `password` into `key_len` bytes.
///
/// Block `i` is `md5(block[i-1] || password)`, with an empty block before the
/// first. Blocks are concatenated and truncated to `key_len`.
pub fn bytes_to_key(password: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        let block = hasher.finalize();

        key.extend_from_slice(&block);
        prev = block.to_vec();
    }

    key.truncate(key_len);
    key
}
