//! Value envelopes: ChaCha20-Poly1305 over (original path, value)
//!
//! Envelope format (binary):
//! ```text
//! [12 bytes: random nonce][ciphertext of: u32-BE path len || path || value][16 bytes: Poly1305 tag]
//! ```
//!
//! The original path travels inside the ciphertext, so enumeration can
//! report readable keys even though stored names are obfuscated.

use chacha20poly1305::{
    aead::{Aead, AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Width of the path length prefix.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Smallest well-formed envelope: nonce, tag and an empty-path prefix.
pub const MIN_ENVELOPE_SIZE: usize = NONCE_SIZE + TAG_SIZE + LEN_PREFIX_SIZE;

/// Seals and opens value envelopes under the value sub-key.
#[derive(Clone)]
pub struct ValueCipher {
    cipher: ChaCha20Poly1305,
}

impl ValueCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Seal `path` and `value` under a fresh random nonce.
    pub fn seal(&self, path: &str, value: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut out = Vec::with_capacity(MIN_ENVELOPE_SIZE + path.len() + value.len());
        out.extend_from_slice(&nonce);
        put_len32(&mut out, path.len())?;
        out.extend_from_slice(path.as_bytes());
        out.extend_from_slice(value);

        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut out[NONCE_SIZE..])
            .map_err(|_| CryptoError::Seal)?;
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Open an envelope, returning the embedded path and value.
    pub fn open(&self, envelope: &[u8]) -> CryptoResult<(String, Vec<u8>)> {
        if envelope.len() < MIN_ENVELOPE_SIZE {
            return Err(CryptoError::TooShort {
                len: envelope.len(),
                min: MIN_ENVELOPE_SIZE,
            });
        }

        let (nonce, sealed) = envelope.split_at(NONCE_SIZE);
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(nonce), sealed)
                .map_err(|_| CryptoError::Authentication)?,
        );

        let (path_len, rest) = take_len32(&plaintext)?;
        if rest.len() < path_len {
            return Err(CryptoError::Malformed("path length exceeds envelope"));
        }
        let (path, value) = rest.split_at(path_len);
        let path = std::str::from_utf8(path)
            .map_err(|_| CryptoError::Malformed("path is not UTF-8"))?
            .to_owned();
        Ok((path, value.to_vec()))
    }
}

impl std::fmt::Debug for ValueCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Append `len` as a 4-byte big-endian prefix.
fn put_len32(out: &mut Vec<u8>, len: usize) -> CryptoResult<()> {
    let len = u32::try_from(len).map_err(|_| CryptoError::PathTooLong(len))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Read a 4-byte big-endian prefix off the front of `buf`.
fn take_len32(buf: &[u8]) -> CryptoResult<(usize, &[u8])> {
    if buf.len() < LEN_PREFIX_SIZE {
        return Err(CryptoError::Malformed("missing path length"));
    }
    let (prefix, rest) = buf.split_at(LEN_PREFIX_SIZE);
    let mut raw = [0u8; LEN_PREFIX_SIZE];
    raw.copy_from_slice(prefix);
    Ok((u32::from_be_bytes(raw) as usize, rest))
}
