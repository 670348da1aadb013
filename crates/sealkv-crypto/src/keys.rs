//! Master key ownership and sub-key expansion
//!
//! All sub-keys come from one BLAKE3 XOF in key-derivation mode:
//! ```text
//! okm = BLAKE3-derive-key(context = label, key_material = master)[..n]
//! ```
//! The label is fixed per segment scheme, so the two schemes never share
//! key material even under the same master key.

use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// A caller-supplied 256-bit master key.
///
/// Never persisted. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copy a key out of an arbitrary slice, rejecting anything that is not
    /// exactly 32 bytes.
    pub fn try_from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::KeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Expand the master key into `N` bytes of sub-key material under `label`.
pub(crate) fn expand<const N: usize>(master: &MasterKey, label: &str) -> Zeroizing<[u8; N]> {
    let mut hasher = blake3::Hasher::new_derive_key(label);
    hasher.update(master.as_bytes());

    let mut okm = Zeroizing::new([0u8; N]);
    hasher.finalize_xof().fill(&mut okm[..]);
    okm
}

/// Split `N` bytes off the front of `material`.
pub(crate) fn take<const N: usize>(material: &mut &[u8]) -> Zeroizing<[u8; N]> {
    let current: &[u8] = *material;
    let (head, rest) = current.split_at(N);
    let mut out = Zeroizing::new([0u8; N]);
    out.copy_from_slice(head);
    *material = rest;
    out
}
