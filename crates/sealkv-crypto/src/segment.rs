//! Path segment ciphers
//!
//! A segment name must be re-derivable from its plaintext: descending
//! `a/b/c` recomputes the stored name of `a`, then `b`, then `c`, and never
//! trial-decrypts siblings. Both schemes are deterministic under one key.
//!
//! - `Siv`: AES-256-SIV with a fixed derived nonce. Reversible and
//!   authenticated; equal segments anywhere in the keyspace share a name.
//! - `Digest`: keyed BLAKE3. One-way; names can only be shown as hex.

use aes_siv::{
    aead::{Aead, KeyInit},
    Aes256SivAead, Nonce,
};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// AES-256-SIV takes two 256-bit sub-keys.
pub const SIV_KEY_SIZE: usize = 64;

/// Size of the fixed nonce fed to AES-SIV.
pub const SIV_NONCE_SIZE: usize = 16;

/// Size of an AES-SIV synthetic IV, prepended to every sealed segment.
pub const SIV_TAG_SIZE: usize = 16;

/// Size of a keyed-digest segment name.
pub const DIGEST_SIZE: usize = 32;

pub enum SegmentCipher {
    Siv {
        key: Zeroizing<[u8; SIV_KEY_SIZE]>,
        nonce: [u8; SIV_NONCE_SIZE],
    },
    Digest {
        key: Zeroizing<[u8; KEY_SIZE]>,
    },
}

impl SegmentCipher {
    /// Whether stored names can be turned back into plaintext.
    pub fn is_reversible(&self) -> bool {
        matches!(self, Self::Siv { .. })
    }

    /// Compute the stored name of one plaintext segment.
    pub fn encrypt(&self, segment: &str) -> CryptoResult<Vec<u8>> {
        match self {
            Self::Siv { key, nonce } => {
                let key: &[u8; SIV_KEY_SIZE] = key;
                let cipher = Aes256SivAead::new(key.into());
                cipher
                    .encrypt(Nonce::from_slice(nonce), segment.as_bytes())
                    .map_err(|_| CryptoError::Seal)
            }
            Self::Digest { key } => {
                let key: &[u8; KEY_SIZE] = key;
                Ok(blake3::keyed_hash(key, segment.as_bytes()).as_bytes().to_vec())
            }
        }
    }

    /// Recover the plaintext segment behind a stored name.
    pub fn decrypt(&self, name: &[u8]) -> CryptoResult<String> {
        match self {
            Self::Siv { key, nonce } => {
                if name.len() < SIV_TAG_SIZE {
                    return Err(CryptoError::TooShort {
                        len: name.len(),
                        min: SIV_TAG_SIZE,
                    });
                }
                let key: &[u8; SIV_KEY_SIZE] = key;
                let cipher = Aes256SivAead::new(key.into());
                let plaintext = cipher
                    .decrypt(Nonce::from_slice(nonce), name)
                    .map_err(|_| CryptoError::Authentication)?;
                String::from_utf8(plaintext)
                    .map_err(|_| CryptoError::Malformed("segment is not UTF-8"))
            }
            Self::Digest { .. } => Err(CryptoError::Irreversible),
        }
    }

    /// Human-facing form of a stored name: the plaintext segment when the
    /// scheme is reversible, lower-case hex otherwise.
    pub fn display_name(&self, name: &[u8]) -> CryptoResult<String> {
        if self.is_reversible() {
            self.decrypt(name)
        } else {
            Ok(hex::encode(name))
        }
    }
}

impl std::fmt::Debug for SegmentCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self {
            Self::Siv { .. } => "siv",
            Self::Digest { .. } => "digest",
        };
        f.debug_struct("SegmentCipher")
            .field("scheme", &scheme)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn siv(fill: u8) -> SegmentCipher {
        SegmentCipher::Siv {
            key: Zeroizing::new([fill; SIV_KEY_SIZE]),
            nonce: [fill ^ 0x5A; SIV_NONCE_SIZE],
        }
    }

    fn digest(fill: u8) -> SegmentCipher {
        SegmentCipher::Digest {
            key: Zeroizing::new([fill; KEY_SIZE]),
        }
    }

    #[test]
    fn test_siv_roundtrip() {
        let cipher = siv(0x55);
        let name = cipher.encrypt("users").unwrap();
        assert_eq!(cipher.decrypt(&name).unwrap(), "users");
    }

    #[test]
    fn test_siv_deterministic() {
        let cipher = siv(0x55);
        assert_eq!(
            cipher.encrypt("report.pdf").unwrap(),
            cipher.encrypt("report.pdf").unwrap(),
            "AES-SIV must be deterministic"
        );
    }

    #[test]
    fn test_siv_hides_plaintext() {
        let cipher = siv(0x55);
        let name = cipher.encrypt("confidential").unwrap();
        assert_eq!(name.len(), SIV_TAG_SIZE + "confidential".len());
        assert!(!name
            .windows("confidential".len())
            .any(|w| w == b"confidential"));
    }

    #[test]
    fn test_siv_different_segments_differ() {
        let cipher = siv(0x55);
        assert_ne!(
            cipher.encrypt("file_a").unwrap(),
            cipher.encrypt("file_b").unwrap()
        );
    }

    #[test]
    fn test_siv_wrong_key() {
        let name = siv(0x11).encrypt("secret").unwrap();
        assert_eq!(
            siv(0x22).decrypt(&name).unwrap_err(),
            CryptoError::Authentication
        );
    }

    #[test]
    fn test_siv_tampered_name() {
        let cipher = siv(0x55);
        let mut name = cipher.encrypt("secret").unwrap();
        let last = name.len() - 1;
        name[last] ^= 0x01;
        assert_eq!(
            cipher.decrypt(&name).unwrap_err(),
            CryptoError::Authentication
        );
    }

    #[test]
    fn test_siv_short_name() {
        let err = siv(0x55).decrypt(&[0u8; 4]).unwrap_err();
        assert_eq!(err, CryptoError::TooShort { len: 4, min: 16 });
    }

    #[test]
    fn test_siv_empty_segment() {
        let cipher = siv(0x55);
        let name = cipher.encrypt("").unwrap();
        assert_eq!(name.len(), SIV_TAG_SIZE);
        assert_eq!(cipher.decrypt(&name).unwrap(), "");
    }

    #[test]
    fn test_digest_deterministic_and_fixed_size() {
        let cipher = digest(0x33);
        let a = cipher.encrypt("users").unwrap();
        let b = cipher.encrypt("users").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DIGEST_SIZE);
        assert_eq!(cipher.encrypt("a-much-longer-segment-name").unwrap().len(), DIGEST_SIZE);
    }

    #[test]
    fn test_digest_keyed() {
        assert_ne!(
            digest(0x01).encrypt("users").unwrap(),
            digest(0x02).encrypt("users").unwrap()
        );
    }

    #[test]
    fn test_digest_is_one_way() {
        let cipher = digest(0x33);
        assert!(!cipher.is_reversible());
        let name = cipher.encrypt("users").unwrap();
        assert_eq!(cipher.decrypt(&name).unwrap_err(), CryptoError::Irreversible);
        assert_eq!(cipher.display_name(&name).unwrap(), hex::encode(&name));
    }

    #[test]
    fn test_display_name_reversible() {
        let cipher = siv(0x55);
        assert!(cipher.is_reversible());
        let name = cipher.encrypt("photos").unwrap();
        assert_eq!(cipher.display_name(&name).unwrap(), "photos");
    }

    proptest! {
        #[test]
        fn siv_roundtrip_any_segment(segment in "\\PC{0,48}") {
            let cipher = siv(0x55);
            let name = cipher.encrypt(&segment).unwrap();
            prop_assert_eq!(&name, &cipher.encrypt(&segment).unwrap());
            prop_assert_eq!(cipher.decrypt(&name).unwrap(), segment);
        }

        #[test]
        fn distinct_segments_get_distinct_names(a in "[a-z]{1,16}", b in "[a-z]{1,16}") {
            prop_assume!(a != b);
            for cipher in [siv(0x55), digest(0x33)] {
                prop_assert_ne!(cipher.encrypt(&a).unwrap(), cipher.encrypt(&b).unwrap());
            }
        }
    }
}
