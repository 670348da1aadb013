//! The per-database encryptor context
//!
//! One `Encryptor` is built when a database is opened and shared, read-only,
//! by every transaction on it. Nothing here is global: two databases in the
//! same process hold unrelated contexts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::envelope::ValueCipher;
use crate::error::CryptoResult;
use crate::keys::{expand, take, MasterKey};
use crate::segment::{SegmentCipher, SIV_KEY_SIZE, SIV_NONCE_SIZE};
use crate::KEY_SIZE;

const SIV_LABEL: &str = "sealkv 2026-01-15 siv segment and value keys";
const DIGEST_LABEL: &str = "sealkv 2026-01-15 digest segment and value keys";

/// How path segments become stored bucket and key names.
///
/// Fixed when a database file is created. Mixing schemes within one file
/// would make existing names unreachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentScheme {
    /// Deterministic AES-256-SIV. Names can be decrypted for `dir` listings.
    #[default]
    Siv,
    /// Keyed BLAKE3 digest. One-way; `dir` listings show hex identifiers.
    Digest,
}

impl SegmentScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Siv => "siv",
            Self::Digest => "digest",
        }
    }
}

impl fmt::Display for SegmentScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "siv" => Ok(Self::Siv),
            "digest" => Ok(Self::Digest),
            other => Err(format!("unknown segment scheme: {other} (expected siv or digest)")),
        }
    }
}

/// Segment and value ciphers derived from one master key.
#[derive(Debug)]
pub struct Encryptor {
    scheme: SegmentScheme,
    segments: SegmentCipher,
    values: ValueCipher,
}

impl Encryptor {
    pub fn new(master: &MasterKey, scheme: SegmentScheme) -> Self {
        let (segments, values) = match scheme {
            SegmentScheme::Siv => {
                let okm = expand::<{ SIV_KEY_SIZE + KEY_SIZE + SIV_NONCE_SIZE }>(master, SIV_LABEL);
                let mut material: &[u8] = &okm[..];
                let key = take::<SIV_KEY_SIZE>(&mut material);
                let value_key = take::<KEY_SIZE>(&mut material);
                let nonce = take::<SIV_NONCE_SIZE>(&mut material);
                (
                    SegmentCipher::Siv { key, nonce: *nonce },
                    ValueCipher::new(&value_key),
                )
            }
            SegmentScheme::Digest => {
                let okm = expand::<{ KEY_SIZE + KEY_SIZE }>(master, DIGEST_LABEL);
                let mut material: &[u8] = &okm[..];
                let key = take::<KEY_SIZE>(&mut material);
                let value_key = take::<KEY_SIZE>(&mut material);
                (SegmentCipher::Digest { key }, ValueCipher::new(&value_key))
            }
        };

        tracing::debug!(scheme = %scheme, "encryptor ready");
        Self {
            scheme,
            segments,
            values,
        }
    }

    pub fn scheme(&self) -> SegmentScheme {
        self.scheme
    }

    pub fn segments(&self) -> &SegmentCipher {
        &self.segments
    }

    /// Stored name of one plaintext path segment.
    pub fn encrypt_segment(&self, segment: &str) -> CryptoResult<Vec<u8>> {
        self.segments.encrypt(segment)
    }

    /// Plaintext (or hex, for one-way names) of a stored segment name.
    pub fn display_segment(&self, name: &[u8]) -> CryptoResult<String> {
        self.segments.display_name(name)
    }

    /// Seal the original path and value into one envelope.
    pub fn seal(&self, path: &str, value: &[u8]) -> CryptoResult<Vec<u8>> {
        self.values.seal(path, value)
    }

    /// Open an envelope into its original path and value.
    pub fn open(&self, envelope: &[u8]) -> CryptoResult<(String, Vec<u8>)> {
        self.values.open(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;

    fn master(fill: u8) -> MasterKey {
        MasterKey::from_bytes([fill; KEY_SIZE])
    }

    #[test]
    fn test_same_master_same_names() {
        let a = Encryptor::new(&master(7), SegmentScheme::Siv);
        let b = Encryptor::new(&master(7), SegmentScheme::Siv);
        assert_eq!(
            a.encrypt_segment("users").unwrap(),
            b.encrypt_segment("users").unwrap(),
            "reopening with the same key must find the same buckets"
        );
    }

    #[test]
    fn test_envelopes_cross_open_with_same_master() {
        let a = Encryptor::new(&master(7), SegmentScheme::Siv);
        let b = Encryptor::new(&master(7), SegmentScheme::Siv);
        let env = a.seal("x/y", b"v").unwrap();
        assert_eq!(b.open(&env).unwrap(), ("x/y".to_string(), b"v".to_vec()));
    }

    #[test]
    fn test_different_master_rejects() {
        let a = Encryptor::new(&master(7), SegmentScheme::Siv);
        let b = Encryptor::new(&master(8), SegmentScheme::Siv);
        assert_ne!(
            a.encrypt_segment("users").unwrap(),
            b.encrypt_segment("users").unwrap()
        );
        let env = a.seal("users", b"v").unwrap();
        assert_eq!(b.open(&env).unwrap_err(), CryptoError::Authentication);
    }

    #[test]
    fn test_schemes_use_separate_value_keys() {
        let siv = Encryptor::new(&master(7), SegmentScheme::Siv);
        let digest = Encryptor::new(&master(7), SegmentScheme::Digest);
        let env = siv.seal("k", b"v").unwrap();
        assert_eq!(digest.open(&env).unwrap_err(), CryptoError::Authentication);
    }

    #[test]
    fn test_digest_scheme_display() {
        let enc = Encryptor::new(&master(7), SegmentScheme::Digest);
        assert_eq!(enc.scheme(), SegmentScheme::Digest);
        let name = enc.encrypt_segment("photos").unwrap();
        assert_eq!(enc.display_segment(&name).unwrap(), hex::encode(&name));
    }

    #[test]
    fn test_scheme_parse_and_display() {
        for scheme in [SegmentScheme::Siv, SegmentScheme::Digest] {
            assert_eq!(scheme.to_string().parse::<SegmentScheme>().unwrap(), scheme);
        }
        assert!("aes".parse::<SegmentScheme>().is_err());
        assert_eq!(SegmentScheme::default(), SegmentScheme::Siv);
    }
}
