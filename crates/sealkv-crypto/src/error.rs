use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("master key must be {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },

    #[error("envelope too short: {len} bytes (minimum {min})")]
    TooShort { len: usize, min: usize },

    #[error("authentication failed: wrong key or corrupted data")]
    Authentication,

    #[error("malformed plaintext: {0}")]
    Malformed(&'static str),

    #[error("path too long to frame: {0} bytes")]
    PathTooLong(usize),

    #[error("segment names are one-way digests and cannot be decrypted")]
    Irreversible,

    #[error("sealing failed")]
    Seal,
}
