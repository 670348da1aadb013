//! sealkv-crypto: ciphers behind the sealkv encrypted path store
//!
//! Every path segment becomes an opaque, re-derivable name and every value
//! becomes a sealed envelope carrying its own original path.
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, caller-supplied)
//!   └── BLAKE3 derive-key XOF (label fixed per segment scheme)
//!       ├── Segment key: AES-256-SIV (fixed nonce) or keyed BLAKE3 digest
//!       └── Value key:   ChaCha20-Poly1305 (nonce = random 96-bit per write)
//! ```

pub mod encryptor;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod segment;

pub use encryptor::{Encryptor, SegmentScheme};
pub use envelope::{ValueCipher, MIN_ENVELOPE_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use keys::MasterKey;
pub use segment::SegmentCipher;

/// Size of a master key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
