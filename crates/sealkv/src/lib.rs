//! sealkv: encrypted, path-addressed key-value storage
//!
//! Values are addressed by `/`-separated paths. Every segment but the last
//! names a bucket; the last names the value. Before anything reaches the
//! store:
//!
//! - each path segment is replaced by its deterministic ciphertext
//!   (AES-256-SIV) or keyed digest (BLAKE3), so lookups re-derive names
//!   instead of searching for them;
//! - each value is sealed with ChaCha20-Poly1305 together with its original
//!   path, so enumeration can report readable keys.
//!
//! The store underneath is redb: one writer, many snapshot readers, ACID
//! commits.
//!
//! ```no_run
//! use sealkv::{Db, Options};
//!
//! # fn main() -> sealkv::SealResult<()> {
//! let db = Db::open("vault.redb", &[7u8; 32], &Options::default())?;
//! db.set("users/1001/email", b"ada@example.org")?;
//! assert_eq!(db.get("users/1001/email")?.as_deref(), Some(&b"ada@example.org"[..]));
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
mod mapper;
mod store;
pub mod tx;

pub use config::Options;
pub use db::Db;
pub use error::{Error, Op, SealResult};
pub use sealkv_crypto::{CryptoError, SegmentScheme};
pub use store::FORMAT_VERSION;
pub use tx::{Kv, Transaction};
