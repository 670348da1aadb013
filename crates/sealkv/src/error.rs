use std::fmt;
use std::path::PathBuf;

use sealkv_crypto::{CryptoError, SegmentScheme};
use thiserror::Error;

pub type SealResult<T> = Result<T, Error>;

/// The operation an error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Set,
    SetMany,
    Del,
    DelMany,
    All,
    AllKeys,
    Dir,
    Begin,
    Commit,
    Rollback,
    Backup,
    Close,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Get => "get",
            Op::Set => "set",
            Op::SetMany => "set-many",
            Op::Del => "del",
            Op::DelMany => "del-many",
            Op::All => "all",
            Op::AllKeys => "all-keys",
            Op::Dir => "dir",
            Op::Begin => "begin",
            Op::Commit => "commit",
            Op::Rollback => "rollback",
            Op::Backup => "backup",
            Op::Close => "close",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{}: master key must be 32 bytes, got {actual}", path.display())]
    KeyLength { path: PathBuf, actual: usize },

    #[error("{}: cannot open store: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: redb::Error,
    },

    #[error("{}: cannot create with requested mode: {source}", path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: unreadable header record: {source}", path.display())]
    Header {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}: unsupported format version {version}", path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },

    #[error("{}: file uses segment scheme {stored}, but {requested} was requested", path.display())]
    SchemeMismatch {
        path: PathBuf,
        stored: SegmentScheme,
        requested: SegmentScheme,
    },

    #[error("{}: master key does not open this database: {source}", path.display())]
    WrongKey {
        path: PathBuf,
        #[source]
        source: CryptoError,
    },

    #[error("{op} {key:?}: bucket not found")]
    BucketNotFound { op: Op, key: String },

    #[error("{op} {key:?}: {source}")]
    Crypto {
        op: Op,
        key: String,
        #[source]
        source: CryptoError,
    },

    #[error("{op} {key:?}: stored value belongs to {found:?}")]
    Misplaced { op: Op, key: String, found: String },

    #[error("{op} {key:?}: store error: {source}")]
    Store {
        op: Op,
        key: String,
        #[source]
        source: redb::Error,
    },

    #[error("{op} {key:?}: transaction is read-only")]
    ReadOnly { op: Op, key: String },

    #[error("{op}: transaction closed")]
    TxClosed { op: Op },

    #[error("{op}: database closed")]
    Closed { op: Op },

    #[error("close: {open} transaction(s) still open")]
    Busy { open: usize },

    #[error("backup: {0}")]
    Backup(#[source] std::io::Error),
}

impl Error {
    pub(crate) fn store(op: Op, key: &str, source: impl Into<redb::Error>) -> Self {
        Error::Store {
            op,
            key: key.to_owned(),
            source: source.into(),
        }
    }

    pub(crate) fn crypto(op: Op, key: &str, source: CryptoError) -> Self {
        Error::Crypto {
            op,
            key: key.to_owned(),
            source,
        }
    }

    /// A missing bucket on a read or delete path.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::BucketNotFound { .. })
    }

    /// Wrong key, tampering or corruption detected while decrypting.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::Crypto {
                source: CryptoError::Authentication,
                ..
            } | Error::WrongKey {
                source: CryptoError::Authentication,
                ..
            }
        )
    }

    /// The operation that failed, for errors raised on the data path.
    pub fn op(&self) -> Option<Op> {
        match self {
            Error::BucketNotFound { op, .. }
            | Error::Crypto { op, .. }
            | Error::Misplaced { op, .. }
            | Error::Store { op, .. }
            | Error::ReadOnly { op, .. }
            | Error::TxClosed { op }
            | Error::Closed { op } => Some(*op),
            Error::Busy { .. } => Some(Op::Close),
            Error::Backup(_) => Some(Op::Backup),
            _ => None,
        }
    }
}
