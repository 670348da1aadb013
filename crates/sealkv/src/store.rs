//! Nested buckets over redb tables
//!
//! redb has flat, named tables. A bucket is the table named by the hex of
//! each stored segment name on its path, joined with `/`:
//!
//! ```text
//! users/1001   ->  "3f1a…"/"9bc0…"
//! ```
//!
//! Every bucket id is also a key of the `$buckets` registry. Ids sort so
//! that a bucket's descendants follow it directly, which makes existence a
//! point lookup and listing children a few seeks. Buckets are never
//! deleted. The reserved `$`-prefixed tables are not valid hex and can never
//! be buckets.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, TableHandle, WriteTransaction};
use sealkv_crypto::{CryptoError, Encryptor, SegmentScheme};
use serde::{Deserialize, Serialize};

use crate::config::Options;
use crate::error::{Error, Op, SealResult};

pub(crate) type StoreResult<T> = Result<T, redb::Error>;

pub(crate) const HEADER_TABLE: &str = "$header";
const HEADER_KEY: &[u8] = b"header";
const KEY_CHECK_KEY: &[u8] = b"key-check";
const KEY_CHECK_PATH: &str = "$key-check";

pub(crate) const REGISTRY_TABLE: &str = "$buckets";

/// On-disk format version written into the header record.
pub const FORMAT_VERSION: u32 = 1;

type Bytes = &'static [u8];

fn table(name: &str) -> TableDefinition<'_, Bytes, Bytes> {
    TableDefinition::new(name)
}

fn bucket_registry() -> TableDefinition<'static, Bytes, Bytes> {
    TableDefinition::new(REGISTRY_TABLE)
}

/// Location of a bucket in the hierarchy.
///
/// The empty id is the virtual container above every top-level bucket; it
/// holds no entries of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BucketId(String);

impl BucketId {
    pub fn top() -> Self {
        Self(String::new())
    }

    pub fn is_top(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, name: &[u8]) -> Self {
        if self.is_top() {
            Self(hex::encode(name))
        } else {
            Self(format!("{}/{}", self.0, hex::encode(name)))
        }
    }

    pub fn table_name(&self) -> &str {
        &self.0
    }

    /// Table names of every ancestor and then this bucket, outermost first.
    fn lineage(&self) -> impl Iterator<Item = &str> {
        self.0
            .match_indices('/')
            .map(|(at, _)| &self.0[..at])
            .chain(std::iter::once(self.0.as_str()))
    }

    /// Registry prefix shared by every descendant id.
    fn descendant_prefix(&self) -> String {
        if self.is_top() {
            String::new()
        } else {
            format!("{}/", self.0)
        }
    }
}

/// One open store transaction.
pub(crate) enum StoreTxn {
    Read(ReadTransaction),
    Write(WriteTransaction),
}

impl StoreTxn {
    pub fn begin(db: &Database, writable: bool) -> StoreResult<Self> {
        Ok(if writable {
            Self::Write(db.begin_write()?)
        } else {
            Self::Read(db.begin_read()?)
        })
    }

    pub fn as_writer(&self) -> Option<&WriteTransaction> {
        match self {
            Self::Write(txn) => Some(txn),
            Self::Read(_) => None,
        }
    }

    /// Whether `id` exists. Never creates anything.
    pub fn bucket_exists(&self, id: &BucketId) -> StoreResult<bool> {
        if id.is_top() {
            return Ok(true);
        }
        let key = id.table_name().as_bytes();
        let found = match self {
            Self::Read(txn) => lookup(&txn.open_table(bucket_registry())?, key)?,
            Self::Write(txn) => lookup(&txn.open_table(bucket_registry())?, key)?,
        };
        Ok(found.is_some())
    }

    /// Value stored under `key` in an existing bucket.
    pub fn get(&self, id: &BucketId, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        match self {
            Self::Read(txn) => lookup(&txn.open_table(table(id.table_name()))?, key),
            Self::Write(txn) => lookup(&txn.open_table(table(id.table_name()))?, key),
        }
    }

    /// Every entry of an existing bucket, in stored-key order.
    pub fn entries(&self, id: &BucketId) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        match self {
            Self::Read(txn) => scan(&txn.open_table(table(id.table_name()))?),
            Self::Write(txn) => scan(&txn.open_table(table(id.table_name()))?),
        }
    }

    /// Stored names of the immediate child buckets of `parent`, in id order.
    pub fn child_buckets(&self, parent: &BucketId) -> StoreResult<Vec<Vec<u8>>> {
        match self {
            Self::Read(txn) => children(&txn.open_table(bucket_registry())?, parent),
            Self::Write(txn) => children(&txn.open_table(bucket_registry())?, parent),
        }
    }

    pub fn commit(self) -> StoreResult<()> {
        match self {
            Self::Read(txn) => drop(txn),
            Self::Write(txn) => txn.commit()?,
        }
        Ok(())
    }

    pub fn rollback(self) -> StoreResult<()> {
        match self {
            Self::Read(txn) => drop(txn),
            Self::Write(txn) => txn.abort()?,
        }
        Ok(())
    }
}

fn lookup<T: ReadableTable<Bytes, Bytes>>(table: &T, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
    let found = table.get(key)?.map(|guard| guard.value().to_vec());
    Ok(found)
}

/// Walk the registry one child at a time. After child `c` the next seek
/// starts at `c0`: `/` is the only byte below `0` that can follow a hex
/// name, so this skips exactly the subtree of `c`.
fn children<T: ReadableTable<Bytes, Bytes>>(
    registry: &T,
    parent: &BucketId,
) -> StoreResult<Vec<Vec<u8>>> {
    let prefix = parent.descendant_prefix().into_bytes();
    let mut seek = prefix.clone();
    let mut out = Vec::new();
    loop {
        let from: &[u8] = &seek;
        let id = match registry.range(from..)?.next() {
            Some(item) => item?.0.value().to_vec(),
            None => break,
        };
        let Some(rest) = id.strip_prefix(prefix.as_slice()) else {
            break;
        };
        let len = rest.iter().position(|&b| b == b'/').unwrap_or(rest.len());
        match hex::decode(&rest[..len]) {
            Ok(raw) if !raw.is_empty() => out.push(raw),
            _ => tracing::warn!(id = %String::from_utf8_lossy(&id), "skipping malformed bucket id"),
        }
        seek = id[..prefix.len() + len].to_vec();
        seek.push(b'0');
    }
    Ok(out)
}

fn scan<T: ReadableTable<Bytes, Bytes>>(table: &T) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut out = Vec::new();
    for item in table.iter()? {
        let (key, value) = item?;
        out.push((key.value().to_vec(), value.value().to_vec()));
    }
    Ok(out)
}

/// Create `id` and every missing ancestor. Idempotent.
pub(crate) fn create_bucket(txn: &WriteTransaction, id: &BucketId) -> StoreResult<()> {
    if id.is_top() {
        return Ok(());
    }
    let mut registry = txn.open_table(bucket_registry())?;
    if lookup(&registry, id.table_name().as_bytes())?.is_some() {
        return Ok(());
    }
    for name in id.lineage() {
        txn.open_table(table(name))?;
        registry.insert(name.as_bytes(), &b""[..])?;
    }
    Ok(())
}

pub(crate) fn put(txn: &WriteTransaction, id: &BucketId, key: &[u8], value: &[u8]) -> StoreResult<()> {
    let mut t = txn.open_table(table(id.table_name()))?;
    t.insert(key, value)?;
    Ok(())
}

/// Remove `key` from an existing bucket, reporting whether it was present.
pub(crate) fn delete(txn: &WriteTransaction, id: &BucketId, key: &[u8]) -> StoreResult<bool> {
    let mut t = txn.open_table(table(id.table_name()))?;
    let removed = t.remove(key)?.is_some();
    Ok(removed)
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    version: u32,
    scheme: SegmentScheme,
}

/// Open (or create) the store file at `path`.
pub(crate) fn open_database(path: &Path, options: &Options) -> SealResult<Database> {
    if options.create && !path.exists() {
        create_file(path, options.file_mode).map_err(|source| Error::Permissions {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let mut builder = redb::Builder::new();
    if let Some(bytes) = options.cache_size {
        builder.set_cache_size(bytes);
    }
    let opened = if options.create {
        builder.create(path)
    } else {
        builder.open(path)
    };
    opened.map_err(|e| Error::Open {
        path: path.to_path_buf(),
        source: e.into(),
    })
}

/// An empty file is initialized by redb on first open.
pub(crate) fn create_file(path: &Path, mode: u32) -> io::Result<()> {
    OpenOptions::new().write(true).create_new(true).open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

/// Write the header record on first open; verify it on every later one.
///
/// Alongside the header sits an envelope sealed under the value key. Opening
/// it proves the master key is the one the file was created with, so a
/// wrong key fails here instead of surfacing later as missing buckets.
pub(crate) fn check_header(db: &Database, path: &Path, encryptor: &Encryptor) -> SealResult<()> {
    let scheme = encryptor.scheme();
    let open_err = |e: redb::Error| Error::Open {
        path: path.to_path_buf(),
        source: e,
    };
    let header_err = |source| Error::Header {
        path: path.to_path_buf(),
        source,
    };
    let wrong_key = |source| Error::WrongKey {
        path: path.to_path_buf(),
        source,
    };

    let txn = db.begin_write().map_err(|e| open_err(e.into()))?;
    {
        txn.open_table(bucket_registry()).map_err(|e| open_err(e.into()))?;
        let mut t = txn
            .open_table(table(HEADER_TABLE))
            .map_err(|e| open_err(e.into()))?;
        let stored = lookup(&t, HEADER_KEY).map_err(open_err)?;

        match stored {
            Some(raw) => {
                let header: Header = serde_json::from_slice(&raw).map_err(header_err)?;
                if header.version != FORMAT_VERSION {
                    return Err(Error::UnsupportedVersion {
                        path: path.to_path_buf(),
                        version: header.version,
                    });
                }
                if header.scheme != scheme {
                    return Err(Error::SchemeMismatch {
                        path: path.to_path_buf(),
                        stored: header.scheme,
                        requested: scheme,
                    });
                }
            }
            None => {
                let raw = serde_json::to_vec(&Header {
                    version: FORMAT_VERSION,
                    scheme,
                })
                .map_err(header_err)?;
                t.insert(HEADER_KEY, raw.as_slice())
                    .map_err(|e| open_err(e.into()))?;
                tracing::debug!(path = %path.display(), %scheme, "header written");
            }
        }

        match lookup(&t, KEY_CHECK_KEY).map_err(open_err)? {
            Some(envelope) => {
                let (found, _) = encryptor.open(&envelope).map_err(wrong_key)?;
                if found != KEY_CHECK_PATH {
                    return Err(wrong_key(CryptoError::Malformed("key check record")));
                }
            }
            None => {
                let envelope = encryptor
                    .seal(KEY_CHECK_PATH, &[])
                    .map_err(wrong_key)?;
                t.insert(KEY_CHECK_KEY, envelope.as_slice())
                    .map_err(|e| open_err(e.into()))?;
            }
        }
    }
    txn.commit().map_err(|e| open_err(e.into()))
}

/// Rebuild a read snapshot of `db` as a fresh store file at `dest`, which
/// must not exist or be empty. Returns the size of the finished file.
///
/// redb has no raw page stream for a snapshot, so this is a logical copy:
/// every table and entry is rewritten unchanged, and the result opens to
/// the same key/value space although its bytes differ from the source file.
pub(crate) fn snapshot_file(db: &Database, dest: &Path) -> SealResult<u64> {
    let src = db
        .begin_read()
        .map_err(|e| Error::store(Op::Backup, "", e))?;
    copy_snapshot(&src, dest).map_err(|e| Error::store(Op::Backup, "", e))?;
    drop(src);
    Ok(fs::metadata(dest).map_err(Error::Backup)?.len())
}

/// Rebuild a snapshot in a private scratch directory and stream it to `out`.
/// Returns the number of bytes written.
pub(crate) fn snapshot_to<W: Write + ?Sized>(db: &Database, out: &mut W) -> SealResult<u64> {
    let scratch = tempfile::tempdir().map_err(Error::Backup)?;
    let copy_path = scratch.path().join("snapshot.redb");
    snapshot_file(db, &copy_path)?;

    let mut file = File::open(&copy_path).map_err(Error::Backup)?;
    let written = io::copy(&mut file, out).map_err(Error::Backup)?;
    out.flush().map_err(Error::Backup)?;
    Ok(written)
}

fn copy_snapshot(src: &ReadTransaction, dest: &Path) -> StoreResult<()> {
    let copy = Database::create(dest)?;
    let txn = copy.begin_write()?;
    let names: Vec<String> = src.list_tables()?.map(|t| t.name().to_owned()).collect();
    for name in &names {
        let from = src.open_table(table(name))?;
        let mut to = txn.open_table(table(name))?;
        for item in from.iter()? {
            let (key, value) = item?;
            to.insert(key.value(), value.value())?;
        }
    }
    txn.commit()?;
    Ok(())
}
