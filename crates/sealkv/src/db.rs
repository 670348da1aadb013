//! Database handle: open, close, one-shot operations and backup

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use sealkv_crypto::{Encryptor, MasterKey, SegmentScheme};

use crate::config::Options;
use crate::error::{Error, Op, SealResult};
use crate::store;
use crate::tx::{Kv, Transaction};

/// State shared by a database and all of its transactions.
pub(crate) struct Shared {
    pub(crate) store: redb::Database,
    pub(crate) encryptor: Encryptor,
}

/// An open encrypted database file.
///
/// `Db` is `Send + Sync`: any number of read transactions may run at once,
/// and at most one read-write transaction (a second writer blocks until the
/// first commits or rolls back).
pub struct Db {
    path: PathBuf,
    scheme: SegmentScheme,
    file_mode: u32,
    shared: RwLock<Option<Arc<Shared>>>,
}

impl Db {
    /// Open or create the database at `path`.
    ///
    /// `master_key` must be exactly 32 bytes. It is expanded into the
    /// segment and value keys and then dropped; it is never stored. A key
    /// other than the one the file was created with fails with
    /// [`Error::WrongKey`].
    pub fn open(path: impl AsRef<Path>, master_key: &[u8], options: &Options) -> SealResult<Self> {
        let path = path.as_ref().to_path_buf();
        let master = MasterKey::try_from_slice(master_key).map_err(|_| Error::KeyLength {
            path: path.clone(),
            actual: master_key.len(),
        })?;

        let encryptor = Encryptor::new(&master, options.segment_scheme);
        let store = store::open_database(&path, options)?;
        store::check_header(&store, &path, &encryptor)?;

        tracing::debug!(path = %path.display(), scheme = %options.segment_scheme, "database opened");
        Ok(Self {
            path,
            scheme: options.segment_scheme,
            file_mode: options.file_mode,
            shared: RwLock::new(Some(Arc::new(Shared { store, encryptor }))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scheme(&self) -> SegmentScheme {
        self.scheme
    }

    fn shared(&self, op: Op) -> SealResult<Arc<Shared>> {
        self.shared
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(Error::Closed { op })
    }

    /// Close the database and release the file.
    ///
    /// Refused with [`Error::Busy`] while any transaction (or backup) is
    /// still outstanding; the database then stays open.
    pub fn close(&self) -> SealResult<()> {
        let mut slot = self.shared.write();
        let shared = slot.take().ok_or(Error::Closed { op: Op::Close })?;
        match Arc::try_unwrap(shared) {
            Ok(shared) => {
                drop(shared);
                tracing::debug!(path = %self.path.display(), "database closed");
                Ok(())
            }
            Err(shared) => {
                let open = Arc::strong_count(&shared) - 1;
                *slot = Some(shared);
                Err(Error::Busy { open })
            }
        }
    }

    /// Start a transaction. A read-write transaction blocks while another
    /// one is live.
    pub fn begin_transaction(&self, writable: bool) -> SealResult<Transaction> {
        Transaction::begin(self.shared(Op::Begin)?, writable)
    }

    /// Run `f` in a read-only transaction that is always released.
    pub fn view<T>(&self, f: impl FnOnce(&Transaction) -> SealResult<T>) -> SealResult<T> {
        let mut tx = self.begin_transaction(false)?;
        let value = f(&tx)?;
        tx.rollback()?;
        Ok(value)
    }

    /// Run `f` in a read-write transaction: committed when `f` succeeds,
    /// rolled back when it fails.
    pub fn update<T>(&self, f: impl FnOnce(&mut Transaction) -> SealResult<T>) -> SealResult<T> {
        let mut tx = self.begin_transaction(true)?;
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn get(&self, path: &str) -> SealResult<Option<Vec<u8>>> {
        self.view(|tx| tx.get(path))
    }

    pub fn set(&self, path: &str, value: &[u8]) -> SealResult<()> {
        self.update(|tx| tx.set(path, value))
    }

    pub fn set_many(&self, kvs: &[Kv]) -> SealResult<()> {
        self.update(|tx| tx.set_many(kvs))
    }

    pub fn del(&self, path: &str) -> SealResult<()> {
        self.update(|tx| tx.del(path))
    }

    pub fn del_many<S: AsRef<str>>(&self, paths: &[S]) -> SealResult<()> {
        self.update(|tx| tx.del_many(paths))
    }

    pub fn all(&self, path: &str) -> SealResult<BTreeMap<String, Vec<u8>>> {
        self.view(|tx| tx.all(path))
    }

    pub fn all_keys(&self, path: &str) -> SealResult<Vec<String>> {
        self.view(|tx| tx.all_keys(path))
    }

    pub fn dir(&self, path: &str) -> SealResult<Vec<String>> {
        self.view(|tx| tx.dir(path))
    }

    /// Write a consistent snapshot of the whole store to `out`.
    ///
    /// Runs alongside open transactions. The output is a complete store
    /// file, readable with the same master key. It is rebuilt from the
    /// snapshot in a private temporary directory before being streamed, so
    /// prefer [`backup_to_path`](Self::backup_to_path) for large stores.
    /// Returns the bytes written.
    pub fn backup<W: Write + ?Sized>(&self, out: &mut W) -> SealResult<u64> {
        let shared = self.shared(Op::Backup)?;
        let written = store::snapshot_to(&shared.store, out)?;
        tracing::info!(path = %self.path.display(), bytes = written, "backup written");
        Ok(written)
    }

    /// Write a backup to a new file at `dest`, built in place with the
    /// database's file mode. Fails if `dest` exists; a failed backup leaves
    /// nothing behind.
    pub fn backup_to_path(&self, dest: impl AsRef<Path>) -> SealResult<u64> {
        let dest = dest.as_ref();
        let shared = self.shared(Op::Backup)?;
        store::create_file(dest, self.file_mode).map_err(Error::Backup)?;

        match store::snapshot_file(&shared.store, dest) {
            Ok(written) => {
                tracing::info!(path = %self.path.display(), dest = %dest.display(), bytes = written, "backup written");
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(dest) {
                    tracing::warn!(dest = %dest.display(), error = %cleanup, "could not remove partial backup");
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.path)
            .field("scheme", &self.scheme)
            .field("open", &self.shared.read().is_some())
            .finish()
    }
}
