//! Encrypted operations scoped to one store transaction

use std::collections::BTreeMap;
use std::sync::Arc;

use redb::WriteTransaction;

use crate::db::Shared;
use crate::error::{Error, Op, SealResult};
use crate::mapper::{self, Location, Mapper};
use crate::store::{self, BucketId, StoreTxn};

/// A key and its plaintext value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kv {
    pub key: String,
    pub value: Vec<u8>,
}

impl Kv {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A write that has been located and sealed but not yet applied.
struct Sealed<'p> {
    path: &'p str,
    location: Location,
    envelope: Vec<u8>,
}

/// A single-use transaction.
///
/// Terminated exactly once by [`commit`](Self::commit) or
/// [`rollback`](Self::rollback); every later call fails with
/// [`Error::TxClosed`]. Dropping an unterminated transaction rolls it back.
pub struct Transaction {
    shared: Arc<Shared>,
    txn: Option<StoreTxn>,
    writable: bool,
}

impl Transaction {
    /// Blocks while another read-write transaction is live.
    pub(crate) fn begin(shared: Arc<Shared>, writable: bool) -> SealResult<Self> {
        let txn = StoreTxn::begin(&shared.store, writable)
            .map_err(|e| Error::store(Op::Begin, "", e))?;
        tracing::debug!(writable, "transaction started");
        Ok(Self {
            shared,
            txn: Some(txn),
            writable,
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn txn(&self, op: Op) -> SealResult<&StoreTxn> {
        self.txn.as_ref().ok_or(Error::TxClosed { op })
    }

    fn writer(&self, op: Op, key: &str) -> SealResult<&WriteTransaction> {
        self.txn(op)?.as_writer().ok_or_else(|| Error::ReadOnly {
            op,
            key: key.to_owned(),
        })
    }

    fn mapper(&self) -> Mapper<'_> {
        Mapper::new(&self.shared.encryptor)
    }

    fn locate(&self, op: Op, path: &str) -> SealResult<Location> {
        self.mapper()
            .locate(path)
            .map_err(|e| Error::crypto(op, path, e))
    }

    fn require_bucket(&self, op: Op, path: &str, bucket: &BucketId) -> SealResult<()> {
        let found = mapper::descend(self.txn(op)?, bucket).map_err(|e| Error::store(op, path, e))?;
        if found {
            Ok(())
        } else {
            Err(Error::BucketNotFound {
                op,
                key: path.to_owned(),
            })
        }
    }

    fn open_envelope(&self, op: Op, path: &str, envelope: &[u8]) -> SealResult<(String, Vec<u8>)> {
        self.shared
            .encryptor
            .open(envelope)
            .map_err(|e| Error::crypto(op, path, e))
    }

    /// Give up on the transaction after a partially applied batch.
    fn abort(&mut self, op: Op) {
        if let Some(txn) = self.txn.take() {
            if let Err(e) = txn.rollback() {
                tracing::warn!(%op, error = %e, "abort after failed batch did not complete");
            }
        }
    }

    /// Value at `path`.
    ///
    /// `Ok(None)` when the enclosing bucket exists but holds no such leaf;
    /// [`Error::BucketNotFound`] when the bucket itself is missing.
    pub fn get(&self, path: &str) -> SealResult<Option<Vec<u8>>> {
        let op = Op::Get;
        let txn = self.txn(op)?;
        let location = self.locate(op, path)?;
        self.require_bucket(op, path, &location.bucket)?;

        let Some(envelope) = txn
            .get(&location.bucket, &location.leaf)
            .map_err(|e| Error::store(op, path, e))?
        else {
            return Ok(None);
        };

        let (found, value) = self.open_envelope(op, path, &envelope)?;
        if mapper::normalize(&found) != mapper::normalize(path) {
            return Err(Error::Misplaced {
                op,
                key: path.to_owned(),
                found,
            });
        }
        Ok(Some(value))
    }

    /// Store `value` at `path`, creating missing buckets.
    pub fn set(&self, path: &str, value: &[u8]) -> SealResult<()> {
        let op = Op::Set;
        let writer = self.writer(op, path)?;
        let sealed = self.seal(op, path, value)?;
        apply_set(writer, &sealed).map_err(|e| Error::store(op, path, e))
    }

    fn seal<'p>(&self, op: Op, path: &'p str, value: &[u8]) -> SealResult<Sealed<'p>> {
        let location = self.locate(op, path)?;
        let envelope = self
            .shared
            .encryptor
            .seal(path, value)
            .map_err(|e| Error::crypto(op, path, e))?;
        Ok(Sealed {
            path,
            location,
            envelope,
        })
    }

    /// Store every pair, or none of them.
    ///
    /// All pairs are located and sealed before the first write. If a write
    /// then fails the transaction is aborted and closed, so a partial batch
    /// can never be committed.
    pub fn set_many(&mut self, kvs: &[Kv]) -> SealResult<()> {
        let op = Op::SetMany;
        let first = kvs.first().map_or("", |kv| kv.key.as_str());
        self.writer(op, first)?;

        let sealed = kvs
            .iter()
            .map(|kv| self.seal(op, &kv.key, &kv.value))
            .collect::<SealResult<Vec<_>>>()?;

        let applied = match self.txn.as_ref().and_then(StoreTxn::as_writer) {
            Some(writer) => sealed
                .iter()
                .try_for_each(|item| apply_set(writer, item).map_err(|e| (item.path, e))),
            None => return Err(Error::TxClosed { op }),
        };
        if let Err((path, source)) = applied {
            self.abort(op);
            return Err(Error::store(op, path, source));
        }
        Ok(())
    }

    /// Remove the value at `path`. Removing a missing leaf is a no-op; a
    /// missing enclosing bucket is [`Error::BucketNotFound`].
    pub fn del(&self, path: &str) -> SealResult<()> {
        let op = Op::Del;
        let writer = self.writer(op, path)?;
        let location = self.locate(op, path)?;
        self.require_bucket(op, path, &location.bucket)?;
        store::delete(writer, &location.bucket, &location.leaf)
            .map_err(|e| Error::store(op, path, e))?;
        Ok(())
    }

    /// Remove every path, or none of them.
    ///
    /// Every enclosing bucket must exist before anything is removed.
    pub fn del_many<S: AsRef<str>>(&mut self, paths: &[S]) -> SealResult<()> {
        let op = Op::DelMany;
        let first = paths.first().map_or("", |p| p.as_ref());
        self.writer(op, first)?;

        let mut located = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let location = self.locate(op, path)?;
            self.require_bucket(op, path, &location.bucket)?;
            located.push((path, location));
        }

        let applied = match self.txn.as_ref().and_then(StoreTxn::as_writer) {
            Some(writer) => located.iter().try_for_each(|(path, loc)| {
                store::delete(writer, &loc.bucket, &loc.leaf)
                    .map(drop)
                    .map_err(|e| (*path, e))
            }),
            None => return Err(Error::TxClosed { op }),
        };
        if let Err((path, source)) = applied {
            self.abort(op);
            return Err(Error::store(op, path, source));
        }
        Ok(())
    }

    /// Open every envelope directly inside the container `path`.
    ///
    /// Each entry must sit exactly where its embedded path locates it;
    /// an envelope copied into another bucket or under another leaf is
    /// [`Error::Misplaced`].
    fn scan(&self, op: Op, path: &str) -> SealResult<Vec<(String, Vec<u8>)>> {
        let txn = self.txn(op)?;
        let mapper = self.mapper();
        let bucket = mapper
            .container(path)
            .map_err(|e| Error::crypto(op, path, e))?;
        self.require_bucket(op, path, &bucket)?;
        let entries = txn
            .entries(&bucket)
            .map_err(|e| Error::store(op, path, e))?;

        entries
            .into_iter()
            .map(|(leaf, envelope)| {
                let (found, value) = self.open_envelope(op, path, &envelope)?;
                let home = mapper
                    .locate(&found)
                    .map_err(|e| Error::crypto(op, path, e))?;
                if home.bucket != bucket || home.leaf != leaf {
                    return Err(Error::Misplaced {
                        op,
                        key: path.to_owned(),
                        found,
                    });
                }
                Ok((found, value))
            })
            .collect()
    }

    /// Every value directly inside `path`, keyed by its full original path.
    pub fn all(&self, path: &str) -> SealResult<BTreeMap<String, Vec<u8>>> {
        Ok(self.scan(Op::All, path)?.into_iter().collect())
    }

    /// Leaf keys of every value directly inside `path`, sorted.
    pub fn all_keys(&self, path: &str) -> SealResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .scan(Op::AllKeys, path)?
            .into_iter()
            .map(|(found, _)| mapper::split(&found).1.to_owned())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Names of the buckets directly under `path`, sorted.
    ///
    /// The empty path lists the top-level buckets. Under the one-way digest
    /// scheme names are returned as lower-case hex.
    pub fn dir(&self, path: &str) -> SealResult<Vec<String>> {
        let op = Op::Dir;
        let txn = self.txn(op)?;
        let mapper = self.mapper();
        let crypto_err = |e| Error::crypto(op, path, e);

        let parent = if mapper::segments(path).is_empty() {
            BucketId::top()
        } else {
            let bucket = mapper.container(path).map_err(crypto_err)?;
            self.require_bucket(op, path, &bucket)?;
            bucket
        };
        let root = mapper.root_name().map_err(crypto_err)?;

        let mut names = Vec::new();
        for child in txn
            .child_buckets(&parent)
            .map_err(|e| Error::store(op, path, e))?
        {
            if parent.is_top() && child == root {
                continue;
            }
            names.push(
                self.shared
                    .encryptor
                    .display_segment(&child)
                    .map_err(crypto_err)?,
            );
        }
        names.sort();
        Ok(names)
    }

    /// Make every write durable and release the transaction.
    pub fn commit(&mut self) -> SealResult<()> {
        let op = Op::Commit;
        let txn = self.txn.take().ok_or(Error::TxClosed { op })?;
        txn.commit().map_err(|e| Error::store(op, "", e))?;
        tracing::debug!(writable = self.writable, "transaction committed");
        Ok(())
    }

    /// Discard every write and release the transaction.
    pub fn rollback(&mut self) -> SealResult<()> {
        let op = Op::Rollback;
        let txn = self.txn.take().ok_or(Error::TxClosed { op })?;
        txn.rollback().map_err(|e| Error::store(op, "", e))?;
        tracing::debug!(writable = self.writable, "transaction rolled back");
        Ok(())
    }
}

fn apply_set(writer: &WriteTransaction, sealed: &Sealed<'_>) -> store::StoreResult<()> {
    mapper::descend_or_create(writer, &sealed.location.bucket)?;
    store::put(
        writer,
        &sealed.location.bucket,
        &sealed.location.leaf,
        &sealed.envelope,
    )
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            if let Err(e) = txn.rollback() {
                tracing::warn!(error = %e, "rollback of dropped transaction failed");
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("writable", &self.writable)
            .field("open", &self.txn.is_some())
            .finish()
    }
}
