//! Path to bucket mapping
//!
//! `a/b/c` is leaf `c` in bucket `b` nested in bucket `a`. A single-segment
//! path lives in the root bucket, whose plaintext segment is `/` and so can
//! never be produced by splitting a caller path.

use redb::WriteTransaction;
use sealkv_crypto::{CryptoResult, Encryptor};

use crate::store::{self, BucketId, StoreResult, StoreTxn};

/// Plaintext segment of the root bucket.
pub(crate) const ROOT: &str = "/";

/// Non-empty `/`-separated segments of `path`.
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Canonical spelling of `path`: doubled, leading and trailing slashes removed.
pub(crate) fn normalize(path: &str) -> String {
    segments(path).join("/")
}

/// Bucket segments and leaf segment of a value path.
pub(crate) fn split(path: &str) -> (Vec<&str>, &str) {
    let mut segs = segments(path);
    match segs.pop() {
        None => (vec![ROOT], ""),
        Some(leaf) if segs.is_empty() => (vec![ROOT], leaf),
        Some(leaf) => (segs, leaf),
    }
}

/// Bucket segments of a container path. The empty path is the root bucket.
pub(crate) fn container(path: &str) -> Vec<&str> {
    let segs = segments(path);
    if segs.is_empty() {
        vec![ROOT]
    } else {
        segs
    }
}

/// Where a value path lives in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Location {
    pub bucket: BucketId,
    pub leaf: Vec<u8>,
}

/// Turns plaintext paths into stored bucket ids and leaf names.
pub(crate) struct Mapper<'a> {
    encryptor: &'a Encryptor,
}

impl<'a> Mapper<'a> {
    pub fn new(encryptor: &'a Encryptor) -> Self {
        Self { encryptor }
    }

    fn bucket(&self, segments: &[&str]) -> CryptoResult<BucketId> {
        segments.iter().try_fold(BucketId::top(), |id, seg| {
            Ok(id.child(&self.encryptor.encrypt_segment(seg)?))
        })
    }

    pub fn locate(&self, path: &str) -> CryptoResult<Location> {
        let (buckets, leaf) = split(path);
        Ok(Location {
            bucket: self.bucket(&buckets)?,
            leaf: self.encryptor.encrypt_segment(leaf)?,
        })
    }

    pub fn container(&self, path: &str) -> CryptoResult<BucketId> {
        self.bucket(&container(path))
    }

    /// Stored name of the root bucket.
    pub fn root_name(&self) -> CryptoResult<Vec<u8>> {
        self.encryptor.encrypt_segment(ROOT)
    }
}

/// Walk to `bucket` without creating anything. `false` as soon as a
/// bucket on the way is missing.
pub(crate) fn descend(txn: &StoreTxn, bucket: &BucketId) -> StoreResult<bool> {
    txn.bucket_exists(bucket)
}

/// Walk to `bucket`, creating each missing bucket root to leaf.
pub(crate) fn descend_or_create(txn: &WriteTransaction, bucket: &BucketId) -> StoreResult<()> {
    store::create_bucket(txn, bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealkv_crypto::{MasterKey, SegmentScheme};

    fn encryptor() -> Encryptor {
        Encryptor::new(&MasterKey::from_bytes([3u8; 32]), SegmentScheme::Siv)
    }

    #[test]
    fn test_split_shapes() {
        assert_eq!(split("a/b/c"), (vec!["a", "b"], "c"));
        assert_eq!(split("a"), (vec![ROOT], "a"));
        assert_eq!(split(""), (vec![ROOT], ""));
        assert_eq!(split("/a//b/"), (vec!["a"], "b"));
        assert_eq!(split("///"), (vec![ROOT], ""));
    }

    #[test]
    fn test_container_shapes() {
        assert_eq!(container("a/b"), vec!["a", "b"]);
        assert_eq!(container(""), vec![ROOT]);
        assert_eq!(container("/"), vec![ROOT]);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/users//1001/"), "users/1001");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_equivalent_spellings_share_location() {
        let enc = encryptor();
        let mapper = Mapper::new(&enc);
        assert_eq!(
            mapper.locate("users/1001/email").unwrap(),
            mapper.locate("/users//1001/email/").unwrap()
        );
    }

    #[test]
    fn test_value_bucket_is_its_parent_container() {
        let enc = encryptor();
        let mapper = Mapper::new(&enc);
        let loc = mapper.locate("users/1001/email").unwrap();
        assert_eq!(loc.bucket, mapper.container("users/1001").unwrap());
        assert_eq!(
            mapper.locate("solo").unwrap().bucket,
            mapper.container("").unwrap()
        );
    }

    #[test]
    fn test_root_never_collides() {
        let enc = encryptor();
        let mapper = Mapper::new(&enc);
        let root = mapper.container("").unwrap();
        let top = BucketId::top().child(&mapper.root_name().unwrap());
        assert_eq!(root, top);
        for path in ["root", ".root", "%2F"] {
            assert_ne!(mapper.container(path).unwrap(), root);
        }
    }

    #[test]
    fn test_leaf_name_is_ciphered() {
        let enc = encryptor();
        let mapper = Mapper::new(&enc);
        let loc = mapper.locate("users/secret-name").unwrap();
        assert!(!loc
            .leaf
            .windows(b"secret-name".len())
            .any(|w| w == b"secret-name"));
        assert!(!loc.bucket.table_name().contains("users"));
    }
}
