//! Integration tests for explicit transactions: commit, rollback, isolation,
//! batch atomicity and writer exclusion.

use sealkv::{Db, Error, Kv, Op, Options};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const KEY: [u8; 32] = [0x42; 32];

fn open(tmp: &TempDir) -> Db {
    Db::open(tmp.path().join("vault.redb"), &KEY, &Options::default()).expect("open db")
}

#[test]
fn commit_makes_writes_visible() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);

    let mut tx = db.begin_transaction(true).unwrap();
    assert!(tx.is_writable());
    tx.set("orders/1", b"pending").unwrap();
    tx.set("orders/2", b"shipped").unwrap();
    assert_eq!(tx.get("orders/1").unwrap().as_deref(), Some(&b"pending"[..]));
    tx.commit().unwrap();

    assert_eq!(db.all_keys("orders").unwrap(), vec!["1", "2"]);
}

#[test]
fn rollback_discards_writes() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);

    let mut tx = db.begin_transaction(true).unwrap();
    tx.set("drafts/x", b"gone soon").unwrap();
    tx.rollback().unwrap();

    assert!(db.get("drafts/x").unwrap_err().is_not_found());
}

#[test]
fn dropped_transaction_rolls_back() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    {
        let tx = db.begin_transaction(true).unwrap();
        tx.set("drafts/y", b"never committed").unwrap();
    }
    assert!(db.get("drafts/y").unwrap_err().is_not_found());

    // The writer lock was released by the drop.
    db.set("drafts/z", b"ok").unwrap();
}

#[test]
fn closed_transaction_rejects_everything() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);

    let mut tx = db.begin_transaction(true).unwrap();
    tx.set("a/b", b"1").unwrap();
    tx.commit().unwrap();

    assert!(matches!(tx.get("a/b"), Err(Error::TxClosed { op: Op::Get })));
    assert!(matches!(tx.set("a/b", b"2"), Err(Error::TxClosed { op: Op::Set })));
    assert!(matches!(tx.del("a/b"), Err(Error::TxClosed { op: Op::Del })));
    assert!(matches!(tx.all("a"), Err(Error::TxClosed { op: Op::All })));
    assert!(matches!(tx.all_keys("a"), Err(Error::TxClosed { op: Op::AllKeys })));
    assert!(matches!(tx.dir(""), Err(Error::TxClosed { op: Op::Dir })));
    assert!(matches!(
        tx.set_many(&[Kv::new("a/c", "3")]),
        Err(Error::TxClosed { op: Op::SetMany })
    ));
    assert!(matches!(tx.del_many(&["a/b"]), Err(Error::TxClosed { op: Op::DelMany })));
    assert!(matches!(tx.commit(), Err(Error::TxClosed { op: Op::Commit })));
    assert!(matches!(tx.rollback(), Err(Error::TxClosed { op: Op::Rollback })));

    assert_eq!(db.get("a/b").unwrap().as_deref(), Some(&b"1"[..]));
}

#[test]
fn read_only_transaction_rejects_writes() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    db.set("a/b", b"1").unwrap();

    let mut tx = db.begin_transaction(false).unwrap();
    assert!(!tx.is_writable());
    assert!(matches!(tx.set("a/b", b"2"), Err(Error::ReadOnly { op: Op::Set, .. })));
    assert!(matches!(tx.del("a/b"), Err(Error::ReadOnly { op: Op::Del, .. })));
    assert!(matches!(
        tx.set_many(&[Kv::new("a/c", "3")]),
        Err(Error::ReadOnly { .. })
    ));
    assert!(matches!(tx.del_many(&["a/b"]), Err(Error::ReadOnly { .. })));
    assert_eq!(tx.get("a/b").unwrap().as_deref(), Some(&b"1"[..]));
    tx.commit().unwrap();
}

#[test]
fn uncommitted_writes_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    db.set("acct/balance", b"100").unwrap();

    let mut writer = db.begin_transaction(true).unwrap();
    writer.set("acct/balance", b"50").unwrap();

    let before = db.begin_transaction(false).unwrap();
    assert_eq!(before.get("acct/balance").unwrap().as_deref(), Some(&b"100"[..]));
    assert_eq!(db.get("acct/balance").unwrap().as_deref(), Some(&b"100"[..]));

    writer.commit().unwrap();

    // A snapshot taken earlier keeps its view; new transactions see the commit.
    assert_eq!(before.get("acct/balance").unwrap().as_deref(), Some(&b"100"[..]));
    assert_eq!(db.get("acct/balance").unwrap().as_deref(), Some(&b"50"[..]));
}

#[test]
fn second_writer_waits_for_first() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    let finished = AtomicBool::new(false);

    let mut first = db.begin_transaction(true).unwrap();
    first.set("queue/a", b"1").unwrap();

    thread::scope(|s| {
        let second = s.spawn(|| {
            db.set("queue/b", b"2").unwrap();
            finished.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(200));
        assert!(
            !finished.load(Ordering::SeqCst),
            "second writer must block while the first is live"
        );

        first.commit().unwrap();
        second.join().unwrap();
    });

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(db.all_keys("queue").unwrap(), vec!["a", "b"]);
}

#[test]
fn concurrent_readers() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    for i in 0..16 {
        db.set(&format!("items/{i:02}"), format!("v{i}").as_bytes())
            .unwrap();
    }

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let all = db.all("items").unwrap();
                assert_eq!(all.len(), 16);
                assert_eq!(all["items/07"], b"v7");
            });
        }
    });
}

#[test]
fn set_many_is_all_or_nothing() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);

    let batch = [
        Kv::new("batch/a", "1"),
        Kv::new("batch/b", "2"),
        Kv::new("batch/nested/c", "3"),
    ];

    // A failure later in the same transaction takes the batch with it.
    let err = db
        .update(|tx| {
            tx.set_many(&batch)?;
            tx.get("missing/bucket/key")
        })
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(db.get("batch/a").unwrap_err().is_not_found());

    db.set_many(&batch).unwrap();
    assert_eq!(db.all_keys("batch").unwrap(), vec!["a", "b"]);
    assert_eq!(db.get("batch/nested/c").unwrap().as_deref(), Some(&b"3"[..]));
}

#[test]
fn del_many_checks_every_bucket_first() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    db.set_many(&[Kv::new("a/1", "x"), Kv::new("a/2", "y")])
        .unwrap();

    let err = db.del_many(&["a/1", "nope/2"]).unwrap_err();
    assert!(matches!(err, Error::BucketNotFound { op: Op::DelMany, ref key } if key == "nope/2"));
    assert_eq!(db.get("a/1").unwrap().as_deref(), Some(&b"x"[..]));

    db.del_many(&["a/1", "a/2", "a/absent"]).unwrap();
    assert!(db.all("a").unwrap().is_empty());
}

#[test]
fn empty_batches_are_noops() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    db.set_many(&[]).unwrap();
    db.del_many::<&str>(&[]).unwrap();
    assert!(db.dir("").unwrap().is_empty());
}

#[test]
fn view_and_update_helpers() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);

    let count = db
        .update(|tx| {
            tx.set("h/a", b"1")?;
            tx.set("h/b", b"2")?;
            Ok(2)
        })
        .unwrap();
    assert_eq!(count, 2);

    let keys = db.view(|tx| tx.all_keys("h")).unwrap();
    assert_eq!(keys, vec!["a", "b"]);

    let err = db.view(|tx| tx.set("h/c", b"3")).unwrap_err();
    assert!(matches!(err, Error::ReadOnly { .. }));
}
