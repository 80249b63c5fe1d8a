use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serial_test::serial;
use stratum::lock_manager::LockManager;
use stratum::transaction::TransactionManager;
use stratum::{Error, Rid};

#[test]
#[serial]
fn test_pending_exclusive_locks_are_granted_fifo() {
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::new());
    let rid: Rid = (1, 0);

    let t1 = txn_manager.begin();
    lock_manager.lock_exclusive(&t1, rid).unwrap();

    let grant_order = Arc::new(Mutex::new(Vec::new()));

    let lm = lock_manager.clone();
    let tm = txn_manager.clone();
    let order = grant_order.clone();
    let waiter2 = thread::spawn(move || {
        let t2 = tm.begin();
        lm.lock_exclusive(&t2, rid).unwrap();
        order.lock().unwrap().push("t2");
        thread::sleep(Duration::from_millis(20));
        lm.unlock(&t2, rid);
    });

    // Let T2 queue first, then enqueue T3 behind it.
    thread::sleep(Duration::from_millis(50));
    let lm = lock_manager.clone();
    let tm = txn_manager.clone();
    let order = grant_order.clone();
    let waiter3 = thread::spawn(move || {
        let t3 = tm.begin();
        lm.lock_exclusive(&t3, rid).unwrap();
        order.lock().unwrap().push("t3");
        lm.unlock(&t3, rid);
    });
    thread::sleep(Duration::from_millis(50));

    lock_manager.unlock(&t1, rid);
    waiter2.join().unwrap();
    waiter3.join().unwrap();

    assert_eq!(*grant_order.lock().unwrap(), vec!["t2", "t3"]);
}

#[test]
#[serial]
fn test_opposite_lock_order_deadlocks_exactly_once() {
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::with_managers(
        None,
        Some(lock_manager.clone()),
        None,
    ));
    let rid1: Rid = (1, 0);
    let rid2: Rid = (2, 0);

    let t1 = txn_manager.begin();
    let t2 = txn_manager.begin();
    lock_manager.lock_exclusive(&t1, rid1).unwrap();
    lock_manager.lock_exclusive(&t2, rid2).unwrap();

    let lm = lock_manager.clone();
    let t1c = t1.clone();
    let blocked = thread::spawn(move || lm.lock_exclusive(&t1c, rid2));

    thread::sleep(Duration::from_millis(50));
    match lock_manager.lock_exclusive(&t2, rid1) {
        Err(Error::Deadlock) => {}
        other => panic!("expected Deadlock, got {other:?}"),
    }

    // The deadlocked side aborts, which releases its holds and unblocks
    // the survivor.
    txn_manager.abort(&t2).unwrap();
    blocked.join().unwrap().unwrap();
    lock_manager.unlock_all(&t1);
}

#[test]
#[serial]
fn test_pending_exclusive_beats_later_shared_request() {
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::new());
    let rid: Rid = (8, 3);

    let t1 = txn_manager.begin();
    lock_manager.lock_exclusive(&t1, rid).unwrap();

    let grant_order = Arc::new(Mutex::new(Vec::new()));

    let lm = lock_manager.clone();
    let tm = txn_manager.clone();
    let order = grant_order.clone();
    let writer = thread::spawn(move || {
        let w = tm.begin();
        lm.lock_exclusive(&w, rid).unwrap();
        order.lock().unwrap().push("writer");
        thread::sleep(Duration::from_millis(20));
        lm.unlock(&w, rid);
    });

    thread::sleep(Duration::from_millis(50));
    let lm = lock_manager.clone();
    let tm = txn_manager.clone();
    let order = grant_order.clone();
    let reader = thread::spawn(move || {
        let r = tm.begin();
        lm.lock_shared(&r, rid).unwrap();
        order.lock().unwrap().push("reader");
        lm.unlock(&r, rid);
    });
    thread::sleep(Duration::from_millis(50));

    lock_manager.unlock(&t1, rid);
    writer.join().unwrap();
    reader.join().unwrap();

    // The reader queued behind the pending writer and stayed there.
    assert_eq!(*grant_order.lock().unwrap(), vec!["writer", "reader"]);
}

#[test]
#[serial]
fn test_shared_readers_coexist_while_writer_waits() {
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::new());
    let rid: Rid = (5, 2);

    let r1 = txn_manager.begin();
    let r2 = txn_manager.begin();
    lock_manager.lock_shared(&r1, rid).unwrap();
    lock_manager.lock_shared(&r2, rid).unwrap();

    let lm = lock_manager.clone();
    let tm = txn_manager.clone();
    let writer = thread::spawn(move || {
        let w = tm.begin();
        lm.lock_exclusive(&w, rid).unwrap();
        lm.unlock_all(&w);
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!writer.is_finished(), "writer must wait for both readers");

    lock_manager.unlock(&r1, rid);
    thread::sleep(Duration::from_millis(50));
    assert!(!writer.is_finished(), "writer must wait for the second reader");

    lock_manager.unlock(&r2, rid);
    writer.join().unwrap();
}

#[test]
#[serial]
fn test_commit_releases_locks_for_waiters() {
    let dir = tempfile::tempdir().unwrap();
    let log_manager = Arc::new(stratum::wal::LogManager::open(dir.path().join("c.log")).unwrap());
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::with_managers(
        Some(log_manager),
        Some(lock_manager.clone()),
        None,
    ));
    let rid: Rid = (4, 4);

    let t1 = txn_manager.begin();
    lock_manager.lock_exclusive(&t1, rid).unwrap();

    let lm = lock_manager.clone();
    let tm = txn_manager.clone();
    let waiter = thread::spawn(move || {
        let t2 = tm.begin();
        lm.lock_exclusive(&t2, rid).unwrap();
        lm.unlock_all(&t2);
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!waiter.is_finished());

    txn_manager.commit(&t1).unwrap();
    waiter.join().unwrap();
}
