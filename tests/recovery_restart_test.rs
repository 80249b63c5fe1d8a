use std::sync::Arc;

use stratum::buffer_pool::BufferPoolManager;
use stratum::pager::Pager;
use stratum::recovery::RecoveryManager;
use stratum::transaction::TransactionManager;
use stratum::wal::{LogManager, LogRecord};
use tempfile::tempdir;

#[test]
fn test_rollback_restores_old_values_in_cache() {
    let dir = tempdir().unwrap();
    let pager = Pager::open(dir.path().join("rollback.db")).unwrap();
    let bufmgr = Arc::new(BufferPoolManager::new(pager, 10));
    let log_manager = Arc::new(LogManager::open(dir.path().join("rollback.log")).unwrap());
    let recovery = Arc::new(RecoveryManager::new(log_manager.clone(), bufmgr.clone()));
    let txn_manager =
        TransactionManager::with_managers(Some(log_manager.clone()), None, Some(recovery));

    let page_id = {
        let guard = bufmgr.create_page().unwrap();
        guard.page_id()
    };
    bufmgr.flush().unwrap();

    // WAL protocol: log the byte-range update, then apply it.
    let txn = txn_manager.begin();
    log_manager
        .append(&LogRecord::update(
            txn.id(),
            page_id,
            100,
            vec![0, 0, 0, 0],
            vec![1, 2, 3, 4],
        ))
        .unwrap();
    {
        let guard = bufmgr.acquire_page(page_id).unwrap();
        guard.write()[100..104].copy_from_slice(&[1, 2, 3, 4]);
    }

    // Abort drives the rollback; the cached page shows the old bytes
    // again before any lock would be released.
    txn_manager.abort(&txn).unwrap();

    let guard = bufmgr.acquire_page(page_id).unwrap();
    assert_eq!(&guard.read()[100..104], &[0, 0, 0, 0]);
}

#[test]
fn test_crash_recovery_redoes_committed_and_undoes_active() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("crash.db");
    let log_path = dir.path().join("crash.log");

    let page_id;
    {
        let pager = Pager::open(&db_path).unwrap();
        let bufmgr = Arc::new(BufferPoolManager::new(pager, 10));
        let log_manager = Arc::new(LogManager::open(&log_path).unwrap());
        let txn_manager = TransactionManager::with_managers(Some(log_manager.clone()), None, None);

        page_id = {
            let guard = bufmgr.create_page().unwrap();
            guard.page_id()
        };
        bufmgr.flush().unwrap();

        // T1 commits an update; T2 starts one and never commits.
        let t1 = txn_manager.begin();
        log_manager
            .append(&LogRecord::update(
                t1.id(),
                page_id,
                100,
                vec![0x00; 4],
                vec![0x11; 4],
            ))
            .unwrap();
        {
            let guard = bufmgr.acquire_page(page_id).unwrap();
            guard.write()[100..104].copy_from_slice(&[0x11; 4]);
        }
        txn_manager.commit(&t1).unwrap();

        let t2 = txn_manager.begin();
        log_manager
            .append(&LogRecord::update(
                t2.id(),
                page_id,
                100,
                vec![0x11; 4],
                vec![0x22; 4],
            ))
            .unwrap();
        {
            let guard = bufmgr.acquire_page(page_id).unwrap();
            guard.write()[100..104].copy_from_slice(&[0x22; 4]);
        }
        // Crash: the pool is dropped without flushing.
    }

    // Restart: recovery redoes T1 and undoes T2.
    let pager = Pager::open(&db_path).unwrap();
    let bufmgr = Arc::new(BufferPoolManager::new(pager, 10));
    let log_manager = Arc::new(LogManager::open(&log_path).unwrap());
    let recovery = RecoveryManager::new(log_manager, bufmgr.clone());
    recovery.recover().unwrap();

    let guard = bufmgr.acquire_page(page_id).unwrap();
    assert_eq!(&guard.read()[100..104], &[0x11; 4]);

    // Recovery flushed the pool, so the bytes are durable on disk too.
    let mut pager = Pager::open(&db_path).unwrap();
    let mut data = [0u8; stratum::PAGE_SIZE];
    pager.read_page(page_id, &mut data).unwrap();
    assert_eq!(&data[100..104], &[0x11; 4]);
}

#[test]
fn test_recovery_is_idempotent() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("idem.db");
    let log_path = dir.path().join("idem.log");

    let page_id;
    {
        let pager = Pager::open(&db_path).unwrap();
        let bufmgr = Arc::new(BufferPoolManager::new(pager, 10));
        let log_manager = Arc::new(LogManager::open(&log_path).unwrap());
        let txn_manager = TransactionManager::with_managers(Some(log_manager.clone()), None, None);

        page_id = bufmgr.create_page().unwrap().page_id();
        bufmgr.flush().unwrap();

        let t1 = txn_manager.begin();
        log_manager
            .append(&LogRecord::update(
                t1.id(),
                page_id,
                0,
                vec![0x00; 8],
                vec![0xee; 8],
            ))
            .unwrap();
        txn_manager.commit(&t1).unwrap();
    }

    for _ in 0..2 {
        let pager = Pager::open(&db_path).unwrap();
        let bufmgr = Arc::new(BufferPoolManager::new(pager, 10));
        let log_manager = Arc::new(LogManager::open(&log_path).unwrap());
        RecoveryManager::new(log_manager, bufmgr.clone())
            .recover()
            .unwrap();
        let guard = bufmgr.acquire_page(page_id).unwrap();
        assert_eq!(&guard.read()[..8], &[0xee; 8]);
    }
}

#[test]
fn test_interleaved_transactions_recover_to_committed_state() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("mix.db");
    let log_path = dir.path().join("mix.log");

    let (p1, p2);
    {
        let pager = Pager::open(&db_path).unwrap();
        let bufmgr = Arc::new(BufferPoolManager::new(pager, 10));
        let log_manager = Arc::new(LogManager::open(&log_path).unwrap());
        let txn_manager = TransactionManager::with_managers(Some(log_manager.clone()), None, None);

        p1 = bufmgr.create_page().unwrap().page_id();
        p2 = bufmgr.create_page().unwrap().page_id();
        bufmgr.flush().unwrap();

        // Interleaved: T1 commits, T2 aborts, T3 is in flight at the crash.
        let t1 = txn_manager.begin();
        let t2 = txn_manager.begin();
        let t3 = txn_manager.begin();

        log_manager
            .append(&LogRecord::update(t1.id(), p1, 0, vec![0; 2], vec![0xaa; 2]))
            .unwrap();
        log_manager
            .append(&LogRecord::update(t2.id(), p1, 8, vec![0; 2], vec![0xbb; 2]))
            .unwrap();
        log_manager
            .append(&LogRecord::update(t3.id(), p2, 0, vec![0; 2], vec![0xcc; 2]))
            .unwrap();
        txn_manager.commit(&t1).unwrap();
        txn_manager.abort(&t2).unwrap();
        // T3: no commit, no abort.
    }

    let pager = Pager::open(&db_path).unwrap();
    let bufmgr = Arc::new(BufferPoolManager::new(pager, 10));
    let log_manager = Arc::new(LogManager::open(&log_path).unwrap());
    RecoveryManager::new(log_manager, bufmgr.clone())
        .recover()
        .unwrap();

    let guard = bufmgr.acquire_page(p1).unwrap();
    assert_eq!(&guard.read()[0..2], &[0xaa; 2], "committed work is redone");
    assert_eq!(&guard.read()[8..10], &[0x00; 2], "aborted work stays undone");
    let guard = bufmgr.acquire_page(p2).unwrap();
    assert_eq!(&guard.read()[0..2], &[0x00; 2], "in-flight work is undone");
}
