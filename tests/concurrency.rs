use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use ledger_eng::model::NewAccount;
use ledger_eng::{
    Account, Amount, Engine, LedgerStore, MemoryStore, SqliteStore, TransferError,
    TransferRequest,
};

fn dollars(value: &str) -> Amount {
    value.parse().unwrap()
}

fn total(accounts: &[Account]) -> Amount {
    accounts.iter().map(Account::net_position).sum()
}

fn competing_withdrawals<S: LedgerStore>(store: S) {
    let a = store
        .open_account(NewAccount::checking(1, "A", dollars("500")))
        .unwrap();
    let b = store
        .open_account(NewAccount::checking(2, "B", Amount::ZERO))
        .unwrap();
    let engine = Engine::new(store);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..100)
            .map(|_| {
                s.spawn(|| engine.execute(TransferRequest::new(a.id, b.id, dollars("10"))))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let completed = results.iter().filter(|r| r.is_ok()).count();
    let short = results
        .iter()
        .filter(|r| matches!(r, Err(TransferError::InsufficientFunds(_))))
        .count();
    assert_eq!(completed, 50);
    assert_eq!(short, 50);

    let store = engine.store();
    assert_eq!(store.get_account(a.id).unwrap().balance, Amount::ZERO);
    assert_eq!(store.get_account(b.id).unwrap().balance, dollars("500"));
    // A only holds its own outflows; inflows on B name no counterparty
    let outflows = store.list_entries_for_account(a.id).unwrap();
    assert_eq!(outflows.len(), 50);
    assert!(outflows.iter().all(|e| e.account_id == a.id && e.amount == -dollars("10")));
    let inflows = store.list_entries_for_account(b.id).unwrap();
    let own: Vec<_> = inflows.iter().filter(|e| e.account_id == b.id).collect();
    assert_eq!(own.len(), 50);
    assert!(own.iter().all(|e| e.counterparty_account_id.is_none()));
}

fn opposite_directions<S: LedgerStore>(store: S) {
    let a = store
        .open_account(NewAccount::checking(1, "A", dollars("1000")))
        .unwrap();
    let b = store
        .open_account(NewAccount::checking(2, "B", dollars("1000")))
        .unwrap();
    let engine = Engine::new(store);

    thread::scope(|s| {
        for i in 0..8 {
            let engine = &engine;
            s.spawn(move || {
                let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
                for _ in 0..25 {
                    engine
                        .execute(TransferRequest::new(from, to, dollars("1")))
                        .unwrap();
                }
            });
        }
    });

    let accounts = engine.store().list_accounts().unwrap();
    assert_eq!(total(&accounts), dollars("2000"));
    assert_eq!(accounts[0].balance, dollars("1000"));
    assert_eq!(accounts[1].balance, dollars("1000"));
}

fn entries_are_paired<S: LedgerStore>(store: S) {
    let ids: Vec<_> = (0..4)
        .map(|n| {
            store
                .open_account(NewAccount::checking(n + 1, &format!("ACC-{n}"), dollars("100")))
                .unwrap()
                .id
        })
        .collect();
    let engine = Engine::new(store);

    thread::scope(|s| {
        for (i, &from) in ids.iter().enumerate() {
            let engine = &engine;
            let to = ids[(i + 1) % ids.len()];
            s.spawn(move || {
                for _ in 0..10 {
                    engine
                        .execute(TransferRequest::new(from, to, dollars("2.50")))
                        .unwrap();
                }
            });
        }
    });

    let store = engine.store();
    let mut transfers = 0;
    for &user in &[1, 2, 3, 4] {
        for transfer in store.list_transfers_for_user(user).unwrap() {
            let entries: Vec<_> = store
                .list_entries_for_account(transfer.from_account_id)
                .unwrap()
                .into_iter()
                .chain(store.list_entries_for_account(transfer.to_account_id).unwrap())
                .filter(|e| e.transfer_id == Some(transfer.id))
                .collect();
            let mut pair: Vec<_> = entries.iter().map(|e| (e.id, e)).collect();
            pair.sort_by_key(|(id, _)| *id);
            pair.dedup_by_key(|(id, _)| *id);
            assert_eq!(pair.len(), 2, "transfer {} has {} entries", transfer.id, pair.len());

            let (out, inc) = (pair[0].1, pair[1].1);
            assert_eq!(out.account_id, transfer.from_account_id);
            assert_eq!(inc.account_id, transfer.to_account_id);
            assert_eq!(out.amount, -inc.amount);
            assert_eq!(inc.amount, transfer.amount);
            transfers += 1;
        }
    }
    // each transfer is listed for both users involved
    assert_eq!(transfers, 80);
    assert_eq!(total(&store.list_accounts().unwrap()), dollars("400"));
}

fn readers_never_see_half_a_transfer<S: LedgerStore>(store: S) {
    for n in 0..4 {
        store
            .open_account(NewAccount::checking(1, &format!("ACC-{n}"), dollars("250")))
            .unwrap();
    }
    let engine = Engine::new(store);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut reads = 0;
            while !done.load(Ordering::Acquire) {
                let accounts = engine.store().list_accounts().unwrap();
                assert_eq!(total(&accounts), dollars("1000"));
                reads += 1;
            }
            reads
        });

        let writers: Vec<_> = (1..=4u32)
            .map(|from| {
                let engine = &engine;
                s.spawn(move || {
                    let to = from % 4 + 1;
                    for _ in 0..50 {
                        let _ = engine.execute(TransferRequest::new(from, to, dollars("3.33")));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        assert!(reader.join().unwrap() > 0);
    });

    assert_eq!(total(&engine.store().list_accounts().unwrap()), dollars("1000"));
}

#[test]
fn memory_competing_withdrawals() {
    competing_withdrawals(MemoryStore::new());
}

#[test]
fn sqlite_competing_withdrawals() {
    competing_withdrawals(SqliteStore::open_in_memory().unwrap());
}

#[test]
fn memory_opposite_directions() {
    opposite_directions(MemoryStore::new());
}

#[test]
fn sqlite_opposite_directions() {
    opposite_directions(SqliteStore::open_in_memory().unwrap());
}

#[test]
fn memory_entries_are_paired() {
    entries_are_paired(MemoryStore::new());
}

#[test]
fn sqlite_entries_are_paired() {
    entries_are_paired(SqliteStore::open_in_memory().unwrap());
}

#[test]
fn memory_readers_never_see_half_a_transfer() {
    readers_never_see_half_a_transfer(MemoryStore::new());
}

#[test]
fn sqlite_readers_never_see_half_a_transfer() {
    readers_never_see_half_a_transfer(SqliteStore::open_in_memory().unwrap());
}
