use serde::{Deserialize, Serialize};
use unitwork_core::{
    Entity, RepoError, SessionOptions, SqliteSession, StoreError, Transaction, UnitOfWork,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LedgerEntry {
    id: String,
    amount_cents: i64,
}

impl Entity for LedgerEntry {
    type Key = String;
    const KIND: &'static str = "ledger_entries";

    fn key(&self) -> String {
        self.id.clone()
    }
}

fn entry(id: &str, amount_cents: i64) -> LedgerEntry {
    LedgerEntry {
        id: id.to_string(),
        amount_cents,
    }
}

fn open_uow(path: &std::path::Path) -> UnitOfWork<SqliteSession> {
    UnitOfWork::new(SqliteSession::open(path, SessionOptions::default()).unwrap())
}

#[test]
fn committed_transaction_makes_saved_work_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db3");

    {
        let uow = open_uow(&path);
        let tx = uow.begin_transaction().unwrap();
        uow.repository::<LedgerEntry>()
            .add(&entry("e1", 500))
            .unwrap();
        assert_eq!(uow.save_changes().unwrap(), 1);
        tx.commit().unwrap();
    }

    let uow = open_uow(&path);
    let loaded = uow
        .repository::<LedgerEntry>()
        .get_by_key(&"e1".to_string())
        .unwrap()
        .unwrap();
    assert_eq!(loaded.amount_cents, 500);
}

#[test]
fn rolled_back_transaction_discards_saved_work() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db3");

    {
        let uow = open_uow(&path);
        let tx = uow.begin_transaction().unwrap();
        uow.repository::<LedgerEntry>()
            .add(&entry("e1", 500))
            .unwrap();
        assert_eq!(uow.save_changes().unwrap(), 1);
        tx.rollback().unwrap();
    }

    let uow = open_uow(&path);
    assert!(uow
        .repository::<LedgerEntry>()
        .get_by_key(&"e1".to_string())
        .unwrap()
        .is_none());
}

#[test]
fn dropping_an_unresolved_transaction_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db3");

    {
        let uow = open_uow(&path);
        {
            let _tx = uow.begin_transaction().unwrap();
            uow.repository::<LedgerEntry>()
                .add(&entry("e1", 500))
                .unwrap();
            uow.save_changes().unwrap();
            // Handle goes out of scope without commit or rollback.
        }
    }

    let uow = open_uow(&path);
    assert!(uow
        .repository::<LedgerEntry>()
        .get_all()
        .unwrap()
        .is_empty());
}

#[test]
fn second_transaction_while_one_is_active_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db3");
    let uow = open_uow(&path);

    let tx = uow.begin_transaction().unwrap();
    let err = uow.begin_transaction().unwrap_err();
    assert!(matches!(
        err,
        RepoError::Store(StoreError::TransactionActive)
    ));

    // The original transaction is still usable afterwards.
    tx.rollback().unwrap();
    let _tx2 = uow.begin_transaction().unwrap();
}

#[test]
fn save_outside_any_transaction_is_immediately_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db3");

    {
        let uow = open_uow(&path);
        uow.repository::<LedgerEntry>()
            .add(&entry("e1", 500))
            .unwrap();
        uow.save_changes().unwrap();
    }

    let uow = open_uow(&path);
    assert_eq!(uow.repository::<LedgerEntry>().get_all().unwrap().len(), 1);
}
