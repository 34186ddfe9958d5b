use std::collections::{BTreeMap, HashMap, hash_map::Entry};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use purse_accounting::{Account, TransactionRecord, TransactionStatus};
use purse_core::{AccountId, Amount, EntryKind, TransactionId};

use super::schema;
use super::r#trait::{
    validate_new_account, AccountStore, LedgerStore, StoreError, TransactionLog, UnitOfWork,
};

#[derive(Debug)]
struct AccountRow {
    name: String,
    opening_balance: Decimal,
    balance: Decimal,
}

impl AccountRow {
    fn to_account(&self, id: AccountId) -> Account {
        Account {
            id,
            name: self.name.clone(),
            opening_balance: self.opening_balance,
            balance: self.balance,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    /// Row handles. The map lock is only held to look a row up, never across an await.
    accounts: RwLock<BTreeMap<AccountId, Arc<Mutex<AccountRow>>>>,
    log: StdMutex<Vec<TransactionRecord>>,
    last_account_id: AtomicI64,
    last_transaction_id: AtomicI64,
}

impl Shared {
    fn row(&self, account_id: AccountId) -> Result<Option<Arc<Mutex<AccountRow>>>, StoreError> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| StoreError::Unavailable("account table lock poisoned".to_string()))?;
        Ok(accounts.get(&account_id).cloned())
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Each account row sits behind its own async mutex; a
/// unit of work takes an owned guard on first touch and keeps it until it
/// commits or is dropped, so same-account work is serialized while different
/// accounts proceed in parallel.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding the default demo accounts (see [`schema::default_seed`]).
    pub async fn seeded() -> Result<Self, StoreError> {
        let store = Self::new();
        schema::seed_accounts(&store, &schema::default_seed()).await?;
        Ok(store)
    }
}

struct StagedRow {
    guard: OwnedMutexGuard<AccountRow>,
    balance: Decimal,
}

/// Unit of work over [`InMemoryLedgerStore`].
pub struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    rows: HashMap<AccountId, StagedRow>,
    appended: Vec<TransactionRecord>,
}

impl core::fmt::Debug for InMemoryUnitOfWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryUnitOfWork")
            .field("locked_accounts", &self.rows.keys().collect::<Vec<_>>())
            .field("appended", &self.appended.len())
            .finish()
    }
}

#[async_trait::async_trait]
impl AccountStore for InMemoryUnitOfWork {
    async fn adjust_balance(
        &mut self,
        account_id: AccountId,
        delta: Decimal,
    ) -> Result<Decimal, StoreError> {
        let staged = match self.rows.entry(account_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let row = self
                    .shared
                    .row(account_id)?
                    .ok_or(StoreError::AccountNotFound(account_id))?;
                // Blocks while another unit of work holds this account.
                let guard = row.lock_owned().await;
                let balance = guard.balance;
                e.insert(StagedRow { guard, balance })
            }
        };

        let next = staged.balance + delta;
        if next < Decimal::ZERO {
            return Err(StoreError::InsufficientBalance { account_id, delta });
        }
        if next >= Amount::limit() {
            return Err(StoreError::BalanceLimitExceeded { account_id, delta });
        }
        staged.balance = next;
        Ok(next)
    }
}

#[async_trait::async_trait]
impl TransactionLog for InMemoryUnitOfWork {
    async fn append(
        &mut self,
        account_id: AccountId,
        kind: EntryKind,
        amount: Amount,
    ) -> Result<TransactionRecord, StoreError> {
        if !self.rows.contains_key(&account_id) && self.shared.row(account_id)?.is_none() {
            return Err(StoreError::AccountNotFound(account_id));
        }

        let id = self.shared.last_transaction_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = TransactionRecord {
            id: TransactionId::new(id),
            account_id,
            kind,
            amount,
            status: TransactionStatus::Completed,
            created_at: Utc::now(),
        };
        self.appended.push(record.clone());
        Ok(record)
    }
}

#[async_trait::async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(mut self) -> Result<(), StoreError> {
        // Publish balances and records together under the log lock; row guards
        // are still held, so no other unit of work can observe a half-commit.
        let mut log = self
            .shared
            .log
            .lock()
            .map_err(|_| StoreError::Unavailable("transaction log lock poisoned".to_string()))?;

        for staged in self.rows.values_mut() {
            staged.guard.balance = staged.balance;
        }
        log.append(&mut self.appended);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type UnitOfWork = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork, StoreError> {
        Ok(InMemoryUnitOfWork {
            shared: self.shared.clone(),
            rows: HashMap::new(),
            appended: Vec::new(),
        })
    }

    async fn open_account(
        &self,
        name: &str,
        opening_balance: Decimal,
    ) -> Result<Account, StoreError> {
        validate_new_account(name, opening_balance)?;

        let mut balance = opening_balance;
        balance.rescale(Amount::SCALE);
        let id = AccountId::new(self.shared.last_account_id.fetch_add(1, Ordering::SeqCst) + 1);
        let row = AccountRow {
            name: name.to_string(),
            opening_balance: balance,
            balance,
        };
        let account = row.to_account(id);

        self.shared
            .accounts
            .write()
            .map_err(|_| StoreError::Unavailable("account table lock poisoned".to_string()))?
            .insert(id, Arc::new(Mutex::new(row)));
        Ok(account)
    }

    async fn account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        match self.shared.row(account_id)? {
            Some(row) => Ok(Some(row.lock().await.to_account(account_id))),
            None => Ok(None),
        }
    }

    async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<(AccountId, Arc<Mutex<AccountRow>>)> = {
            let accounts = self
                .shared
                .accounts
                .read()
                .map_err(|_| StoreError::Unavailable("account table lock poisoned".to_string()))?;
            accounts.iter().map(|(id, row)| (*id, row.clone())).collect()
        };

        let mut out = Vec::with_capacity(rows.len());
        for (id, row) in rows {
            out.push(row.lock().await.to_account(id));
        }
        Ok(out)
    }

    async fn transactions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        if self.shared.row(account_id)?.is_none() {
            return Err(StoreError::AccountNotFound(account_id));
        }

        let log = self
            .shared
            .log
            .lock()
            .map_err(|_| StoreError::Unavailable("transaction log lock poisoned".to_string()))?;
        let mut records: Vec<TransactionRecord> = log
            .iter()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn amount(v: Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    #[tokio::test]
    async fn open_account_assigns_sequential_ids() {
        let store = InMemoryLedgerStore::new();
        let a = store.open_account("Ahmadhi", dec!(1000)).await.unwrap();
        let b = store.open_account("Prananta", dec!(500.00)).await.unwrap();

        assert_eq!(a.id, AccountId::new(1));
        assert_eq!(b.id, AccountId::new(2));
        assert_eq!(a.balance.to_string(), "1000.00");
        assert_eq!(store.accounts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn open_account_rejects_invalid_data() {
        let store = InMemoryLedgerStore::new();
        assert!(matches!(
            store.open_account("x", dec!(-1)).await,
            Err(StoreError::InvalidAccount(_))
        ));
        assert!(matches!(
            store.open_account(" ", dec!(1)).await,
            Err(StoreError::InvalidAccount(_))
        ));
        assert!(matches!(
            store.open_account("x", dec!(0.001)).await,
            Err(StoreError::InvalidAccount(_))
        ));
        assert!(matches!(
            store.open_account("x", Amount::limit()).await,
            Err(StoreError::InvalidAccount(_))
        ));
    }

    #[tokio::test]
    async fn adjustment_past_the_balance_limit_is_refused() {
        let store = InMemoryLedgerStore::new();
        let acc = store
            .open_account("Ahmadhi", dec!(999999999999999999.99))
            .await
            .unwrap();

        let mut uow = store.begin().await.unwrap();
        let err = uow
            .adjust_balance(acc.id, dec!(999999999999999999.99))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::BalanceLimitExceeded {
                account_id: acc.id,
                delta: dec!(999999999999999999.99),
            }
        );
        assert!(!err.is_transient());
        assert_eq!(
            uow.adjust_balance(acc.id, dec!(-0.99)).await.unwrap(),
            dec!(999999999999999999.00)
        );
        uow.rollback().await.unwrap();

        let reloaded = store.account(acc.id).await.unwrap().unwrap();
        assert_eq!(reloaded.balance, dec!(999999999999999999.99));
    }

    #[tokio::test]
    async fn committed_unit_of_work_is_visible() {
        let store = InMemoryLedgerStore::new();
        let acc = store.open_account("Ahmadhi", dec!(100.00)).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let balance = uow.adjust_balance(acc.id, dec!(-40.00)).await.unwrap();
        let record = uow
            .append(acc.id, EntryKind::Debit, amount(dec!(40.00)))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(balance, dec!(60.00));
        assert_eq!(store.account(acc.id).await.unwrap().unwrap().balance, dec!(60.00));
        assert_eq!(store.transactions(acc.id).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn dropped_unit_of_work_leaves_no_trace() {
        let store = InMemoryLedgerStore::new();
        let acc = store.open_account("Ahmadhi", dec!(100.00)).await.unwrap();

        {
            let mut uow = store.begin().await.unwrap();
            uow.adjust_balance(acc.id, dec!(25.00)).await.unwrap();
            uow.append(acc.id, EntryKind::Credit, amount(dec!(25.00)))
                .await
                .unwrap();
        }

        assert_eq!(store.account(acc.id).await.unwrap().unwrap().balance, dec!(100.00));
        assert!(store.transactions(acc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overdraft_is_refused_without_state_change() {
        let store = InMemoryLedgerStore::new();
        let acc = store.open_account("Prananta", dec!(500.00)).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let err = uow
            .adjust_balance(acc.id, dec!(-9999999999))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::InsufficientBalance {
                account_id: acc.id,
                delta: dec!(-9999999999),
            }
        );
        // The refused delta was not staged.
        assert_eq!(uow.adjust_balance(acc.id, dec!(-500.00)).await.unwrap(), dec!(0.00));
        uow.rollback().await.unwrap();

        assert_eq!(store.account(acc.id).await.unwrap().unwrap().balance, dec!(500.00));
    }

    #[tokio::test]
    async fn unknown_accounts_are_reported() {
        let store = InMemoryLedgerStore::new();
        let missing = AccountId::new(99);

        let mut uow = store.begin().await.unwrap();
        assert_eq!(
            uow.adjust_balance(missing, dec!(1)).await.unwrap_err(),
            StoreError::AccountNotFound(missing)
        );
        assert_eq!(
            uow.append(missing, EntryKind::Credit, amount(dec!(1)))
                .await
                .unwrap_err(),
            StoreError::AccountNotFound(missing)
        );
        assert!(store.account(missing).await.unwrap().is_none());
        assert_eq!(
            store.transactions(missing).await.unwrap_err(),
            StoreError::AccountNotFound(missing)
        );
    }

    #[tokio::test]
    async fn same_account_units_of_work_are_serialized() {
        let store = InMemoryLedgerStore::new();
        let acc = store.open_account("Ahmadhi", dec!(10.00)).await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.adjust_balance(acc.id, dec!(-10.00)).await.unwrap();

        // A second unit of work on the same account waits for the first.
        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                let result = second.adjust_balance(acc.id, dec!(-10.00)).await;
                second.rollback().await.unwrap();
                result
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        first.commit().await.unwrap();
        let result = contender.await.unwrap();
        assert!(matches!(result, Err(StoreError::InsufficientBalance { .. })));
    }

    #[tokio::test]
    async fn different_accounts_do_not_block_each_other() {
        let store = InMemoryLedgerStore::new();
        let a = store.open_account("Ahmadhi", dec!(10.00)).await.unwrap();
        let b = store.open_account("Prananta", dec!(10.00)).await.unwrap();

        let mut holds_a = store.begin().await.unwrap();
        holds_a.adjust_balance(a.id, dec!(1)).await.unwrap();

        let mut on_b = store.begin().await.unwrap();
        let adjusted = tokio::time::timeout(
            Duration::from_millis(200),
            on_b.adjust_balance(b.id, dec!(1)),
        )
        .await
        .expect("account b must not wait for account a");
        assert_eq!(adjusted.unwrap(), dec!(11.00));

        on_b.commit().await.unwrap();
        holds_a.rollback().await.unwrap();
    }
}
