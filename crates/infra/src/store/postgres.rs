//! Postgres-backed ledger store implementation.
//!
//! Balance adjustments are a single conditional write:
//!
//! ```sql
//! UPDATE accounts SET balance = balance + $delta
//! WHERE id = $id AND balance + $delta >= 0 AND balance + $delta < $limit
//! RETURNING balance
//! ```
//!
//! The `UPDATE` takes the row lock, so concurrent units of work on the same
//! account queue behind each other and re-evaluate the predicate against the
//! committed balance; a `CHECK (balance >= 0)` constraint backs it up. `$limit`
//! is [`Amount::limit`], the first value `NUMERIC(20, 2)` cannot hold. When no
//! row comes back, re-reading the row inside the same transaction tells a missing
//! account apart from an overdraft or a balance past the limit.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (check violation) | `23514` | `InsufficientBalance` | balance constraint rejected the write |
//! | Database (numeric overflow) | `22003` | `BalanceLimitExceeded` | balance does not fit the column |
//! | Database (foreign key violation) | `23503` | `AccountNotFound` | append for an account that does not exist |
//! | Database (serialization failure) | `40001` | `Conflict` | concurrent transaction aborted this one |
//! | Database (deadlock detected) | `40P01` | `Conflict` | concurrent transaction aborted this one |
//! | Database (other) | Any other | `Unavailable` | other database errors |
//! | PoolTimedOut / PoolClosed / Io / Tls | N/A | `Unavailable` | connection failures |
//!
//! ## Thread Safety
//!
//! `PostgresLedgerStore` is `Send + Sync` and cheap to clone; all operations go
//! through the SQLx connection pool.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};

use purse_accounting::{Account, TransactionRecord, TransactionStatus};
use purse_core::{AccountId, Amount, EntryKind, TransactionId};

use crate::config::PostgresConfig;

use super::r#trait::{
    validate_new_account, AccountStore, LedgerStore, StoreError, TransactionLog, UnitOfWork,
};

/// Postgres-backed ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Create a new store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool according to `config`.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        tracing::info!(
            max_connections = config.max_connections,
            "connected to postgres"
        );
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Unit of work over [`PostgresLedgerStore`]: one database transaction.
///
/// Dropping it without `commit` rolls the database transaction back.
#[derive(Debug)]
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl AccountStore for PostgresUnitOfWork {
    #[instrument(
        skip_all,
        fields(account_id = %account_id, delta = %delta, balance = tracing::field::Empty),
        err
    )]
    async fn adjust_balance(
        &mut self,
        account_id: AccountId,
        delta: Decimal,
    ) -> Result<Decimal, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + $2
            WHERE id = $1 AND balance + $2 >= 0 AND balance + $2 < $3
            RETURNING balance
            "#,
        )
        .bind(account_id.get())
        .bind(delta)
        .bind(Amount::limit())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| match sqlstate(&e).as_deref() {
            Some("23514") => StoreError::InsufficientBalance { account_id, delta },
            Some("22003") => StoreError::BalanceLimitExceeded { account_id, delta },
            _ => map_sqlx_error("adjust_balance", e),
        })?;

        if let Some(row) = row {
            let balance: Decimal = row
                .try_get("balance")
                .map_err(|e| decode_error("balance", e))?;
            Span::current().record("balance", tracing::field::display(balance));
            return Ok(balance);
        }

        let current: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1")
                .bind(account_id.get())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("load_balance", e))?;

        match current {
            None => Err(StoreError::AccountNotFound(account_id)),
            Some(balance) if balance + delta < Decimal::ZERO => {
                Err(StoreError::InsufficientBalance { account_id, delta })
            }
            Some(_) => Err(StoreError::BalanceLimitExceeded { account_id, delta }),
        }
    }
}

#[async_trait::async_trait]
impl TransactionLog for PostgresUnitOfWork {
    #[instrument(skip_all, fields(account_id = %account_id, kind = %kind, amount = %amount), err)]
    async fn append(
        &mut self,
        account_id: AccountId,
        kind: EntryKind,
        amount: Amount,
    ) -> Result<TransactionRecord, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO transactions (account_id, kind, amount, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at
            "#,
        )
        .bind(account_id.get())
        .bind(kind.as_str())
        .bind(amount.value())
        .bind(TransactionStatus::Completed.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if sqlstate(&e).as_deref() == Some("23503") {
                StoreError::AccountNotFound(account_id)
            } else {
                map_sqlx_error("append_transaction", e)
            }
        })?;

        let id: i64 = row.try_get("id").map_err(|e| decode_error("id", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| decode_error("created_at", e))?;

        Ok(TransactionRecord {
            id: TransactionId::new(id),
            account_id,
            kind,
            amount,
            status: TransactionStatus::Completed,
            created_at,
        })
    }
}

#[async_trait::async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    type UnitOfWork = PostgresUnitOfWork;

    async fn begin(&self) -> Result<PostgresUnitOfWork, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresUnitOfWork { tx })
    }

    #[instrument(skip(self), err)]
    async fn open_account(
        &self,
        name: &str,
        opening_balance: Decimal,
    ) -> Result<Account, StoreError> {
        validate_new_account(name, opening_balance)?;

        let row = sqlx::query(
            r#"
            INSERT INTO accounts (name, opening_balance, balance)
            VALUES ($1, $2, $2)
            RETURNING id, name, opening_balance, balance
            "#,
        )
        .bind(name)
        .bind(opening_balance)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("open_account", e))?;

        account_from_row(&row)
    }

    async fn account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, opening_balance, balance FROM accounts WHERE id = $1",
        )
        .bind(account_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_account", e))?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query("SELECT id, name, opening_balance, balance FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_accounts", e))?;

        rows.iter().map(account_from_row).collect()
    }

    async fn transactions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        // One snapshot for both the existence check and the log read.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE id = $1)")
            .bind(account_id.get())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_account", e))?;
        if !exists {
            return Err(StoreError::AccountNotFound(account_id));
        }

        let rows = sqlx::query(
            r#"
            SELECT id, account_id, kind, amount, status, created_at
            FROM transactions
            WHERE account_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(account_id.get())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_transactions", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        rows.iter().map(transaction_from_row).collect()
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    Ok(Account {
        id: AccountId::new(row.try_get("id").map_err(|e| decode_error("id", e))?),
        name: row.try_get("name").map_err(|e| decode_error("name", e))?,
        opening_balance: row
            .try_get("opening_balance")
            .map_err(|e| decode_error("opening_balance", e))?,
        balance: row.try_get("balance").map_err(|e| decode_error("balance", e))?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<TransactionRecord, StoreError> {
    let kind: String = row.try_get("kind").map_err(|e| decode_error("kind", e))?;
    let status: String = row.try_get("status").map_err(|e| decode_error("status", e))?;
    let amount: Decimal = row.try_get("amount").map_err(|e| decode_error("amount", e))?;

    Ok(TransactionRecord {
        id: TransactionId::new(row.try_get("id").map_err(|e| decode_error("id", e))?),
        account_id: AccountId::new(
            row.try_get("account_id")
                .map_err(|e| decode_error("account_id", e))?,
        ),
        kind: kind
            .parse()
            .map_err(|e| StoreError::Unavailable(format!("failed to decode kind: {e}")))?,
        amount: Amount::new(amount)
            .map_err(|e| StoreError::Unavailable(format!("failed to decode amount: {e}")))?,
        status: status
            .parse()
            .map_err(|e| StoreError::Unavailable(format!("failed to decode status: {e}")))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| decode_error("created_at", e))?,
    })
}

fn decode_error(column: &str, err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(format!("failed to decode column {column}: {err}"))
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code.into_owned())
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                // Serialization failure / deadlock: the database aborted us in favour
                // of a concurrent transaction.
                Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("timed out acquiring a connection in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}
