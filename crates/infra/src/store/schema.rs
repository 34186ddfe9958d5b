//! Database bootstrap: DDL and demo seed data.

use rust_decimal::Decimal;
use sqlx::PgPool;

use purse_accounting::Account;

use super::postgres::map_sqlx_error;
use super::r#trait::{LedgerStore, StoreError};

const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    opening_balance NUMERIC(20, 2) NOT NULL CHECK (opening_balance >= 0),
    balance NUMERIC(20, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0)
)
"#;

const CREATE_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id BIGSERIAL PRIMARY KEY,
    account_id BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    kind VARCHAR(10) NOT NULL CHECK (kind IN ('CREDIT', 'DEBIT')),
    amount NUMERIC(20, 2) NOT NULL CHECK (amount > 0),
    status VARCHAR(20) NOT NULL CHECK (status = 'COMPLETED'),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_account_id
    ON transactions (account_id, id)
"#;

/// Create the ledger tables if they do not exist yet.
pub async fn init_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in [CREATE_ACCOUNTS, CREATE_TRANSACTIONS, CREATE_TRANSACTIONS_INDEX] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("init_schema", e))?;
    }
    Ok(())
}

/// Drop the ledger tables and everything in them.
pub async fn drop_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query("DROP TABLE IF EXISTS transactions, accounts CASCADE")
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("drop_schema", e))?;
    Ok(())
}

/// Drop, recreate and seed with [`default_seed`].
pub async fn reset<S: LedgerStore>(pool: &PgPool, store: &S) -> Result<Vec<Account>, StoreError> {
    drop_schema(pool).await?;
    init_schema(pool).await?;
    let accounts = seed_accounts(store, &default_seed()).await?;
    tracing::warn!(accounts = accounts.len(), "database reset and reseeded");
    Ok(accounts)
}

/// An account to provision at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedAccount {
    pub name: String,
    pub opening_balance: Decimal,
}

impl SeedAccount {
    pub fn new(name: impl Into<String>, opening_balance: Decimal) -> Self {
        Self {
            name: name.into(),
            opening_balance,
        }
    }
}

/// The demo accounts; on an empty store they receive ids 1, 2 and 3.
pub fn default_seed() -> Vec<SeedAccount> {
    vec![
        SeedAccount::new("Ahmadhi", Decimal::new(100000, 2)),
        SeedAccount::new("Prananta", Decimal::new(50000, 2)),
        SeedAccount::new("Hastiputra", Decimal::new(20000, 2)),
    ]
}

/// Provision `seed` in order.
pub async fn seed_accounts<S: LedgerStore>(
    store: &S,
    seed: &[SeedAccount],
) -> Result<Vec<Account>, StoreError> {
    let mut accounts = Vec::with_capacity(seed.len());
    for entry in seed {
        accounts.push(store.open_account(&entry.name, entry.opening_balance).await?);
    }
    Ok(accounts)
}
