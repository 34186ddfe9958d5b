//! Store and engine wiring behind the HTTP layer.

use purse_accounting::{Account, AccountAudit, TransactionRecord};
use purse_core::{AccountId, Amount, EntryKind};
use purse_infra::config::StoreConfig;
use purse_infra::store::{schema, InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError};
use purse_infra::{Applied, AuditError, EngineConfig, LedgerEngine, LedgerError};

use crate::config::AppConfig;

/// The ledger engine, over whichever store the process was configured with.
#[derive(Debug, Clone)]
pub enum AppServices {
    InMemory(LedgerEngine<InMemoryLedgerStore>),
    Postgres(LedgerEngine<PostgresLedgerStore>),
}

// Forward to the engine of whichever backend is active.
macro_rules! with_engine {
    ($services:expr, $engine:ident => $body:expr) => {
        match $services {
            AppServices::InMemory($engine) => $body,
            AppServices::Postgres($engine) => $body,
        }
    };
}

impl AppServices {
    /// In-memory services holding the default demo accounts.
    pub async fn in_memory(engine_config: EngineConfig) -> Result<Self, StoreError> {
        let store = InMemoryLedgerStore::seeded().await?;
        Ok(AppServices::InMemory(LedgerEngine::with_config(store, engine_config)))
    }

    pub async fn apply(
        &self,
        account_id: AccountId,
        kind: EntryKind,
        amount: Amount,
    ) -> Result<Applied, LedgerError> {
        with_engine!(self, engine => engine.apply(account_id, kind, amount).await)
    }

    pub async fn account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        with_engine!(self, engine => engine.account(account_id).await)
    }

    pub async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        with_engine!(self, engine => engine.accounts().await)
    }

    pub async fn transactions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        with_engine!(self, engine => engine.transactions(account_id).await)
    }

    pub async fn verify_account(&self, account_id: AccountId) -> Result<AccountAudit, AuditError> {
        with_engine!(self, engine => engine.verify_account(account_id).await)
    }

    /// Release backend resources (closes the Postgres pool).
    pub async fn shutdown(&self) {
        if let AppServices::Postgres(engine) = self {
            engine.store().close().await;
        }
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, StoreError> {
    match &config.store {
        StoreConfig::Memory => {
            tracing::info!("using in-memory ledger store");
            AppServices::in_memory(config.engine).await
        }
        StoreConfig::Postgres(pg) => {
            let store = PostgresLedgerStore::connect(pg).await?;

            if config.reset_database {
                schema::reset(store.pool(), &store).await?;
            } else {
                schema::init_schema(store.pool()).await?;
                if store.accounts().await?.is_empty() {
                    let seeded = schema::seed_accounts(&store, &schema::default_seed()).await?;
                    tracing::info!(accounts = seeded.len(), "seeded empty database");
                }
            }

            Ok(AppServices::Postgres(LedgerEngine::with_config(
                store,
                config.engine,
            )))
        }
    }
}
