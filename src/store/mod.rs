pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::transaction::Transaction;

pub use postgres::PgTransactionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// System of record for transactions. Plain get/save/list; all lifecycle
/// decisions live in the coordinator.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;
    /// Upsert. Money columns are written once on insert and never updated.
    async fn save(&self, tx: &Transaction) -> Result<Transaction, StoreError>;
    async fn list_by_buyer(&self, buyer_id: Uuid) -> Result<Vec<Transaction>, StoreError>;
    async fn list_by_vendor(&self, vendor_id: Uuid) -> Result<Vec<Transaction>, StoreError>;
    async fn list_all(&self) -> Result<Vec<Transaction>, StoreError>;
}
