use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::transaction::Transaction;
use crate::store::{StoreError, TransactionStore};

const COLUMNS: &str = "transaction_id AS id, buyer_id, vendor_id, ticket_id, \
     total_amount, platform_fee, vendor_amount, payment_method, payment_status, \
     payment_token, transaction_date, validation_date, status";

pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM transactions WHERE transaction_id = $1");
        let row = sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn save(&self, tx: &Transaction) -> Result<Transaction, StoreError> {
        // The money columns are insert-only: an update can change the
        // lifecycle fields but never the amounts agreed at initiation.
        let sql = format!(
            "INSERT INTO transactions \
                 (transaction_id, buyer_id, vendor_id, ticket_id, total_amount, \
                  platform_fee, vendor_amount, payment_method, payment_status, \
                  payment_token, transaction_date, validation_date, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (transaction_id) DO UPDATE SET \
                 vendor_id = EXCLUDED.vendor_id, \
                 payment_status = EXCLUDED.payment_status, \
                 payment_token = EXCLUDED.payment_token, \
                 validation_date = EXCLUDED.validation_date, \
                 status = EXCLUDED.status \
             RETURNING {COLUMNS}"
        );
        let saved = sqlx::query_as::<_, Transaction>(&sql)
            .bind(tx.id)
            .bind(tx.buyer_id)
            .bind(tx.vendor_id)
            .bind(tx.ticket_id)
            .bind(tx.total_amount)
            .bind(tx.platform_fee)
            .bind(tx.vendor_amount)
            .bind(tx.payment_method)
            .bind(tx.payment_status)
            .bind(tx.payment_token.as_deref())
            .bind(tx.transaction_date)
            .bind(tx.validation_date)
            .bind(tx.status)
            .fetch_one(&self.pool)
            .await?;
        Ok(saved)
    }

    async fn list_by_buyer(&self, buyer_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM transactions WHERE buyer_id = $1 ORDER BY transaction_date DESC"
        );
        let rows = sqlx::query_as::<_, Transaction>(&sql)
            .bind(buyer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_by_vendor(&self, vendor_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM transactions WHERE vendor_id = $1 ORDER BY transaction_date DESC"
        );
        let rows = sqlx::query_as::<_, Transaction>(&sql)
            .bind(vendor_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_all(&self) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM transactions ORDER BY transaction_date DESC");
        let rows = sqlx::query_as::<_, Transaction>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
