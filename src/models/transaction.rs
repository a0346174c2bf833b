use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use crate::service::fees::FeeBreakdown;

/// Lifecycle of a purchase. This field is authoritative; `PaymentStatus`
/// is a derived signal and is only ever advanced together with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "transaction_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Canceled,
    Refunded,
}

impl TransactionStatus {
    /// Legal edges: PENDING -> COMPLETED | CANCELED | FAILED,
    /// COMPLETED -> REFUNDED. Everything else is rejected.
    pub fn allows(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Canceled) | (Pending, Failed) | (Completed, Refunded)
        )
    }

    pub fn is_terminal(self) -> bool {
        use TransactionStatus::*;
        matches!(self, Canceled | Failed | Refunded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "payment_method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    CreditCard,
    Paypal,
    BankTransfer,
}

#[derive(Debug, Error)]
#[error("transaction cannot move from {from:?} to {to:?}")]
pub struct IllegalTransition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub buyer_id: Uuid,
    /// Captured from the ticket snapshot at reservation time. Only legacy
    /// rows created before capture existed can miss it; the backfill sweep
    /// closes those.
    pub vendor_id: Option<Uuid>,
    pub ticket_id: Uuid,
    pub total_amount: Decimal,
    pub platform_fee: Decimal,
    pub vendor_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// External gateway reference (payment intent id). Never serialized to
    /// API clients.
    #[serde(skip_serializing, default)]
    pub payment_token: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub validation_date: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
}

impl Transaction {
    /// Builds a fresh PENDING/UNPAID transaction. The money fields come from
    /// a single fee quote and are never mutated independently afterward.
    pub fn new(
        buyer_id: Uuid,
        ticket_id: Uuid,
        vendor_id: Uuid,
        amounts: FeeBreakdown,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            buyer_id,
            vendor_id: Some(vendor_id),
            ticket_id,
            total_amount: amounts.total_amount,
            platform_fee: amounts.platform_fee,
            vendor_amount: amounts.vendor_amount,
            payment_method,
            payment_status: PaymentStatus::Unpaid,
            payment_token: None,
            transaction_date: Utc::now(),
            validation_date: None,
            status: TransactionStatus::Pending,
        }
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(TransactionStatus::Completed)?;
        self.payment_status = PaymentStatus::Paid;
        self.validation_date = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), IllegalTransition> {
        self.transition(TransactionStatus::Canceled)
    }

    pub fn fail(&mut self) -> Result<(), IllegalTransition> {
        self.transition(TransactionStatus::Failed)
    }

    pub fn refund(&mut self) -> Result<(), IllegalTransition> {
        self.transition(TransactionStatus::Refunded)?;
        self.payment_status = PaymentStatus::Refunded;
        Ok(())
    }

    fn transition(&mut self, next: TransactionStatus) -> Result<(), IllegalTransition> {
        if !self.status.allows(next) {
            return Err(IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
