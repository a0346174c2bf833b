//! Domain events published to the bus. Wire format is camelCase JSON so
//! existing ledger and notification consumers keep parsing them.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

pub const TOPIC_TICKET_SOLD: &str = "ticket-sold";
pub const TOPIC_PAYMENT_VALIDATED: &str = "payment-validated";
pub const TOPIC_TRANSACTION_REFUNDED: &str = "transaction-refunded";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSoldEvent {
    pub ticket_id: Uuid,
    pub transaction_id: Uuid,
    pub buyer_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentValidatedEvent {
    pub transaction_id: Uuid,
    pub buyer_id: Uuid,
    pub vendor_id: Option<Uuid>,
    /// Total paid by the buyer.
    pub amount: Decimal,
    /// Net credited to the vendor.
    pub vendor_amount: Decimal,
}

/// The sole signal downstream services use to reverse vendor payouts and
/// ticket claims. Published only after the REFUNDED commit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRefundedEvent {
    pub transaction_id: Uuid,
    pub ticket_id: Uuid,
    pub vendor_id: Option<Uuid>,
    /// Amount to debit from the vendor.
    pub vendor_amount: Decimal,
}
