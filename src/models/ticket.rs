use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inventory state of a ticket as reported by the tickets service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Available,
    Reserved,
    Sold,
    Canceled,
}

impl TicketStatus {
    pub fn is_available(self) -> bool {
        matches!(self, TicketStatus::Available)
    }
}

/// The slice of a ticket the coordinator needs, fetched from the tickets
/// service. `vendor_id` is captured onto the transaction at reservation
/// time so a later refund never depends on the ticket still existing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSnapshot {
    pub id: Uuid,
    pub event_id: Uuid,
    pub sale_price: Decimal,
    pub status: TicketStatus,
    pub vendor_id: Uuid,
}
