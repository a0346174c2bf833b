use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ticket::TicketSnapshot;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("ticket {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("tickets service unavailable: {0}")]
    Unavailable(String),
}

/// The slice of the tickets service this service depends on. `reserve`
/// takes the exclusive hold that serializes concurrent purchases of the
/// same ticket; `release` and `mark_sold` are its compensations and
/// conclusion.
#[async_trait]
pub trait TicketInventory: Send + Sync {
    async fn fetch(&self, ticket_id: Uuid) -> Result<TicketSnapshot, InventoryError>;
    async fn reserve(&self, ticket_id: Uuid) -> Result<(), InventoryError>;
    async fn release(&self, ticket_id: Uuid) -> Result<(), InventoryError>;
    async fn mark_sold(&self, ticket_id: Uuid) -> Result<(), InventoryError>;
}

/// HTTP client for the tickets service.
pub struct HttpTicketInventory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTicketInventory {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn post_action(&self, ticket_id: Uuid, action: &str) -> Result<(), InventoryError> {
        let url = format!("{}/tickets/{}/{}", self.base_url, ticket_id, action);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| InventoryError::Unavailable(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(InventoryError::NotFound(ticket_id)),
            StatusCode::CONFLICT => Err(InventoryError::Conflict(format!(
                "ticket {ticket_id} rejected {action}"
            ))),
            s => Err(InventoryError::Unavailable(format!(
                "tickets service returned {s} for {action}"
            ))),
        }
    }
}

#[async_trait]
impl TicketInventory for HttpTicketInventory {
    async fn fetch(&self, ticket_id: Uuid) -> Result<TicketSnapshot, InventoryError> {
        let url = format!("{}/tickets/{}", self.base_url, ticket_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| InventoryError::Unavailable(e.to_string()))?;

        match response.status() {
            s if s.is_success() => response
                .json::<TicketSnapshot>()
                .await
                .map_err(|e| InventoryError::Unavailable(format!("malformed ticket payload: {e}"))),
            StatusCode::NOT_FOUND => Err(InventoryError::NotFound(ticket_id)),
            s => Err(InventoryError::Unavailable(format!(
                "tickets service returned {s}"
            ))),
        }
    }

    async fn reserve(&self, ticket_id: Uuid) -> Result<(), InventoryError> {
        self.post_action(ticket_id, "reserve").await
    }

    async fn release(&self, ticket_id: Uuid) -> Result<(), InventoryError> {
        self.post_action(ticket_id, "release").await
    }

    async fn mark_sold(&self, ticket_id: Uuid) -> Result<(), InventoryError> {
        self.post_action(ticket_id, "buy").await
    }
}
