use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(String),

    #[error("gateway rejected the call: {0}")]
    Rejected(String),

    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

/// Metadata attached to an intent so the gateway side can be reconciled
/// against local records even if the local write is lost.
#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub transaction_id: Uuid,
    pub ticket_id: Uuid,
    pub buyer_id: Uuid,
}

/// A freshly opened intent. `reference` is persisted as the transaction's
/// payment token; `client_secret` is handed to the caller once and never
/// stored.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub reference: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct IntentProbe {
    pub client_secret: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundStatus {
    Succeeded,
    Pending,
    Failed,
}

impl RefundStatus {
    pub fn is_succeeded(self) -> bool {
        matches!(self, RefundStatus::Succeeded)
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, req: CreateIntentRequest) -> Result<PaymentIntent, GatewayError>;
    async fn retrieve_intent(&self, reference: &str) -> Result<IntentProbe, GatewayError>;
    /// Unwinds an intent whose local record could not be persisted.
    async fn cancel_intent(&self, reference: &str) -> Result<(), GatewayError>;
    async fn refund(&self, reference: &str) -> Result<RefundStatus, GatewayError>;
}

#[derive(Deserialize)]
struct IntentBody {
    id: String,
    client_secret: String,
    #[serde(default)]
    last_payment_error: Option<LastPaymentError>,
}

#[derive(Deserialize)]
struct LastPaymentError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct RefundBody {
    status: String,
}

/// Stripe-style HTTP gateway client. The secret key is injected at
/// construction and owned by this handle; nothing configures the gateway
/// through process-wide state.
pub struct StripeGateway {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            secret_key: secret_key.into(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail: &str = body.get(..256).unwrap_or(&body);
        Err(GatewayError::Rejected(format!("{status}: {detail}")))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, req: CreateIntentRequest) -> Result<PaymentIntent, GatewayError> {
        let params = [
            ("amount", req.amount_minor.to_string()),
            ("currency", req.currency.clone()),
            ("metadata[transaction_id]", req.transaction_id.to_string()),
            ("metadata[ticket_id]", req.ticket_id.to_string()),
            ("metadata[buyer_id]", req.buyer_id.to_string()),
        ];
        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let body: IntentBody = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        Ok(PaymentIntent {
            reference: body.id,
            client_secret: body.client_secret,
        })
    }

    async fn retrieve_intent(&self, reference: &str) -> Result<IntentProbe, GatewayError> {
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let body: IntentBody = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        Ok(IntentProbe {
            client_secret: body.client_secret,
            last_error: body.last_payment_error.and_then(|e| e.message),
        })
    }

    async fn cancel_intent(&self, reference: &str) -> Result<(), GatewayError> {
        let response = self
            .http
            .post(format!(
                "{}/v1/payment_intents/{}/cancel",
                self.base_url, reference
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn refund(&self, reference: &str) -> Result<RefundStatus, GatewayError> {
        let params = [("payment_intent", reference)];
        let response = self
            .http
            .post(format!("{}/v1/refunds", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let body: RefundBody = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        Ok(match body.status.as_str() {
            "succeeded" => RefundStatus::Succeeded,
            "pending" => RefundStatus::Pending,
            _ => RefundStatus::Failed,
        })
    }
}
