pub mod bus;
pub mod gateway;
pub mod inventory;

pub use bus::{EventPublisher, KafkaEventPublisher, PublishError};
pub use gateway::{
    CreateIntentRequest, GatewayError, IntentProbe, PaymentGateway, PaymentIntent, RefundStatus,
    StripeGateway,
};
pub use inventory::{HttpTicketInventory, InventoryError, TicketInventory};
