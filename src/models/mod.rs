pub mod ticket;
pub mod transaction;

pub use ticket::{TicketSnapshot, TicketStatus};
pub use transaction::{
    IllegalTransition, PaymentMethod, PaymentStatus, Transaction, TransactionStatus,
};
