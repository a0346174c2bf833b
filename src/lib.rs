//! Transaction orchestration service for the Eventy ticket marketplace.
//!
//! A purchase spans three independently-owned systems that cannot commit
//! atomically: the tickets service (reserve/release/mark-sold), the payment
//! gateway (intents and refunds) and the event bus that ledger and
//! notification services consume. The [`service::TransactionCoordinator`]
//! drives that saga with compensating actions and idempotent retries; the
//! HTTP layer in [`routes`] and [`handlers`] is thin glue over it.

pub mod clients;
pub mod config;
pub mod events;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod service;
pub mod store;
pub mod utils;
