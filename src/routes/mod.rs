use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, security_headers};
use crate::handlers::{health_check, transactions};
use crate::service::TransactionCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<TransactionCoordinator>,
}

pub fn create_routes(coordinator: Arc<TransactionCoordinator>) -> Router {
    let state = AppState { coordinator };

    Router::new()
        .route("/health", get(health_check))
        .route("/transactions", post(transactions::initiate))
        .route("/transactions/:id", get(transactions::get_by_id))
        .route("/transactions/:id/confirm", post(transactions::confirm))
        .route("/transactions/:id/cancel", post(transactions::cancel))
        .route("/transactions/:id/fail", post(transactions::fail))
        .route("/transactions/:id/refund", post(transactions::refund))
        .route(
            "/transactions/history/:buyer_id",
            get(transactions::buyer_history),
        )
        .route(
            "/transactions/sales/:vendor_id",
            get(transactions::vendor_sales),
        )
        .route("/transactions/admin/all", get(transactions::list_all))
        .route(
            "/transactions/maintenance/backfill-vendors",
            post(transactions::backfill_vendors),
        )
        .layer(axum::middleware::from_fn(security_headers))
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
