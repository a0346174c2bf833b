use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use eventy_transactions::clients::{HttpTicketInventory, KafkaEventPublisher, StripeGateway};
use eventy_transactions::config::Config;
use eventy_transactions::routes::create_routes;
use eventy_transactions::service::fees::FeeSchedule;
use eventy_transactions::service::TransactionCoordinator;
use eventy_transactions::store::PgTransactionStore;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let http = reqwest::Client::new();
    let store = Arc::new(PgTransactionStore::new(pool));
    let inventory = Arc::new(HttpTicketInventory::new(
        http.clone(),
        config.tickets_service_url.clone(),
    ));
    let gateway = Arc::new(StripeGateway::new(
        http,
        config.stripe_base_url.clone(),
        config.stripe_secret_key.clone(),
    ));
    let events = Arc::new(
        KafkaEventPublisher::new(&config.kafka_brokers).expect("Failed to create Kafka producer"),
    );

    let coordinator = Arc::new(TransactionCoordinator::new(
        store,
        inventory,
        gateway,
        events,
        FeeSchedule::new(config.platform_fee_rate),
        config.currency.clone(),
    ));

    let app: Router = create_routes(coordinator);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3002));
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
