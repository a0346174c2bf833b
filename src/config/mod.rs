use std::env;

use rust_decimal::Decimal;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::security_headers;

/// Runtime configuration, read once at startup. Collaborator credentials
/// live here and are handed to the clients at construction; nothing
/// configures a collaborator through process-wide mutable state.
pub struct Config {
    pub database_url: String,
    pub tickets_service_url: String,
    pub stripe_secret_key: String,
    pub stripe_base_url: String,
    pub kafka_brokers: String,
    pub platform_fee_rate: Decimal,
    pub currency: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            tickets_service_url: env::var("TICKETS_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY")
                .expect("STRIPE_SECRET_KEY must be set"),
            stripe_base_url: env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            kafka_brokers: env::var("KAFKA_BROKERS")
                .unwrap_or_else(|_| "localhost:9092".to_string()),
            platform_fee_rate: env::var("PLATFORM_FEE_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| Decimal::new(5, 2)),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "eur".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fee_rate_is_five_percent() {
        std::env::remove_var("PLATFORM_FEE_RATE");
        std::env::set_var("DATABASE_URL", "postgres://localhost/eventy");
        std::env::set_var("STRIPE_SECRET_KEY", "sk_test_x");
        let config = Config::from_env();
        assert_eq!(config.platform_fee_rate, Decimal::new(5, 2));
        assert_eq!(config.currency, "eur");
    }
}
