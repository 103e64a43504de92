mod config;
mod error;
mod migrations;
mod postgres;
mod repository;

pub use config::PostgresConfig;
pub use error::StoreError;
pub use migrations::run_migrations;
pub use postgres::PostgresGatewayStore;
pub use repository::{GatewayStore, IdempotencyRecord};
