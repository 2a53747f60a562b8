pub mod accounts;
pub mod auth;
pub mod comments;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod openapi;
pub mod opendata;
pub mod rate_limit; // in-memory rate limiting
pub mod repo;
pub mod routes;
pub mod security;
pub mod trending;
pub mod validation;

// Re-export commonly used items for tests / external users
pub use config::{AdminAccount, AppConfig};
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
