pub mod account;
pub mod auth;
pub mod config;
pub mod error;
pub mod quota;
pub mod registry;
pub mod relay;
pub mod server;
pub mod telemetry;
pub mod tunnel;
