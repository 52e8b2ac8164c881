pub mod auth;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod events;
pub mod handler;
pub mod types;
pub mod wire;
