pub mod client;
pub mod config;
pub mod fields;

pub use client::{GraphApiClient, TokenExchange};
pub use config::{GraphApiConfig, DEFAULT_GRAPH_API_URL};
