#![forbid(unsafe_code)]

pub mod backends;
pub mod cli;
pub mod config;
pub mod error;
pub mod routes;
pub mod server;
