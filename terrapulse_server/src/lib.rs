pub mod claims;
pub mod config;
pub mod database;
pub mod error;
pub mod http;
pub mod ingest;
pub mod models;
pub mod program;
pub mod rewards;
pub mod scoring;
pub mod store;
pub mod sync;
