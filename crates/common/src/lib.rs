pub mod config;
pub mod kv;
pub mod observability;
pub mod types;
