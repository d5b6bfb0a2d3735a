pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod ingest;
pub mod lookup;
pub mod mqtt;
pub mod presence;
pub mod reader;
pub mod sink;
pub mod time;
