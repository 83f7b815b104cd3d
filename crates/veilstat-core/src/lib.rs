pub mod analytics;
pub mod config;
pub mod error;
pub mod event;
pub mod ingest;
pub mod properties;
pub mod salt;
pub mod visitor;
