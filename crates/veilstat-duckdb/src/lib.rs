pub mod analytics_impl;
pub mod backend;
pub mod queries;
pub mod salt;
pub mod schema;
pub mod site;

pub use backend::DuckDbBackend;
pub use site::CreateFunnelStep;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `veilstat_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
