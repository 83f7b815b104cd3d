/// Re-export `Config` from `veilstat-core` for use within this crate.
///
/// All environment-variable parsing lives in `veilstat-core` so integration
/// tests can build a `Config` without depending on process environment.
pub use veilstat_core::config::{Config, IngestLimits};
