//! Client-side event collector.
//!
//! Emits a `pageview` when a page loads, independent custom events on demand,
//! and holds at most one pending end-of-session event that is flushed with a
//! teardown-safe beacon when the page is hidden or the collector is dropped.
//! Nothing here ever returns a delivery failure to the host application.

pub mod collector;
pub mod error;
pub mod transport;

pub use collector::{Collector, CollectorConfig};
pub use error::CollectorError;
pub use transport::{HttpTransport, Transport};
