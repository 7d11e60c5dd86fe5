//! Business layer between the HTTP handlers and the resource store.
//!
//! - `validation.rs`: naming and format rules
//! - `executor.rs`: idempotent, CAS-guarded mutations
//! - `query.rs`: listings, lookups, overview counters
//! - `retry.rs`: backoff policy for store calls
//! - `stats.rs`: source of live database statistics

pub mod executor;
pub mod query;
pub mod retry;
pub mod stats;
pub mod validation;

pub use executor::CommandExecutor;
pub use query::QueryService;
pub use retry::RetryPolicy;
pub use stats::{MySqlStats, StatsProbe, StoredStats, probe_for};
