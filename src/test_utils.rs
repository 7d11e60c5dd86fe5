//! Shared fixtures for unit tests.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::db::{self, StoreHandle};
use crate::error::PortalError;
use crate::service::executor::CommandExecutor;
use crate::service::query::QueryService;
use crate::service::retry::RetryPolicy;
use crate::service::stats::{StatsProbe, StoredStats};
use crate::types::{Database, DatabaseStats};

pub async fn memory_store() -> StoreHandle {
    db::spawn("sqlite::memory:", Duration::from_secs(5))
        .await
        .expect("spawn in-memory store")
}

/// Retries without sleeping long enough to slow the suite down.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::from_config(&StoreConfig {
        retry_min_delay_ms: 1,
        retry_max_delay_ms: 2,
        retry_max_times: 3,
        call_timeout_ms: 5_000,
    })
}

pub async fn services() -> (StoreHandle, CommandExecutor, QueryService) {
    services_with_probe(Arc::new(StoredStats)).await
}

pub async fn services_with_probe(
    probe: Arc<dyn StatsProbe>,
) -> (StoreHandle, CommandExecutor, QueryService) {
    let store = memory_store().await;
    let executor = CommandExecutor::new(store.clone(), fast_retry());
    let query = QueryService::new(store.clone(), fast_retry(), probe);
    (store, executor, query)
}

pub fn sample_database(name: &str) -> Database {
    let now = Utc::now();
    Database {
        name: name.to_string(),
        size_bytes: 0,
        table_count: 0,
        charset: "utf8mb4".to_string(),
        collation: "utf8mb4_unicode_ci".to_string(),
        revision: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Probe returning fixed statistics for every database.
pub struct FixedStats(pub DatabaseStats);

#[ractor::async_trait]
impl StatsProbe for FixedStats {
    async fn probe(&self, _name: &str) -> Result<Option<DatabaseStats>, PortalError> {
        Ok(Some(self.0))
    }
}
