//! Read-side views: filtered listings, single lookups, overview counters and
//! on-demand refresh of database statistics.

use std::sync::Arc;
use tracing::info;

use crate::db::{Expected, StoreHandle};
use crate::error::PortalError;
use crate::service::executor::CAS_ATTEMPTS;
use crate::service::retry::RetryPolicy;
use crate::service::stats::StatsProbe;
use crate::service::validation::{validate_database_name, validate_domain_name};
use crate::types::{
    Database, DatabaseSummary, DatabaseUser, DnsRecord, Domain, DomainSummary, ListFilter,
    SslStatus,
};

#[derive(Clone)]
pub struct QueryService {
    store: StoreHandle,
    retry: RetryPolicy,
    stats: Arc<dyn StatsProbe>,
}

impl QueryService {
    pub fn new(store: StoreHandle, retry: RetryPolicy, stats: Arc<dyn StatsProbe>) -> Self {
        Self {
            store,
            retry,
            stats,
        }
    }

    pub async fn list_databases(&self, filter: &ListFilter) -> Result<Vec<Database>, PortalError> {
        let all = self
            .retry
            .run("list_databases", || self.store.list_databases())
            .await?;
        Ok(all.into_iter().filter(|d| filter.matches(&d.name)).collect())
    }

    pub async fn list_users(&self, filter: &ListFilter) -> Result<Vec<DatabaseUser>, PortalError> {
        let all = self
            .retry
            .run("list_users", || self.store.list_users())
            .await?;
        Ok(all.into_iter().filter(|u| filter.matches(&u.name)).collect())
    }

    pub async fn list_domains(&self, filter: &ListFilter) -> Result<Vec<Domain>, PortalError> {
        let all = self
            .retry
            .run("list_domains", || self.store.list_domains())
            .await?;
        Ok(all.into_iter().filter(|d| filter.matches(&d.domain)).collect())
    }

    /// Records of `domain`; empty when the domain is not registered.
    pub async fn list_dns_records(&self, domain: &str) -> Result<Vec<DnsRecord>, PortalError> {
        let name = validate_domain_name(domain)?;
        self.retry
            .run("list_dns_records", || self.store.list_dns_records(&name))
            .await
    }

    pub async fn get_database(&self, name: &str) -> Result<Database, PortalError> {
        validate_database_name(name)?;
        self.retry
            .run("get_database", || self.store.get_database(name))
            .await?
            .ok_or_else(|| PortalError::not_found("database", name))
    }

    pub async fn get_domain(&self, domain: &str) -> Result<Domain, PortalError> {
        let name = validate_domain_name(domain)?;
        self.retry
            .run("get_domain", || self.store.get_domain(&name))
            .await?
            .ok_or_else(|| PortalError::not_found("domain", &name))
    }

    pub async fn database_summary(&self) -> Result<DatabaseSummary, PortalError> {
        let dbs = self
            .retry
            .run("list_databases", || self.store.list_databases())
            .await?;
        let users = self
            .retry
            .run("list_users", || self.store.list_users())
            .await?;
        Ok(DatabaseSummary {
            total_databases: dbs.len(),
            total_size_bytes: dbs.iter().map(|d| d.size_bytes).sum(),
            total_users: users.len(),
        })
    }

    pub async fn domain_summary(&self) -> Result<DomainSummary, PortalError> {
        let domains = self
            .retry
            .run("list_domains", || self.store.list_domains())
            .await?;
        let count = |pred: fn(&Domain) -> bool| domains.iter().filter(|d| pred(d)).count();
        Ok(DomainSummary {
            total_domains: domains.len(),
            mail_enabled: count(|d| d.mail_enabled),
            wordpress_enabled: count(|d| d.wordpress_enabled),
            ssl_active: count(|d| d.ssl_status == SslStatus::Active),
        })
    }

    /// Pull live size and table count from the stats probe and persist them.
    /// Returns the stored row unchanged when the probe has nothing new.
    pub async fn refresh_database(&self, name: &str) -> Result<Database, PortalError> {
        for _ in 0..CAS_ATTEMPTS {
            let current = self.get_database(name).await?;
            let probed = self
                .retry
                .run("read_stats", || self.stats.probe(name))
                .await?;
            let Some(stats) = probed else {
                return Ok(current);
            };
            if stats.size_bytes == current.size_bytes && stats.table_count == current.table_count
            {
                return Ok(current);
            }

            let expected = Expected::Revision(current.revision);
            let next = Database {
                size_bytes: stats.size_bytes,
                table_count: stats.table_count,
                ..current
            };
            match self
                .retry
                .run("put_database", || self.store.put_database(next.clone(), expected))
                .await
            {
                Ok(db) => {
                    info!(%name, size_bytes = db.size_bytes, tables = db.table_count, "database statistics refreshed");
                    return Ok(db);
                }
                Err(PortalError::RevisionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PortalError::conflict("database", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FixedStats, services, services_with_probe};
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::types::{
        DatabaseStats, DnsRecordInput, DnsRecordType, DomainPatch, DomainType, NewDatabase,
        NewDomain,
    };

    fn domain(name: &str, mail: bool) -> NewDomain {
        NewDomain {
            domain: name.to_string(),
            domain_type: DomainType::Primary,
            mail_enabled: mail,
            wordpress_enabled: false,
        }
    }

    #[tokio::test]
    async fn lists_are_filtered_and_sorted() {
        let (_, exec, query) = services().await;
        for name in ["wp_webmakeprofit", "wp_kuma8088", "nextcloud"] {
            exec.create_database(NewDatabase::new(name)).await.unwrap();
        }

        let names: Vec<_> = query
            .list_databases(&ListFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["nextcloud", "wp_kuma8088", "wp_webmakeprofit"]);

        let wp = query.list_databases(&ListFilter::new("WP_")).await.unwrap();
        assert_eq!(wp.len(), 2);
    }

    #[tokio::test]
    async fn user_listing_includes_seeded_root() {
        let (_, _, query) = services().await;
        let users = query.list_users(&ListFilter::default()).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!((users[0].name.as_str(), users[0].host.as_str()), ("root", "localhost"));
    }

    #[tokio::test]
    async fn dns_listing_of_unknown_domain_is_empty() {
        let (_, _, query) = services().await;
        assert!(query.list_dns_records("nowhere.net").await.unwrap().is_empty());
        assert!(matches!(
            query.list_dns_records("not a domain").await,
            Err(PortalError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn dns_listing_uses_canonical_domain() {
        let (_, exec, query) = services().await;
        exec.create_domain(domain("example.com", false)).await.unwrap();
        exec.upsert_dns_record(
            "example.com",
            DnsRecordInput::new(DnsRecordType::A, "@", "1.2.3.4"),
        )
        .await
        .unwrap();
        assert_eq!(query.list_dns_records("EXAMPLE.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn summaries_count_resources() {
        let (_, exec, query) = services().await;
        exec.create_database(NewDatabase::new("wp_a")).await.unwrap();
        exec.create_domain(domain("a.com", true)).await.unwrap();
        exec.create_domain(domain("b.com", false)).await.unwrap();
        exec.update_domain(
            "b.com",
            DomainPatch {
                wordpress_enabled: Some(true),
                ..DomainPatch::default()
            },
        )
        .await
        .unwrap();

        let db = query.database_summary().await.unwrap();
        assert_eq!((db.total_databases, db.total_users), (1, 1));

        let d = query.domain_summary().await.unwrap();
        assert_eq!(d.total_domains, 2);
        assert_eq!(d.mail_enabled, 1);
        assert_eq!(d.wordpress_enabled, 1);
        assert_eq!(d.ssl_active, 0);
    }

    #[tokio::test]
    async fn refresh_persists_probed_statistics() {
        let probe = Arc::new(FixedStats(DatabaseStats {
            size_bytes: 4_194_304,
            table_count: 12,
        }));
        let (_, exec, query) = services_with_probe(probe).await;
        let created = exec
            .create_database(NewDatabase::new("wp_kuma8088"))
            .await
            .unwrap()
            .into_inner();

        let refreshed = query.refresh_database("wp_kuma8088").await.unwrap();
        assert_eq!(refreshed.size_bytes, 4_194_304);
        assert_eq!(refreshed.table_count, 12);
        assert!(refreshed.revision > created.revision);
        assert_eq!(query.get_database("wp_kuma8088").await.unwrap(), refreshed);

        let again = query.refresh_database("wp_kuma8088").await.unwrap();
        assert_eq!(again.revision, refreshed.revision);

        assert_eq!(query.database_summary().await.unwrap().total_size_bytes, 4_194_304);
    }

    #[tokio::test]
    async fn refresh_of_missing_database_is_not_found() {
        let (_, _, query) = services().await;
        assert!(matches!(
            query.refresh_database("wp_none").await,
            Err(PortalError::NotFound { .. })
        ));
    }

    /// Stats source that rewrites the row between the read and the write,
    /// the way a concurrent refresh would.
    struct RacingStats {
        store: OnceLock<StoreHandle>,
        bumps_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl RacingStats {
        fn new(bumps: usize) -> Arc<Self> {
            Arc::new(Self {
                store: OnceLock::new(),
                bumps_left: AtomicUsize::new(bumps),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[ractor::async_trait]
    impl StatsProbe for RacingStats {
        async fn probe(&self, name: &str) -> Result<Option<DatabaseStats>, PortalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bump = self
                .bumps_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if let (true, Some(store)) = (bump, self.store.get()) {
                let current = store.get_database(name).await?.expect("database exists");
                let revision = current.revision;
                store
                    .put_database(current, Expected::Revision(revision))
                    .await?;
            }
            Ok(Some(DatabaseStats {
                size_bytes: 1_048_576,
                table_count: 3,
            }))
        }
    }

    #[tokio::test]
    async fn refresh_gives_up_after_repeated_revision_conflicts() {
        let racing = RacingStats::new(usize::MAX);
        let (store, exec, query) = services_with_probe(racing.clone()).await;
        racing.store.set(store.clone()).ok();
        exec.create_database(NewDatabase::new("wp_busy")).await.unwrap();

        let err = query.refresh_database("wp_busy").await.unwrap_err();
        assert!(matches!(err, PortalError::RevisionConflict { .. }), "{err}");
        assert_eq!(racing.calls.load(Ordering::SeqCst), CAS_ATTEMPTS);

        let stored = query.get_database("wp_busy").await.unwrap();
        assert_eq!((stored.size_bytes, stored.table_count), (0, 0));
    }

    #[tokio::test]
    async fn refresh_rereads_after_a_single_conflict() {
        let racing = RacingStats::new(1);
        let (store, exec, query) = services_with_probe(racing.clone()).await;
        racing.store.set(store.clone()).ok();
        exec.create_database(NewDatabase::new("wp_busy")).await.unwrap();

        let refreshed = query.refresh_database("wp_busy").await.unwrap();
        assert_eq!((refreshed.size_bytes, refreshed.table_count), (1_048_576, 3));
        assert_eq!(racing.calls.load(Ordering::SeqCst), 2);
    }
}
