//! Validated, idempotent mutations of databases, users, domains and DNS
//! records.
//!
//! Every operation follows the same shape: validate, read the current row,
//! decide, then write with a compare-and-set precondition. A lost CAS race
//! re-reads and decides again, up to [`CAS_ATTEMPTS`] times. Store
//! unavailability is retried separately by the [`RetryPolicy`].

use chrono::Utc;
use std::collections::BTreeSet;
use std::future::Future;
use tracing::info;

use crate::db::{Expected, Revision, StoreHandle, UserKey};
use crate::error::PortalError;
use crate::service::retry::RetryPolicy;
use crate::service::validation::{
    ValidationError, ensure_mutable_user, parent_domain, validate_charset,
    validate_database_name, validate_dns_record, validate_domain_name, validate_grants,
    validate_user,
};
use crate::types::{
    Database, DatabaseUser, DnsRecord, DnsRecordInput, DnsRecordType, DnsStatus, Domain,
    DomainPatch, DomainType, NewDatabase, NewDatabaseUser, NewDomain, Outcome, Privilege,
    SslStatus,
};

pub const CAS_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct CommandExecutor {
    store: StoreHandle,
    retry: RetryPolicy,
}

impl CommandExecutor {
    pub fn new(store: StoreHandle, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    // ---- databases ----

    pub async fn create_database(&self, req: NewDatabase) -> Result<Outcome<Database>, PortalError> {
        validate_database_name(&req.name)?;
        validate_charset(&req.charset, &req.collation)?;

        for _ in 0..CAS_ATTEMPTS {
            let existing = self
                .retry
                .run("get_database", || self.store.get_database(&req.name))
                .await?;
            if let Some(db) = existing {
                if db.matches(&req) {
                    return Ok(Outcome::Existing(db));
                }
                return Err(PortalError::already_exists("database", &req.name));
            }

            let now = Utc::now();
            let draft = Database {
                name: req.name.clone(),
                size_bytes: 0,
                table_count: 0,
                charset: req.charset.clone(),
                collation: req.collation.clone(),
                revision: 0,
                created_at: now,
                updated_at: now,
            };
            match self
                .retry
                .run("put_database", || {
                    self.store.put_database(draft.clone(), Expected::Absent)
                })
                .await
            {
                Ok(db) => {
                    info!(name = %db.name, revision = db.revision, "database created");
                    return Ok(Outcome::Created(db));
                }
                Err(PortalError::RevisionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PortalError::conflict("database", &req.name))
    }

    pub async fn delete_database(&self, name: &str) -> Result<(), PortalError> {
        validate_database_name(name)?;

        let (store, retry) = (&self.store, &self.retry);
        let deleted = delete_at_revision(
            "database",
            name,
            move || async move {
                let db = retry
                    .run("get_database", || store.get_database(name))
                    .await?;
                Ok::<_, PortalError>(db.map(|d| d.revision))
            },
            move |revision| {
                retry.run("delete_database", move || store.delete_database(name, revision))
            },
        )
        .await?;
        if deleted.is_some() {
            info!(%name, "database deleted");
        }
        Ok(())
    }

    // ---- users ----

    pub async fn create_user(
        &self,
        req: NewDatabaseUser,
    ) -> Result<Outcome<DatabaseUser>, PortalError> {
        let key = UserKey::new(&req.name, &req.host);
        ensure_mutable_user(&key)?;
        validate_user(&req.name, &req.host, &req.grants)?;

        for _ in 0..CAS_ATTEMPTS {
            let existing = self
                .retry
                .run("get_user", || self.store.get_user(&key))
                .await?;
            if let Some(user) = existing {
                if user.grants == req.grants {
                    return Ok(Outcome::Existing(user));
                }
                return Err(PortalError::already_exists("user", key.to_string()));
            }

            let now = Utc::now();
            let draft = DatabaseUser {
                name: req.name.clone(),
                host: req.host.clone(),
                grants: req.grants.clone(),
                revision: 0,
                created_at: now,
                updated_at: now,
            };
            match self
                .retry
                .run("put_user", || self.store.put_user(draft.clone(), Expected::Absent))
                .await
            {
                Ok(user) => {
                    info!(user = %key, "database user created");
                    return Ok(Outcome::Created(user));
                }
                Err(PortalError::RevisionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PortalError::conflict("user", key.to_string()))
    }

    /// Replace the grants of an existing account.
    pub async fn update_user_grants(
        &self,
        name: &str,
        host: &str,
        grants: BTreeSet<Privilege>,
    ) -> Result<Outcome<DatabaseUser>, PortalError> {
        let key = UserKey::new(name, host);
        ensure_mutable_user(&key)?;
        validate_grants(&grants)?;

        for _ in 0..CAS_ATTEMPTS {
            let mut user = self
                .retry
                .run("get_user", || self.store.get_user(&key))
                .await?
                .ok_or_else(|| PortalError::not_found("user", key.to_string()))?;
            if user.grants == grants {
                return Ok(Outcome::Existing(user));
            }
            let expected = Expected::Revision(user.revision);
            user.grants = grants.clone();
            match self
                .retry
                .run("put_user", || self.store.put_user(user.clone(), expected))
                .await
            {
                Ok(user) => {
                    info!(user = %key, "database user grants updated");
                    return Ok(Outcome::Updated(user));
                }
                Err(PortalError::RevisionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PortalError::conflict("user", key.to_string()))
    }

    pub async fn delete_user(&self, name: &str, host: &str) -> Result<(), PortalError> {
        let key = UserKey::new(name, host);
        ensure_mutable_user(&key)?;

        let (store, retry, key) = (&self.store, &self.retry, &key);
        let deleted = delete_at_revision(
            "user",
            &key.to_string(),
            move || async move {
                let user = retry.run("get_user", || store.get_user(key)).await?;
                Ok::<_, PortalError>(user.map(|u| u.revision))
            },
            move |revision| retry.run("delete_user", move || store.delete_user(key, revision)),
        )
        .await?;
        if deleted.is_some() {
            info!(user = %key, "database user deleted");
        }
        Ok(())
    }

    // ---- domains ----

    pub async fn create_domain(&self, req: NewDomain) -> Result<Outcome<Domain>, PortalError> {
        let name = validate_domain_name(&req.domain)?;
        let req = NewDomain {
            domain: name.clone(),
            ..req
        };

        if req.domain_type == DomainType::Subdomain {
            let parent = parent_domain(&name).ok_or_else(|| {
                ValidationError::new(
                    "domain",
                    "a subdomain needs at least three labels",
                )
            })?;
            let registered = self
                .retry
                .run("get_domain", || self.store.get_domain(parent))
                .await?;
            if registered.is_none() {
                return Err(ValidationError::new(
                    "domain",
                    format!("parent domain `{parent}` is not registered"),
                )
                .into());
            }
        }

        for _ in 0..CAS_ATTEMPTS {
            let existing = self
                .retry
                .run("get_domain", || self.store.get_domain(&name))
                .await?;
            if let Some(d) = existing {
                if d.matches(&req) {
                    return Ok(Outcome::Existing(d));
                }
                return Err(PortalError::already_exists("domain", &name));
            }

            let now = Utc::now();
            let draft = Domain {
                domain: name.clone(),
                domain_type: req.domain_type,
                mail_enabled: req.mail_enabled,
                wordpress_enabled: req.wordpress_enabled,
                ssl_status: SslStatus::Pending,
                dns_status: dns_status_for(req.mail_enabled, &[]),
                revision: 0,
                created_at: now,
                updated_at: now,
            };
            match self
                .retry
                .run("put_domain", || self.store.put_domain(draft.clone(), Expected::Absent))
                .await
            {
                Ok(d) => {
                    info!(domain = %d.domain, kind = %d.domain_type, "domain created");
                    return Ok(Outcome::Created(d));
                }
                Err(PortalError::RevisionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PortalError::conflict("domain", &name))
    }

    /// Toggle mail / WordPress on a domain. Enabling mail re-evaluates the
    /// DNS status since mail requires an MX record.
    pub async fn update_domain(
        &self,
        domain: &str,
        patch: DomainPatch,
    ) -> Result<Outcome<Domain>, PortalError> {
        let name = validate_domain_name(domain)?;

        for _ in 0..CAS_ATTEMPTS {
            let current = self
                .retry
                .run("get_domain", || self.store.get_domain(&name))
                .await?
                .ok_or_else(|| PortalError::not_found("domain", &name))?;
            let records = self
                .retry
                .run("list_dns_records", || self.store.list_dns_records(&name))
                .await?;

            let mut next = current.clone();
            if let Some(mail) = patch.mail_enabled {
                next.mail_enabled = mail;
            }
            if let Some(wp) = patch.wordpress_enabled {
                next.wordpress_enabled = wp;
            }
            next.dns_status = dns_status_for(next.mail_enabled, &records);
            if next == current {
                return Ok(Outcome::Existing(current));
            }

            match self
                .retry
                .run("put_domain", || {
                    self.store
                        .put_domain(next.clone(), Expected::Revision(current.revision))
                })
                .await
            {
                Ok(d) => {
                    info!(domain = %d.domain, mail = d.mail_enabled, wordpress = d.wordpress_enabled, "domain updated");
                    return Ok(Outcome::Updated(d));
                }
                Err(PortalError::RevisionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PortalError::conflict("domain", &name))
    }

    /// Delete a domain together with all of its DNS records. Refused while
    /// subdomains of it are still registered.
    pub async fn delete_domain(&self, domain: &str) -> Result<(), PortalError> {
        let name = validate_domain_name(domain)?;
        let name = name.as_str();

        let (store, retry) = (&self.store, &self.retry);
        let deleted = delete_at_revision(
            "domain",
            name,
            move || async move {
                let d = retry.run("get_domain", || store.get_domain(name)).await?;
                Ok::<_, PortalError>(d.map(|d| d.revision))
            },
            move |revision| retry.run("delete_domain", move || store.delete_domain(name, revision)),
        )
        .await?;
        if let Some(records) = deleted {
            info!(domain = %name, records, "domain deleted");
        }
        Ok(())
    }

    // ---- dns records ----

    /// Create a record, or update priority/ttl of the record with the same
    /// `(type, name, value)` under `domain`.
    pub async fn upsert_dns_record(
        &self,
        domain: &str,
        input: DnsRecordInput,
    ) -> Result<Outcome<DnsRecord>, PortalError> {
        let name = validate_domain_name(domain)?;
        let input = validate_dns_record(&input)?;

        for _ in 0..CAS_ATTEMPTS {
            self.retry
                .run("get_domain", || self.store.get_domain(&name))
                .await?
                .ok_or_else(|| PortalError::not_found("domain", &name))?;

            let existing = self
                .retry
                .run("find_dns_record", || {
                    self.store.find_dns_record(
                        &name,
                        input.record_type.as_str(),
                        &input.name,
                        &input.value,
                    )
                })
                .await?;

            let (draft, expected) = match existing {
                Some(rec) if rec.priority == input.priority && rec.ttl == input.ttl => {
                    return Ok(Outcome::Existing(rec));
                }
                Some(rec) => {
                    let expected = Expected::Revision(rec.revision);
                    let draft = DnsRecord {
                        priority: input.priority,
                        ttl: input.ttl,
                        ..rec
                    };
                    (draft, expected)
                }
                None => {
                    let now = Utc::now();
                    let draft = DnsRecord {
                        id: 0,
                        domain: name.clone(),
                        record_type: input.record_type,
                        name: input.name.clone(),
                        value: input.value.clone(),
                        priority: input.priority,
                        ttl: input.ttl,
                        revision: 0,
                        created_at: now,
                        updated_at: now,
                    };
                    (draft, Expected::Absent)
                }
            };

            match self
                .retry
                .run("put_dns_record", || {
                    self.store.put_dns_record(draft.clone(), expected)
                })
                .await
            {
                Ok(rec) => {
                    info!(
                        domain = %name,
                        id = rec.id,
                        kind = %rec.record_type,
                        name = %rec.name,
                        "dns record saved"
                    );
                    self.refresh_dns_status(&name).await?;
                    return Ok(match expected {
                        Expected::Absent => Outcome::Created(rec),
                        Expected::Revision(_) => Outcome::Updated(rec),
                    });
                }
                Err(PortalError::RevisionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PortalError::conflict("dns record", &input.name))
    }

    pub async fn delete_dns_record(&self, domain: &str, id: i64) -> Result<(), PortalError> {
        let name = validate_domain_name(domain)?;
        let name = name.as_str();

        let (store, retry) = (&self.store, &self.retry);
        let deleted = delete_at_revision(
            "dns record",
            &id.to_string(),
            move || async move {
                let rec = retry
                    .run("get_dns_record", || store.get_dns_record(id))
                    .await?;
                Ok::<_, PortalError>(rec.filter(|r| r.domain == name).map(|r| r.revision))
            },
            move |revision| {
                retry.run("delete_dns_record", move || store.delete_dns_record(id, revision))
            },
        )
        .await?;
        if deleted.is_some() {
            info!(domain = %name, id, "dns record deleted");
        }
        self.refresh_dns_status(name).await
    }

    /// Recompute and persist the domain's DNS status from its records.
    /// A domain deleted in the meantime is left alone.
    async fn refresh_dns_status(&self, name: &str) -> Result<(), PortalError> {
        for _ in 0..CAS_ATTEMPTS {
            let Some(current) = self
                .retry
                .run("get_domain", || self.store.get_domain(name))
                .await?
            else {
                return Ok(());
            };
            let records = self
                .retry
                .run("list_dns_records", || self.store.list_dns_records(name))
                .await?;
            let status = dns_status_for(current.mail_enabled, &records);
            if status == current.dns_status {
                return Ok(());
            }
            let expected = Expected::Revision(current.revision);
            let next = Domain {
                dns_status: status,
                ..current
            };
            match self
                .retry
                .run("put_domain", || self.store.put_domain(next.clone(), expected))
                .await
            {
                Ok(_) => {
                    info!(domain = %name, status = %status, "dns status changed");
                    return Ok(());
                }
                Err(PortalError::RevisionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PortalError::conflict("domain", name))
    }
}

/// A domain resolves when its apex has an address record, and when mail is
/// enabled, an MX record at the apex as well.
pub fn dns_status_for(mail_enabled: bool, records: &[DnsRecord]) -> DnsStatus {
    let at_apex = |t: DnsRecordType| records.iter().any(|r| r.name == "@" && r.record_type == t);
    let addressable = at_apex(DnsRecordType::A) || at_apex(DnsRecordType::Aaaa);
    let mail_ok = !mail_enabled || at_apex(DnsRecordType::Mx);
    if addressable && mail_ok {
        DnsStatus::Valid
    } else {
        DnsStatus::Invalid
    }
}

/// Delete the row `read` reports at the revision it reports, re-reading after
/// a lost race. `Ok(None)` means the row was already gone on a later attempt:
/// an earlier delete committed but its reply was lost and the retried call
/// conflicted.
async fn delete_at_revision<T, R, RFut, D, DFut>(
    kind: &'static str,
    key: &str,
    mut read: R,
    mut delete: D,
) -> Result<Option<T>, PortalError>
where
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<Option<Revision>, PortalError>>,
    D: FnMut(Revision) -> DFut,
    DFut: Future<Output = Result<T, PortalError>>,
{
    for attempt in 0..CAS_ATTEMPTS {
        let Some(revision) = read().await? else {
            return if attempt == 0 {
                Err(PortalError::not_found(kind, key))
            } else {
                Ok(None)
            };
        };
        match delete(revision).await {
            Ok(v) => return Ok(Some(v)),
            Err(PortalError::RevisionConflict { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(PortalError::conflict(kind, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::services;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn primary(domain: &str) -> NewDomain {
        NewDomain {
            domain: domain.to_string(),
            domain_type: DomainType::Primary,
            mail_enabled: false,
            wordpress_enabled: true,
        }
    }

    fn grants(list: &[Privilege]) -> BTreeSet<Privilege> {
        list.iter().copied().collect()
    }

    #[tokio::test]
    async fn create_database_replay_is_idempotent() {
        let (store, exec, _) = services().await;
        let first = exec
            .create_database(NewDatabase::new("wp_kuma8088"))
            .await
            .unwrap();
        assert!(first.is_created());

        let second = exec
            .create_database(NewDatabase::new("wp_kuma8088"))
            .await
            .unwrap();
        assert!(matches!(second, Outcome::Existing(_)));
        assert_eq!(second.get(), first.get());
        assert_eq!(store.list_databases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_database_with_different_attributes_conflicts() {
        let (_, exec, _) = services().await;
        exec.create_database(NewDatabase::new("wp_kuma8088"))
            .await
            .unwrap();

        let other = NewDatabase {
            name: "wp_kuma8088".to_string(),
            charset: "latin1".to_string(),
            collation: "latin1_swedish_ci".to_string(),
        };
        let res = exec.create_database(other).await;
        assert!(matches!(res, Err(PortalError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn invalid_database_name_never_reaches_the_store() {
        let (store, exec, _) = services().await;
        let res = exec.create_database(NewDatabase::new("drop table;")).await;
        assert!(matches!(res, Err(PortalError::Validation(_))));
        assert!(store.list_databases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_database_is_not_found() {
        let (_, exec, _) = services().await;
        let res = exec.delete_database("wp_ghost").await;
        assert!(matches!(res, Err(PortalError::NotFound { .. })));

        exec.create_database(NewDatabase::new("wp_ghost"))
            .await
            .unwrap();
        exec.delete_database("wp_ghost").await.unwrap();
        let again = exec.delete_database("wp_ghost").await;
        assert!(matches!(again, Err(PortalError::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_then_create_starts_fresh() {
        let (_, exec, _) = services().await;
        let first = exec
            .create_database(NewDatabase::new("wp_cycle"))
            .await
            .unwrap()
            .into_inner();
        exec.delete_database("wp_cycle").await.unwrap();
        let second = exec
            .create_database(NewDatabase {
                name: "wp_cycle".to_string(),
                charset: "latin1".to_string(),
                collation: "latin1_swedish_ci".to_string(),
            })
            .await
            .unwrap();
        assert!(second.is_created());
        assert_eq!(second.get().charset, "latin1");
        assert!(second.get().revision > first.revision);
    }

    #[tokio::test]
    async fn root_user_cannot_be_deleted_or_regranted() {
        let (store, exec, _) = services().await;
        let res = exec.delete_user("root", "localhost").await;
        assert!(matches!(res, Err(PortalError::Protected { .. })));

        let res = exec
            .update_user_grants("root", "localhost", grants(&[Privilege::Select]))
            .await;
        assert!(matches!(res, Err(PortalError::Protected { .. })));

        let res = exec
            .create_user(NewDatabaseUser {
                name: "root".to_string(),
                host: "%".to_string(),
                grants: grants(&[Privilege::AllPrivileges]),
            })
            .await;
        assert!(matches!(res, Err(PortalError::Protected { .. })));

        let root = store
            .get_user(&UserKey::new("root", "localhost"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(root.grants, grants(&[Privilege::AllPrivileges]));
    }

    #[tokio::test]
    async fn user_lifecycle() {
        let (_, exec, _) = services().await;
        let req = NewDatabaseUser {
            name: "wordpress".to_string(),
            host: "%".to_string(),
            grants: grants(&[
                Privilege::Select,
                Privilege::Insert,
                Privilege::Update,
                Privilege::Delete,
            ]),
        };
        assert!(exec.create_user(req.clone()).await.unwrap().is_created());
        assert!(matches!(
            exec.create_user(req.clone()).await.unwrap(),
            Outcome::Existing(_)
        ));

        let narrowed = exec
            .update_user_grants("wordpress", "%", grants(&[Privilege::Select]))
            .await
            .unwrap();
        assert!(matches!(narrowed, Outcome::Updated(_)));
        assert_eq!(narrowed.get().grants, grants(&[Privilege::Select]));

        let conflicting = exec.create_user(req).await;
        assert!(matches!(
            conflicting,
            Err(PortalError::AlreadyExists { .. })
        ));

        exec.delete_user("wordpress", "%").await.unwrap();
        assert!(matches!(
            exec.delete_user("wordpress", "%").await,
            Err(PortalError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn domain_delete_cascades_dns_records() {
        let (store, exec, _) = services().await;
        let created = exec.create_domain(primary("example.com")).await.unwrap();
        assert!(created.is_created());
        assert_eq!(created.get().ssl_status, SslStatus::Pending);

        exec.upsert_dns_record(
            "example.com",
            DnsRecordInput::new(DnsRecordType::A, "@", "1.2.3.4"),
        )
        .await
        .unwrap();
        exec.upsert_dns_record(
            "example.com",
            DnsRecordInput::new(DnsRecordType::Txt, "@", "v=spf1 -all"),
        )
        .await
        .unwrap();
        assert_eq!(store.list_dns_records("example.com").await.unwrap().len(), 2);

        exec.delete_domain("example.com").await.unwrap();
        assert!(store.list_dns_records("example.com").await.unwrap().is_empty());
        assert!(store.get_domain("example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn domain_names_are_canonical_and_replays_idempotent() {
        let (_, exec, _) = services().await;
        let first = exec.create_domain(primary("Example.COM.")).await.unwrap();
        assert_eq!(first.get().domain, "example.com");

        let replay = exec.create_domain(primary("example.com")).await.unwrap();
        assert!(matches!(replay, Outcome::Existing(_)));

        let mut other = primary("example.com");
        other.domain_type = DomainType::Addon;
        assert!(matches!(
            exec.create_domain(other).await,
            Err(PortalError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn subdomain_requires_registered_parent() {
        let (_, exec, _) = services().await;
        let sub = NewDomain {
            domain: "blog.example.com".to_string(),
            domain_type: DomainType::Subdomain,
            mail_enabled: false,
            wordpress_enabled: true,
        };
        let res = exec.create_domain(sub.clone()).await;
        assert!(matches!(res, Err(PortalError::Validation(ref v)) if v.field == "domain"));

        exec.create_domain(primary("example.com")).await.unwrap();
        assert!(exec.create_domain(sub).await.unwrap().is_created());
    }

    #[tokio::test]
    async fn mx_without_priority_is_rejected() {
        let (_, exec, _) = services().await;
        exec.create_domain(primary("example.com")).await.unwrap();

        let res = exec
            .upsert_dns_record(
                "example.com",
                DnsRecordInput::new(DnsRecordType::Mx, "@", "mx.example.com"),
            )
            .await;
        assert!(matches!(res, Err(PortalError::Validation(ref v)) if v.field == "priority"));

        let ok = exec
            .upsert_dns_record(
                "example.com",
                DnsRecordInput::new(DnsRecordType::A, "@", "1.2.3.4"),
            )
            .await;
        assert!(ok.unwrap().is_created());
    }

    #[tokio::test]
    async fn record_for_unknown_domain_is_not_found() {
        let (_, exec, _) = services().await;
        let res = exec
            .upsert_dns_record(
                "missing.org",
                DnsRecordInput::new(DnsRecordType::A, "@", "1.2.3.4"),
            )
            .await;
        assert!(matches!(res, Err(PortalError::NotFound { kind: "domain", .. })));
    }

    #[tokio::test]
    async fn upsert_updates_ttl_and_replays_are_noops() {
        let (store, exec, _) = services().await;
        exec.create_domain(primary("example.com")).await.unwrap();
        let a = DnsRecordInput::new(DnsRecordType::A, "www", "172.67.148.123");

        let created = exec
            .upsert_dns_record("example.com", a.clone())
            .await
            .unwrap()
            .into_inner();
        let replay = exec
            .upsert_dns_record("example.com", a.clone())
            .await
            .unwrap();
        assert!(matches!(replay, Outcome::Existing(_)));

        let updated = exec
            .upsert_dns_record("example.com", a.with_ttl(300))
            .await
            .unwrap();
        assert!(matches!(updated, Outcome::Updated(_)));
        assert_eq!(updated.get().id, created.id);
        assert_eq!(updated.get().ttl, Some(300));
        assert_eq!(store.list_dns_records("example.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dns_status_tracks_apex_and_mail_records() {
        let (store, exec, _) = services().await;
        let mut req = primary("kuma8088.com");
        req.mail_enabled = true;
        let d = exec.create_domain(req).await.unwrap().into_inner();
        assert_eq!(d.dns_status, DnsStatus::Invalid);

        exec.upsert_dns_record(
            "kuma8088.com",
            DnsRecordInput::new(DnsRecordType::A, "@", "172.67.148.123"),
        )
        .await
        .unwrap();
        let d = store.get_domain("kuma8088.com").await.unwrap().unwrap();
        assert_eq!(d.dns_status, DnsStatus::Invalid);

        let mx = exec
            .upsert_dns_record(
                "kuma8088.com",
                DnsRecordInput::new(DnsRecordType::Mx, "@", "route1.mx.cloudflare.net")
                    .with_priority(85),
            )
            .await
            .unwrap()
            .into_inner();
        let d = store.get_domain("kuma8088.com").await.unwrap().unwrap();
        assert_eq!(d.dns_status, DnsStatus::Valid);

        exec.delete_dns_record("kuma8088.com", mx.id).await.unwrap();
        let d = store.get_domain("kuma8088.com").await.unwrap().unwrap();
        assert_eq!(d.dns_status, DnsStatus::Invalid);

        let d = exec
            .update_domain(
                "kuma8088.com",
                DomainPatch {
                    mail_enabled: Some(false),
                    ..DomainPatch::default()
                },
            )
            .await
            .unwrap()
            .into_inner();
        assert!(!d.mail_enabled);
        assert_eq!(d.dns_status, DnsStatus::Valid);
    }

    #[tokio::test]
    async fn delete_dns_record_checks_ownership() {
        let (_, exec, _) = services().await;
        exec.create_domain(primary("example.com")).await.unwrap();
        exec.create_domain(primary("other.org")).await.unwrap();
        let rec = exec
            .upsert_dns_record(
                "example.com",
                DnsRecordInput::new(DnsRecordType::A, "@", "1.2.3.4"),
            )
            .await
            .unwrap()
            .into_inner();

        let res = exec.delete_dns_record("other.org", rec.id).await;
        assert!(matches!(res, Err(PortalError::NotFound { .. })));
        exec.delete_dns_record("example.com", rec.id).await.unwrap();
    }

    #[tokio::test]
    async fn unchanged_patch_is_a_noop() {
        let (_, exec, _) = services().await;
        let d = exec
            .create_domain(primary("example.com"))
            .await
            .unwrap()
            .into_inner();
        let res = exec
            .update_domain("example.com", DomainPatch::default())
            .await
            .unwrap();
        assert!(matches!(res, Outcome::Existing(ref same) if same.revision == d.revision));
    }

    #[test]
    fn empty_zone_is_invalid() {
        assert_eq!(dns_status_for(false, &[]), DnsStatus::Invalid);
        assert_eq!(dns_status_for(true, &[]), DnsStatus::Invalid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_creates_converge_on_one_row() {
        let (store, exec, _) = services().await;
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let exec = exec.clone();
            tasks.push(tokio::spawn(async move {
                exec.create_database(NewDatabase::new("wp_race")).await
            }));
        }

        let mut created = 0;
        let mut revisions = BTreeSet::new();
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            if outcome.is_created() {
                created += 1;
            }
            revisions.insert(outcome.get().revision);
        }
        assert_eq!(created, 1);
        assert_eq!(revisions.len(), 1);
        assert_eq!(store.list_databases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_gives_up_after_repeated_revision_conflicts() {
        let deletes = AtomicUsize::new(0);
        let deletes = &deletes;
        let res = delete_at_revision(
            "database",
            "wp_busy",
            || async { Ok::<_, PortalError>(Some(7)) },
            move |_| async move {
                deletes.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PortalError::conflict("database", "wp_busy"))
            },
        )
        .await;
        assert!(matches!(res, Err(PortalError::RevisionConflict { .. })));
        assert_eq!(deletes.load(Ordering::SeqCst), CAS_ATTEMPTS);
    }

    #[tokio::test]
    async fn delete_rereads_the_revision_after_a_conflict() {
        let reads = AtomicUsize::new(0);
        let reads = &reads;
        let res = delete_at_revision(
            "database",
            "wp_busy",
            move || async move {
                let n = reads.fetch_add(1, Ordering::SeqCst) as Revision;
                Ok::<_, PortalError>(Some(10 + n))
            },
            |revision| async move {
                if revision == 10 {
                    Err(PortalError::conflict("database", "wp_busy"))
                } else {
                    Ok(revision)
                }
            },
        )
        .await;
        assert_eq!(res.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn delete_whose_reply_was_lost_still_succeeds() {
        let (store, exec, _) = services().await;
        exec.create_database(NewDatabase::new("wp_gone"))
            .await
            .unwrap();

        // the first delete commits, then reports a conflict as a retried call would
        let store = &store;
        let res = delete_at_revision(
            "database",
            "wp_gone",
            move || async move {
                let db = store.get_database("wp_gone").await?;
                Ok::<_, PortalError>(db.map(|d| d.revision))
            },
            move |revision| async move {
                store.delete_database("wp_gone", revision).await?;
                Err::<(), PortalError>(PortalError::conflict("database", "wp_gone"))
            },
        )
        .await;
        assert_eq!(res.unwrap(), None);
        assert!(store.get_database("wp_gone").await.unwrap().is_none());

        let again = exec.delete_database("wp_gone").await;
        assert!(matches!(again, Err(PortalError::NotFound { .. })));
    }

    #[tokio::test]
    async fn domain_with_subdomains_is_kept_until_they_are_gone() {
        let (store, exec, _) = services().await;
        exec.create_domain(primary("example.com")).await.unwrap();
        exec.upsert_dns_record(
            "example.com",
            DnsRecordInput::new(DnsRecordType::A, "@", "1.2.3.4"),
        )
        .await
        .unwrap();
        exec.create_domain(NewDomain {
            domain: "blog.example.com".to_string(),
            domain_type: DomainType::Subdomain,
            mail_enabled: false,
            wordpress_enabled: true,
        })
        .await
        .unwrap();

        let res = exec.delete_domain("example.com").await;
        assert!(matches!(res, Err(PortalError::Validation(ref v)) if v.field == "domain"));
        assert!(store.get_domain("example.com").await.unwrap().is_some());
        assert_eq!(store.list_dns_records("example.com").await.unwrap().len(), 1);

        exec.delete_domain("blog.example.com").await.unwrap();
        exec.delete_domain("example.com").await.unwrap();
        assert!(store.get_domain("example.com").await.unwrap().is_none());
    }
}
