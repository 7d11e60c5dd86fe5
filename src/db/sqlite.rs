use crate::db::models::{Expected, Revision, UserKey};
use crate::db::schema::SQLITE_INIT;
use crate::error::PortalError;
use crate::service::validation::ValidationError;
use crate::types::database::{grants_from_text, grants_to_text};
use crate::types::{Database, DatabaseUser, DnsRecord, Domain, Privilege};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub type SqlitePool = Pool<Sqlite>;

/// Open (creating if needed) the SQLite database at `database_url`.
///
/// In-memory URLs are pinned to a single long-lived connection so every
/// caller sees the same database.
pub async fn connect(database_url: &str) -> Result<SqlitePool, PortalError> {
    let in_memory = database_url.contains(":memory:");
    let mut opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        opts = opts.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?
    } else {
        SqlitePoolOptions::new().connect_with(opts).await?
    };
    Ok(pool)
}

fn decode_err<E>(e: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(e))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(decode_err)?
        .with_timezone(&Utc))
}

fn check_expected(
    kind: &'static str,
    key: impl Into<String>,
    current: Option<Revision>,
    expected: Expected,
) -> Result<(), PortalError> {
    if expected.holds(current) {
        Ok(())
    } else {
        Err(PortalError::conflict(kind, key))
    }
}

async fn next_revision(tx: &mut Transaction<'_, Sqlite>) -> Result<Revision, PortalError> {
    let rec: (i64,) = sqlx::query_as(
        "UPDATE revision_counter SET value = value + 1 WHERE id = 1 RETURNING value",
    )
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.0)
}

/// Durable record of databases, database users, domains and DNS records.
///
/// Every write is a compare-and-set against an [`Expected`] revision and runs
/// in its own transaction.
#[derive(Clone)]
pub struct ResourceStorage {
    pool: SqlitePool,
}

impl ResourceStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the schema and seed the `root@localhost` account.
    pub async fn init_schema(&self) -> Result<(), PortalError> {
        // sqlx::query runs one statement at a time
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }

        let root = UserKey::new("root", "localhost");
        if self.get_user(&root).await?.is_none() {
            let now = Utc::now();
            self.put_user(
                &DatabaseUser {
                    name: root.name.clone(),
                    host: root.host.clone(),
                    grants: [Privilege::AllPrivileges].into_iter().collect(),
                    revision: 0,
                    created_at: now,
                    updated_at: now,
                },
                Expected::Absent,
            )
            .await?;
            info!(user = %root, "seeded root database account");
        }
        Ok(())
    }

    // ---- databases ----

    pub async fn get_database(&self, name: &str) -> Result<Option<Database>, PortalError> {
        let row = sqlx::query(
            r#"SELECT name, size_bytes, table_count, charset, collation, revision,
               created_at, updated_at FROM databases WHERE name = ?"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_database).transpose()
    }

    pub async fn list_databases(&self) -> Result<Vec<Database>, PortalError> {
        let rows = sqlx::query(
            r#"SELECT name, size_bytes, table_count, charset, collation, revision,
               created_at, updated_at FROM databases ORDER BY name"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_database).collect()
    }

    /// Insert or update by name. `revision` and timestamps on `db` are
    /// ignored; the stored row gets a fresh revision.
    pub async fn put_database(
        &self,
        db: &Database,
        expected: Expected,
    ) -> Result<Database, PortalError> {
        let mut tx = self.pool.begin().await?;
        let current: Option<(i64,)> =
            sqlx::query_as("SELECT revision FROM databases WHERE name = ?")
                .bind(&db.name)
                .fetch_optional(&mut *tx)
                .await?;
        check_expected("database", &db.name, current.map(|r| r.0), expected)?;

        let revision = next_revision(&mut tx).await?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO databases (
                name, size_bytes, table_count, charset, collation,
                revision, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                size_bytes=excluded.size_bytes,
                table_count=excluded.table_count,
                charset=excluded.charset,
                collation=excluded.collation,
                revision=excluded.revision,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(&db.name)
        .bind(db.size_bytes)
        .bind(db.table_count)
        .bind(&db.charset)
        .bind(&db.collation)
        .bind(revision)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_database(&db.name)
            .await?
            .ok_or_else(|| PortalError::not_found("database", &db.name))
    }

    pub async fn delete_database(&self, name: &str, expected: Revision) -> Result<(), PortalError> {
        let res = sqlx::query("DELETE FROM databases WHERE name = ? AND revision = ?")
            .bind(name)
            .bind(expected)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(PortalError::conflict("database", name));
        }
        Ok(())
    }

    // ---- database users ----

    pub async fn get_user(&self, key: &UserKey) -> Result<Option<DatabaseUser>, PortalError> {
        let row = sqlx::query(
            r#"SELECT name, host, grants, revision, created_at, updated_at
               FROM database_users WHERE name = ? AND host = ?"#,
        )
        .bind(&key.name)
        .bind(&key.host)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_user).transpose()
    }

    pub async fn list_users(&self) -> Result<Vec<DatabaseUser>, PortalError> {
        let rows = sqlx::query(
            r#"SELECT name, host, grants, revision, created_at, updated_at
               FROM database_users ORDER BY name, host"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_user).collect()
    }

    pub async fn put_user(
        &self,
        user: &DatabaseUser,
        expected: Expected,
    ) -> Result<DatabaseUser, PortalError> {
        let key = UserKey::new(&user.name, &user.host);
        let mut tx = self.pool.begin().await?;
        let current: Option<(i64,)> =
            sqlx::query_as("SELECT revision FROM database_users WHERE name = ? AND host = ?")
                .bind(&key.name)
                .bind(&key.host)
                .fetch_optional(&mut *tx)
                .await?;
        check_expected("user", key.to_string(), current.map(|r| r.0), expected)?;

        let revision = next_revision(&mut tx).await?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO database_users (name, host, grants, revision, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name, host) DO UPDATE SET
                grants=excluded.grants,
                revision=excluded.revision,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(&key.name)
        .bind(&key.host)
        .bind(grants_to_text(&user.grants))
        .bind(revision)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_user(&key)
            .await?
            .ok_or_else(|| PortalError::not_found("user", key.to_string()))
    }

    pub async fn delete_user(&self, key: &UserKey, expected: Revision) -> Result<(), PortalError> {
        let res =
            sqlx::query("DELETE FROM database_users WHERE name = ? AND host = ? AND revision = ?")
                .bind(&key.name)
                .bind(&key.host)
                .bind(expected)
                .execute(&self.pool)
                .await?;
        if res.rows_affected() == 0 {
            return Err(PortalError::conflict("user", key.to_string()));
        }
        Ok(())
    }

    // ---- domains ----

    pub async fn get_domain(&self, domain: &str) -> Result<Option<Domain>, PortalError> {
        let row = sqlx::query(
            r#"SELECT domain, domain_type, mail_enabled, wordpress_enabled, ssl_status,
               dns_status, revision, created_at, updated_at FROM domains WHERE domain = ?"#,
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_domain).transpose()
    }

    pub async fn list_domains(&self) -> Result<Vec<Domain>, PortalError> {
        let rows = sqlx::query(
            r#"SELECT domain, domain_type, mail_enabled, wordpress_enabled, ssl_status,
               dns_status, revision, created_at, updated_at FROM domains ORDER BY domain"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_domain).collect()
    }

    pub async fn put_domain(&self, d: &Domain, expected: Expected) -> Result<Domain, PortalError> {
        let mut tx = self.pool.begin().await?;
        let current: Option<(i64,)> =
            sqlx::query_as("SELECT revision FROM domains WHERE domain = ?")
                .bind(&d.domain)
                .fetch_optional(&mut *tx)
                .await?;
        check_expected("domain", &d.domain, current.map(|r| r.0), expected)?;

        let revision = next_revision(&mut tx).await?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO domains (
                domain, domain_type, mail_enabled, wordpress_enabled, ssl_status,
                dns_status, revision, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(domain) DO UPDATE SET
                domain_type=excluded.domain_type,
                mail_enabled=excluded.mail_enabled,
                wordpress_enabled=excluded.wordpress_enabled,
                ssl_status=excluded.ssl_status,
                dns_status=excluded.dns_status,
                revision=excluded.revision,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(&d.domain)
        .bind(d.domain_type.as_str())
        .bind(i64::from(d.mail_enabled))
        .bind(i64::from(d.wordpress_enabled))
        .bind(d.ssl_status.as_str())
        .bind(d.dns_status.as_str())
        .bind(revision)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_domain(&d.domain)
            .await?
            .ok_or_else(|| PortalError::not_found("domain", &d.domain))
    }

    /// Delete a domain and every DNS record it owns in one transaction.
    /// Returns the number of DNS records removed.
    pub async fn delete_domain(&self, domain: &str, expected: Revision) -> Result<u64, PortalError> {
        let mut tx = self.pool.begin().await?;
        let current: Option<(i64,)> =
            sqlx::query_as("SELECT revision FROM domains WHERE domain = ?")
                .bind(domain)
                .fetch_optional(&mut *tx)
                .await?;
        check_expected(
            "domain",
            domain,
            current.map(|r| r.0),
            Expected::Revision(expected),
        )?;

        let child: Option<(String,)> = sqlx::query_as(
            r#"SELECT domain FROM domains
               WHERE domain_type = 'subdomain'
                 AND substr(domain, instr(domain, '.') + 1) = ?
               ORDER BY domain LIMIT 1"#,
        )
        .bind(domain)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((child,)) = child {
            return Err(ValidationError::new(
                "domain",
                format!("`{domain}` still has subdomain `{child}`"),
            )
            .into());
        }

        let records = sqlx::query("DELETE FROM dns_records WHERE domain = ?")
            .bind(domain)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM domains WHERE domain = ?")
            .bind(domain)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(records)
    }

    // ---- dns records ----

    pub async fn get_dns_record(&self, id: i64) -> Result<Option<DnsRecord>, PortalError> {
        let row = sqlx::query(
            r#"SELECT id, domain, record_type, name, value, priority, ttl, revision,
               created_at, updated_at FROM dns_records WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_dns_record).transpose()
    }

    /// Look a record up by its natural key.
    pub async fn find_dns_record(
        &self,
        domain: &str,
        record_type: &str,
        name: &str,
        value: &str,
    ) -> Result<Option<DnsRecord>, PortalError> {
        let row = sqlx::query(
            r#"SELECT id, domain, record_type, name, value, priority, ttl, revision,
               created_at, updated_at FROM dns_records
               WHERE domain = ? AND record_type = ? AND name = ? AND value = ?"#,
        )
        .bind(domain)
        .bind(record_type)
        .bind(name)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_dns_record).transpose()
    }

    pub async fn list_dns_records(&self, domain: &str) -> Result<Vec<DnsRecord>, PortalError> {
        let rows = sqlx::query(
            r#"SELECT id, domain, record_type, name, value, priority, ttl, revision,
               created_at, updated_at FROM dns_records WHERE domain = ?
               ORDER BY name, record_type, value"#,
        )
        .bind(domain)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_dns_record).collect()
    }

    /// `Expected::Absent` inserts (checked against the natural key);
    /// `Expected::Revision` updates priority/ttl of the row with `rec.id`.
    pub async fn put_dns_record(
        &self,
        rec: &DnsRecord,
        expected: Expected,
    ) -> Result<DnsRecord, PortalError> {
        let key = format!("{} {} {} {}", rec.domain, rec.record_type, rec.name, rec.value);
        let mut tx = self.pool.begin().await?;

        let owner: Option<(String,)> = sqlx::query_as("SELECT domain FROM domains WHERE domain = ?")
            .bind(&rec.domain)
            .fetch_optional(&mut *tx)
            .await?;
        if owner.is_none() {
            return Err(PortalError::not_found("domain", &rec.domain));
        }

        let current: Option<(i64,)> = match expected {
            Expected::Absent => {
                sqlx::query_as(
                    r#"SELECT revision FROM dns_records
                       WHERE domain = ? AND record_type = ? AND name = ? AND value = ?"#,
                )
                .bind(&rec.domain)
                .bind(rec.record_type.as_str())
                .bind(&rec.name)
                .bind(&rec.value)
                .fetch_optional(&mut *tx)
                .await?
            }
            Expected::Revision(_) => {
                sqlx::query_as("SELECT revision FROM dns_records WHERE id = ? AND domain = ?")
                    .bind(rec.id)
                    .bind(&rec.domain)
                    .fetch_optional(&mut *tx)
                    .await?
            }
        };
        check_expected("dns record", &key, current.map(|r| r.0), expected)?;
        let revision = next_revision(&mut tx).await?;

        let now = Utc::now().to_rfc3339();
        let priority = rec.priority.map(i64::from);
        let ttl = rec.ttl.map(i64::from);
        let id = match expected {
            Expected::Absent => {
                let res = sqlx::query(
                    r#"
                    INSERT INTO dns_records (
                        domain, record_type, name, value, priority, ttl,
                        revision, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&rec.domain)
                .bind(rec.record_type.as_str())
                .bind(&rec.name)
                .bind(&rec.value)
                .bind(priority)
                .bind(ttl)
                .bind(revision)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                res.last_insert_rowid()
            }
            Expected::Revision(_) => {
                sqlx::query(
                    r#"UPDATE dns_records SET priority = ?, ttl = ?, revision = ?, updated_at = ?
                       WHERE id = ?"#,
                )
                .bind(priority)
                .bind(ttl)
                .bind(revision)
                .bind(&now)
                .bind(rec.id)
                .execute(&mut *tx)
                .await?;
                rec.id
            }
        };
        tx.commit().await?;

        self.get_dns_record(id)
            .await?
            .ok_or_else(|| PortalError::not_found("dns record", key))
    }

    pub async fn delete_dns_record(&self, id: i64, expected: Revision) -> Result<(), PortalError> {
        let res = sqlx::query("DELETE FROM dns_records WHERE id = ? AND revision = ?")
            .bind(id)
            .bind(expected)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(PortalError::conflict("dns record", id.to_string()));
        }
        Ok(())
    }

    // ---- row mapping ----

    fn row_to_database(row: SqliteRow) -> Result<Database, PortalError> {
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(Database {
            name: row.try_get("name")?,
            size_bytes: row.try_get("size_bytes")?,
            table_count: row.try_get("table_count")?,
            charset: row.try_get("charset")?,
            collation: row.try_get("collation")?,
            revision: row.try_get("revision")?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }

    fn row_to_user(row: SqliteRow) -> Result<DatabaseUser, PortalError> {
        let grants: String = row.try_get("grants")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(DatabaseUser {
            name: row.try_get("name")?,
            host: row.try_get("host")?,
            grants: grants_from_text(&grants).map_err(decode_err)?,
            revision: row.try_get("revision")?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }

    fn row_to_domain(row: SqliteRow) -> Result<Domain, PortalError> {
        let domain_type: String = row.try_get("domain_type")?;
        let ssl_status: String = row.try_get("ssl_status")?;
        let dns_status: String = row.try_get("dns_status")?;
        let mail_enabled: i64 = row.try_get("mail_enabled")?;
        let wordpress_enabled: i64 = row.try_get("wordpress_enabled")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(Domain {
            domain: row.try_get("domain")?,
            domain_type: domain_type.parse().map_err(decode_err)?,
            mail_enabled: mail_enabled != 0,
            wordpress_enabled: wordpress_enabled != 0,
            ssl_status: ssl_status.parse().map_err(decode_err)?,
            dns_status: dns_status.parse().map_err(decode_err)?,
            revision: row.try_get("revision")?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }

    fn row_to_dns_record(row: SqliteRow) -> Result<DnsRecord, PortalError> {
        let record_type: String = row.try_get("record_type")?;
        let priority: Option<i64> = row.try_get("priority")?;
        let ttl: Option<i64> = row.try_get("ttl")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(DnsRecord {
            id: row.try_get("id")?,
            domain: row.try_get("domain")?,
            record_type: record_type.parse().map_err(decode_err)?,
            name: row.try_get("name")?,
            value: row.try_get("value")?,
            priority: priority
                .map(u16::try_from)
                .transpose()
                .map_err(decode_err)?,
            ttl: ttl.map(u32::try_from).transpose().map_err(decode_err)?,
            revision: row.try_get("revision")?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }
}
