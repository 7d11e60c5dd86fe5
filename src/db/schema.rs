//! SQL DDL for initializing the resource store.

/// SQLite schema with:
/// - `revision_counter`: single-row, store-wide revision sequence
/// - one table per resource family, each row carrying its `revision`
/// - `dns_records` unique on its natural key `(domain, record_type, name, value)`
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS revision_counter (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO revision_counter (id, value) VALUES (1, 0);

CREATE TABLE IF NOT EXISTS databases (
    name TEXT PRIMARY KEY NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    table_count INTEGER NOT NULL DEFAULT 0,
    charset TEXT NOT NULL,
    collation TEXT NOT NULL,
    revision INTEGER NOT NULL,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS database_users (
    name TEXT NOT NULL,
    host TEXT NOT NULL,
    grants TEXT NOT NULL, -- comma-joined privilege tokens
    revision INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (name, host)
);

CREATE TABLE IF NOT EXISTS domains (
    domain TEXT PRIMARY KEY NOT NULL,
    domain_type TEXT NOT NULL,
    mail_enabled INTEGER NOT NULL DEFAULT 0,
    wordpress_enabled INTEGER NOT NULL DEFAULT 0,
    ssl_status TEXT NOT NULL,
    dns_status TEXT NOT NULL,
    revision INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dns_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL REFERENCES domains(domain),
    record_type TEXT NOT NULL,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    priority INTEGER NULL,
    ttl INTEGER NULL,
    revision INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (domain, record_type, name, value)
);

CREATE INDEX IF NOT EXISTS idx_dns_records_domain ON dns_records(domain);
"#;
