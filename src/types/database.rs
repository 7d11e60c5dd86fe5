use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::db::Revision;

pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";

/// A relational database instance managed by the panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub name: String,
    pub size_bytes: i64,
    pub table_count: i64,
    pub charset: String,
    pub collation: String,
    pub revision: Revision,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Database {
    /// Attributes a caller controls on create; used to tell an idempotent
    /// replay from a conflicting create.
    pub fn matches(&self, req: &NewDatabase) -> bool {
        self.charset == req.charset && self.collation == req.collation
    }
}

/// Create-database request body.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewDatabase {
    pub name: String,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default = "default_collation")]
    pub collation: String,
}

impl NewDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            charset: default_charset(),
            collation: default_collation(),
        }
    }
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

fn default_collation() -> String {
    DEFAULT_COLLATION.to_string()
}

/// Live statistics reported by the database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub size_bytes: i64,
    pub table_count: i64,
}

/// A database account, keyed by `(name, host)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUser {
    pub name: String,
    pub host: String,
    pub grants: BTreeSet<Privilege>,
    pub revision: Revision,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewDatabaseUser {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub grants: BTreeSet<Privilege>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantsUpdate {
    pub grants: BTreeSet<Privilege>,
}

/// Aggregates shown on the database overview.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSummary {
    pub total_databases: usize,
    pub total_size_bytes: i64,
    pub total_users: usize,
}

/// MariaDB privilege tokens accepted in grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Privilege {
    AllPrivileges,
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Index,
    Alter,
    References,
    CreateTemporaryTables,
    LockTables,
    Execute,
    CreateView,
    ShowView,
    CreateRoutine,
    AlterRoutine,
    Event,
    Trigger,
    Usage,
}

impl Privilege {
    pub const ALL: [Privilege; 20] = [
        Privilege::AllPrivileges,
        Privilege::Select,
        Privilege::Insert,
        Privilege::Update,
        Privilege::Delete,
        Privilege::Create,
        Privilege::Drop,
        Privilege::Index,
        Privilege::Alter,
        Privilege::References,
        Privilege::CreateTemporaryTables,
        Privilege::LockTables,
        Privilege::Execute,
        Privilege::CreateView,
        Privilege::ShowView,
        Privilege::CreateRoutine,
        Privilege::AlterRoutine,
        Privilege::Event,
        Privilege::Trigger,
        Privilege::Usage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::AllPrivileges => "ALL PRIVILEGES",
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
            Privilege::Create => "CREATE",
            Privilege::Drop => "DROP",
            Privilege::Index => "INDEX",
            Privilege::Alter => "ALTER",
            Privilege::References => "REFERENCES",
            Privilege::CreateTemporaryTables => "CREATE TEMPORARY TABLES",
            Privilege::LockTables => "LOCK TABLES",
            Privilege::Execute => "EXECUTE",
            Privilege::CreateView => "CREATE VIEW",
            Privilege::ShowView => "SHOW VIEW",
            Privilege::CreateRoutine => "CREATE ROUTINE",
            Privilege::AlterRoutine => "ALTER ROUTINE",
            Privilege::Event => "EVENT",
            Privilege::Trigger => "TRIGGER",
            Privilege::Usage => "USAGE",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown privilege `{0}`")]
pub struct UnknownPrivilege(pub String);

impl FromStr for Privilege {
    type Err = UnknownPrivilege;

    /// Case-insensitive; runs of whitespace collapse, so `all  privileges` parses.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        let token = match normalized.as_str() {
            "ALL" => "ALL PRIVILEGES",
            other => other,
        };
        Privilege::ALL
            .into_iter()
            .find(|p| p.as_str() == token)
            .ok_or_else(|| UnknownPrivilege(s.to_string()))
    }
}

impl TryFrom<String> for Privilege {
    type Error = UnknownPrivilege;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Privilege> for String {
    fn from(p: Privilege) -> Self {
        p.as_str().to_string()
    }
}

/// Comma-joined form used for storage: `SELECT,INSERT`.
pub fn grants_to_text(grants: &BTreeSet<Privilege>) -> String {
    grants
        .iter()
        .map(Privilege::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

pub fn grants_from_text(text: &str) -> Result<BTreeSet<Privilege>, UnknownPrivilege> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
