//! Resource types shared by the store, services and HTTP handlers.

pub mod database;
pub mod domain;

pub use database::{
    Database, DatabaseStats, DatabaseSummary, DatabaseUser, GrantsUpdate, NewDatabase,
    NewDatabaseUser, Privilege,
};
pub use domain::{
    DnsRecord, DnsRecordInput, DnsRecordType, DnsStatus, Domain, DomainPatch, DomainSummary,
    DomainType, NewDomain, SslStatus,
};

/// Result of an idempotent mutation.
///
/// The HTTP layer maps `Created` to `201` and the others to `200`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Created(T),
    Updated(T),
    /// The request replayed a mutation that had already been applied.
    Existing(T),
}

impl<T> Outcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            Outcome::Created(v) | Outcome::Updated(v) | Outcome::Existing(v) => v,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            Outcome::Created(v) | Outcome::Updated(v) | Outcome::Existing(v) => v,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Outcome::Created(_))
    }
}

/// Optional `?filter=` query on list endpoints.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ListFilter {
    pub filter: Option<String>,
}

impl ListFilter {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
        }
    }

    /// Case-insensitive substring match; an empty or absent filter matches all.
    pub fn matches(&self, name: &str) -> bool {
        match self.filter.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => name.to_lowercase().contains(&needle.to_lowercase()),
        }
    }
}
