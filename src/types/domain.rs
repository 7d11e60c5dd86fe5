use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::Revision;

/// Error produced when a stored enum column holds an unexpected value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// wire form is a fixed string per variant.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    Primary,
    Addon,
    Subdomain,
}

string_enum!(DomainType, "domain type", {
    Primary => "primary",
    Addon => "addon",
    Subdomain => "subdomain",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslStatus {
    Active,
    Pending,
    Error,
}

string_enum!(SslStatus, "ssl status", {
    Active => "active",
    Pending => "pending",
    Error => "error",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsStatus {
    Valid,
    Invalid,
}

string_enum!(DnsStatus, "dns status", {
    Valid => "valid",
    Invalid => "invalid",
});

/// A hosted domain and its feature toggles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub domain: String,
    #[serde(rename = "type")]
    pub domain_type: DomainType,
    pub mail_enabled: bool,
    pub wordpress_enabled: bool,
    pub ssl_status: SslStatus,
    pub dns_status: DnsStatus,
    pub revision: Revision,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Domain {
    pub fn matches(&self, req: &NewDomain) -> bool {
        self.domain_type == req.domain_type
            && self.mail_enabled == req.mail_enabled
            && self.wordpress_enabled == req.wordpress_enabled
    }
}

/// `POST /api/v1/domains` body.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewDomain {
    pub domain: String,
    #[serde(rename = "type")]
    pub domain_type: DomainType,
    #[serde(default)]
    pub mail_enabled: bool,
    #[serde(default)]
    pub wordpress_enabled: bool,
}

/// Partial update of a domain's feature toggles.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DomainPatch {
    pub mail_enabled: Option<bool>,
    pub wordpress_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DomainSummary {
    pub total_domains: usize,
    pub mail_enabled: usize,
    pub wordpress_enabled: usize,
    pub ssl_active: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Ns,
    Srv,
    Caa,
}

string_enum!(DnsRecordType, "dns record type", {
    A => "A",
    Aaaa => "AAAA",
    Cname => "CNAME",
    Mx => "MX",
    Txt => "TXT",
    Ns => "NS",
    Srv => "SRV",
    Caa => "CAA",
});

/// A DNS record owned by a [`Domain`].
///
/// `ttl: None` means automatic TTL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecord {
    pub id: i64,
    pub domain: String,
    #[serde(rename = "type")]
    pub record_type: DnsRecordType,
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    pub ttl: Option<u32>,
    pub revision: Revision,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `PUT /api/v1/domains/{domain}/dns`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecordInput {
    #[serde(rename = "type")]
    pub record_type: DnsRecordType,
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub priority: Option<u16>,
    #[serde(default)]
    pub ttl: Option<u32>,
}

impl DnsRecordInput {
    pub fn new(record_type: DnsRecordType, name: &str, value: &str) -> Self {
        Self {
            record_type,
            name: name.to_string(),
            value: value.to_string(),
            priority: None,
            ttl: None,
        }
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }
}
