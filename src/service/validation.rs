//! Naming and format rules checked before any mutation. Side-effect free.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error as ThisError;

use crate::db::UserKey;
use crate::error::PortalError;
use crate::types::{DnsRecordInput, DnsRecordType, Privilege};

/// The account that may never be altered through the controller.
pub const ROOT_USER: &str = "root";

const RESERVED_SCHEMAS: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];
/// Fixed segments under `/api/v1/database/` that a database name would shadow.
const ROUTE_SEGMENTS: [&str; 3] = ["list", "stats", "users"];
const KNOWN_CHARSETS: [&str; 6] = ["utf8mb4", "utf8mb3", "utf8", "latin1", "ascii", "binary"];
const MIN_TTL: u32 = 60;
const MAX_TTL: u32 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub fn validate_database_name(name: &str) -> Result<(), ValidationError> {
    let field = "name";
    if name.is_empty() || name.len() > 64 {
        return Err(ValidationError::new(field, "must be 1 to 64 characters"));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(ValidationError::new(field, "must start with a letter"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::new(
            field,
            "only letters, digits and underscores are allowed",
        ));
    }
    if RESERVED_SCHEMAS
        .iter()
        .any(|r| r.eq_ignore_ascii_case(name))
    {
        return Err(ValidationError::new(
            field,
            format!("`{name}` is a reserved system schema"),
        ));
    }
    if ROUTE_SEGMENTS.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(ValidationError::new(
            field,
            format!("`{name}` is reserved by the API"),
        ));
    }
    Ok(())
}

pub fn validate_charset(charset: &str, collation: &str) -> Result<(), ValidationError> {
    if !KNOWN_CHARSETS.contains(&charset) {
        return Err(ValidationError::new(
            "charset",
            format!("unsupported charset `{charset}`"),
        ));
    }
    let belongs = (charset == "binary" && collation == "binary")
        || collation
            .strip_prefix(charset)
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|suffix| {
                !suffix.is_empty()
                    && suffix
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
    if !belongs {
        return Err(ValidationError::new(
            "collation",
            format!("`{collation}` is not a collation of `{charset}`"),
        ));
    }
    Ok(())
}

/// Check FQDN syntax and return the canonical form: lowercase, no trailing dot.
pub fn validate_domain_name(domain: &str) -> Result<String, ValidationError> {
    let field = "domain";
    let trimmed = domain.trim();
    let canonical = trimmed
        .strip_suffix('.')
        .unwrap_or(trimmed)
        .to_ascii_lowercase();

    if canonical.is_empty() {
        return Err(ValidationError::new(field, "domain name is required"));
    }
    if canonical.len() > 253 {
        return Err(ValidationError::new(
            field,
            format!(
                "exceeds maximum length of 253 characters (got {})",
                canonical.len()
            ),
        ));
    }
    let labels: Vec<&str> = canonical.split('.').collect();
    if labels.len() < 2 {
        return Err(ValidationError::new(
            field,
            "must be fully qualified (at least two labels)",
        ));
    }
    for label in &labels {
        check_label(label).map_err(|reason| ValidationError::new(field, reason))?;
    }
    if labels
        .last()
        .is_some_and(|tld| tld.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(ValidationError::new(field, "top-level label cannot be numeric"));
    }
    Ok(canonical)
}

fn check_label(label: &str) -> Result<(), String> {
    if label.is_empty() || label.len() > 63 {
        return Err(format!("label `{label}` must be 1 to 63 characters"));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(format!("label `{label}` cannot start or end with a hyphen"));
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!("label `{label}` contains invalid characters"));
    }
    Ok(())
}

/// Hostname used as a record target; underscores are tolerated for service
/// names and a trailing dot is accepted.
fn is_hostname(value: &str) -> bool {
    let v = value.strip_suffix('.').unwrap_or(value);
    !v.is_empty()
        && v.len() <= 253
        && v.split('.').all(|l| {
            !l.is_empty()
                && l.len() <= 63
                && !l.starts_with('-')
                && !l.ends_with('-')
                && l
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

/// Validate a DNS record and return it with its name normalized to lowercase.
pub fn validate_dns_record(input: &DnsRecordInput) -> Result<DnsRecordInput, ValidationError> {
    let mut rec = input.clone();
    rec.name = rec.name.trim().to_ascii_lowercase();
    rec.value = rec.value.trim().to_string();

    match (rec.record_type, rec.priority) {
        (DnsRecordType::Mx, None) => {
            return Err(ValidationError::new(
                "priority",
                "MX records require a priority",
            ));
        }
        (t, Some(_)) if t != DnsRecordType::Mx => {
            return Err(ValidationError::new(
                "priority",
                format!("priority is only allowed on MX records, not {t}"),
            ));
        }
        _ => {}
    }

    validate_record_name(&rec.name)?;
    if rec.record_type == DnsRecordType::Cname && rec.name == "@" {
        return Err(ValidationError::new(
            "name",
            "CNAME records are not allowed at the zone apex",
        ));
    }

    if rec.value.is_empty() {
        return Err(ValidationError::new("value", "value is required"));
    }
    let value_ok = match rec.record_type {
        DnsRecordType::A => rec.value.parse::<Ipv4Addr>().is_ok(),
        DnsRecordType::Aaaa => rec.value.parse::<Ipv6Addr>().is_ok(),
        DnsRecordType::Cname | DnsRecordType::Mx | DnsRecordType::Ns => {
            rec.value = rec.value.to_ascii_lowercase();
            is_hostname(&rec.value)
        }
        DnsRecordType::Txt | DnsRecordType::Srv | DnsRecordType::Caa => rec.value.len() <= 4096,
    };
    if !value_ok {
        return Err(ValidationError::new(
            "value",
            format!("`{}` is not a valid {} value", rec.value, rec.record_type),
        ));
    }

    if let Some(ttl) = rec.ttl
        && !(MIN_TTL..=MAX_TTL).contains(&ttl)
    {
        return Err(ValidationError::new(
            "ttl",
            format!("must be between {MIN_TTL} and {MAX_TTL} seconds"),
        ));
    }
    Ok(rec)
}

/// `@` (apex), `*`, or dot-separated relative labels, optionally `*.`-prefixed.
fn validate_record_name(name: &str) -> Result<(), ValidationError> {
    if name == "@" || name == "*" {
        return Ok(());
    }
    let rest = name.strip_prefix("*.").unwrap_or(name);
    if rest.is_empty() || rest.len() > 253 {
        return Err(ValidationError::new("name", "record name is required"));
    }
    for label in rest.split('.') {
        // service labels such as `_dmarc` or `_sip._tcp`
        let plain = label.strip_prefix('_').unwrap_or(label);
        check_label(plain).map_err(|reason| ValidationError::new("name", reason))?;
    }
    Ok(())
}

pub fn validate_user(
    name: &str,
    host: &str,
    grants: &BTreeSet<Privilege>,
) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > 80 {
        return Err(ValidationError::new("name", "must be 1 to 80 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ValidationError::new(
            "name",
            "only letters, digits, `_`, `-` and `.` are allowed",
        ));
    }
    if host.is_empty() || host.len() > 255 {
        return Err(ValidationError::new("host", "must be 1 to 255 characters"));
    }
    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '%' | ':' | '/'))
    {
        return Err(ValidationError::new(
            "host",
            "must be a hostname, an IP address or a `%` wildcard pattern",
        ));
    }
    validate_grants(grants)
}

pub fn validate_grants(grants: &BTreeSet<Privilege>) -> Result<(), ValidationError> {
    if grants.contains(&Privilege::AllPrivileges) && grants.len() > 1 {
        return Err(ValidationError::new(
            "grants",
            "ALL PRIVILEGES cannot be combined with other privileges",
        ));
    }
    Ok(())
}

/// Reject any mutation of the root account.
pub fn ensure_mutable_user(key: &UserKey) -> Result<(), PortalError> {
    if key.name.eq_ignore_ascii_case(ROOT_USER) {
        return Err(PortalError::protected("user", key.to_string()));
    }
    Ok(())
}

/// The domain one label up, e.g. `blog.example.com` -> `example.com`.
/// `None` when that would leave a single label.
pub fn parent_domain(domain: &str) -> Option<&str> {
    let (_, parent) = domain.split_once('.')?;
    parent.contains('.').then_some(parent)
}
