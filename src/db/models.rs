/// Store-wide write sequence number. Every successful write stamps the row
/// with a fresh value, so a revision is never reused, even across a
/// delete and re-create of the same key.
pub type Revision = i64;

/// Precondition for a compare-and-set write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// The key must not exist yet.
    Absent,
    /// The stored row must still carry this revision.
    Revision(Revision),
}

impl Expected {
    pub fn holds(&self, current: Option<Revision>) -> bool {
        match (self, current) {
            (Expected::Absent, None) => true,
            (Expected::Revision(want), Some(have)) => *want == have,
            _ => false,
        }
    }
}

/// Key of a database account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserKey {
    pub name: String,
    pub host: String,
}

impl UserKey {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
        }
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.host)
    }
}
