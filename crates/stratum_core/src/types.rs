//! Core type definitions for Stratum.

use std::fmt;
use stratum_store::Value;
use uuid::Uuid;

/// Identifier of a mapped entity type.
///
/// Entity types order by name; the commit order uses that order to break
/// ties so that it is the same on every run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityType(String);

impl EntityType {
    /// Creates an entity type identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EntityType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Unique identifier for one commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(Uuid);

impl CommitId {
    /// Creates a fresh random commit ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CommitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "commit:{}", self.0)
    }
}

/// Storage width of an optimistic-lock version column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionKind {
    /// 32-bit integer column.
    Int,
    /// 64-bit integer column.
    Long,
}

impl VersionKind {
    /// The version a freshly inserted row starts at.
    #[must_use]
    pub const fn initial(self) -> Version {
        match self {
            VersionKind::Int => Version::Int(1),
            VersionKind::Long => Version::Long(1),
        }
    }
}

/// An optimistic-lock version value.
///
/// Versions compare by numeric value regardless of width, so
/// `Version::Int(3) == Version::Long(3)`.
#[derive(Debug, Clone, Copy)]
pub enum Version {
    /// 32-bit version.
    Int(i32),
    /// 64-bit version.
    Long(i64),
}

impl Version {
    /// Returns the numeric value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Version::Int(v) => v as i64,
            Version::Long(v) => v,
        }
    }

    /// Returns the version after one successful update, keeping the width.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Version::Int(v) => Version::Int(v.wrapping_add(1)),
            Version::Long(v) => Version::Long(v.wrapping_add(1)),
        }
    }

    /// Reads a version from a column value; `None` for NULL or non-numeric.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(Version::Int(*v)),
            Value::Long(v) => Some(Version::Long(*v)),
            _ => None,
        }
    }

    /// Converts to a column value of the same width.
    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            Version::Int(v) => Value::Int(v),
            Version::Long(v) => Value::Long(v),
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.as_i64() == other.as_i64()
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_i64().hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_i64())
    }
}
