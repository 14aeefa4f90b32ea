//! Registry record data structure.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Trim surrounding whitespace; a missing value is the empty string.
pub fn normalize(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}

/// Descriptive fields compared when deciding whether a record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedField {
    Ein,
    TypeName,
    Status,
    LastUpdate,
    Url,
}

impl TrackedField {
    pub const ALL: [TrackedField; 5] = [
        TrackedField::Ein,
        TrackedField::TypeName,
        TrackedField::Status,
        TrackedField::LastUpdate,
        TrackedField::Url,
    ];

    /// Canonical column name as written in extracts.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            TrackedField::Ein => "EIN",
            TrackedField::TypeName => "TypeName",
            TrackedField::Status => "Status",
            TrackedField::LastUpdate => "LastUpdate",
            TrackedField::Url => "URL",
        }
    }
}

impl fmt::Display for TrackedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// One row of the vehicle-type registry.
///
/// Identity is `type_id`; every other field is mutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct RegistryRecord {
    /// Vehicle type identifier (primary key)
    pub type_id: String,

    /// European Identification Number of the type
    pub ein: String,

    /// Type display name
    pub type_name: String,

    /// Authorisation status
    pub status: String,

    /// Registry's own last-update stamp, kept verbatim
    pub last_update: String,

    /// Detail page URL
    pub url: String,
}

impl RegistryRecord {
    /// Value of a tracked field.
    pub fn field(&self, field: TrackedField) -> &str {
        match field {
            TrackedField::Ein => &self.ein,
            TrackedField::TypeName => &self.type_name,
            TrackedField::Status => &self.status,
            TrackedField::LastUpdate => &self.last_update,
            TrackedField::Url => &self.url,
        }
    }

    /// Copy with every field trimmed.
    pub fn normalized(&self) -> Self {
        Self {
            type_id: normalize(Some(&self.type_id)),
            ein: normalize(Some(&self.ein)),
            type_name: normalize(Some(&self.type_name)),
            status: normalize(Some(&self.status)),
            last_update: normalize(Some(&self.last_update)),
            url: normalize(Some(&self.url)),
        }
    }

    /// Whether the record has a usable identifier.
    pub fn has_identity(&self) -> bool {
        !self.type_id.trim().is_empty()
    }
}
