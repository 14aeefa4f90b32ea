//! Utility functions and helpers.

pub mod http;
pub mod log;
pub mod retry;
pub mod url;

use regex::Regex;

use crate::error::{AppError, Result};

pub use self::url::{extract_type_id, resolve};

/// Validate a SQL identifier taken from configuration (table names).
///
/// Only lower-case ASCII identifiers are accepted so they can be spliced
/// into statements without quoting.
pub fn sql_identifier(name: &str) -> Result<&str> {
    let pattern = Regex::new(r"^[a-z_][a-z0-9_]{0,62}$")
        .map_err(|e| AppError::config(format!("identifier pattern: {e}")))?;
    if pattern.is_match(name) {
        Ok(name)
    } else {
        Err(AppError::config(format!("invalid SQL identifier: {name:?}")))
    }
}

/// Make a string safe to use as a single file name component.
pub fn file_component(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '|' => '-',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_identifier() {
        assert!(sql_identifier("vehicles").is_ok());
        assert!(sql_identifier("vehicle_type_details").is_ok());
        assert!(sql_identifier("Vehicles").is_err());
        assert!(sql_identifier("vehicles; drop table x").is_err());
        assert!(sql_identifier("").is_err());
    }

    #[test]
    fn test_file_component() {
        assert_eq!(file_component("12/345\\6"), "12-345-6");
        assert_eq!(file_component("A|B"), "A-B");
        assert_eq!(file_component("  T1 "), "T1");
    }
}
