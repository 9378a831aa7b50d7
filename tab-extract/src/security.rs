//! Credential handling and SQL identifier quoting.

use crate::error::{ExportError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secure string that automatically clears its contents when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecureString(String);

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureString(***)")
    }
}

impl SecureString {
    /// Create a new secure string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the string value. Use carefully and avoid storing the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Convert to a regular string. The SecureString will be zeroized.
    pub fn into_string(mut self) -> String {
        let value = std::mem::take(&mut self.0);
        self.0.zeroize();
        value
    }
}

impl From<String> for SecureString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecureString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// SQL identifier validation and quoting for extract tables.
pub struct SqlSecurity;

impl SqlSecurity {
    /// Maximum identifier length accepted for schema, table and column names.
    pub const MAX_IDENTIFIER_LENGTH: usize = 128;

    /// Validates a schema or table name and returns it double-quoted.
    ///
    /// Names must start with a letter or underscore and contain only
    /// letters, digits and underscores.
    ///
    /// ```rust
    /// use tab_extract::security::SqlSecurity;
    ///
    /// assert_eq!(SqlSecurity::escape_identifier("Extract").unwrap(), "\"Extract\"");
    /// assert!(SqlSecurity::escape_identifier("t; DROP TABLE x").is_err());
    /// ```
    pub fn escape_identifier(identifier: &str) -> Result<String> {
        Self::check_common(identifier)?;

        static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
            #[allow(clippy::expect_used)]
            Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("Hard-coded regex pattern should be valid")
        });

        if !IDENTIFIER_REGEX.is_match(identifier) {
            return Err(ExportError::Security(format!(
                "Invalid SQL identifier format: '{identifier}'. Identifiers must start with a letter or underscore and contain only letters, numbers and underscores"
            )));
        }

        Ok(format!("\"{identifier}\""))
    }

    /// Quotes a column name.
    ///
    /// Column names come from field paths (`parent.child`) and metric
    /// expressions, so any printable text is allowed; embedded double quotes
    /// are doubled.
    pub fn quote_column(name: &str) -> Result<String> {
        Self::check_common(name)?;
        if name.chars().any(char::is_control) {
            return Err(ExportError::Security(format!(
                "Column name '{}' contains control characters",
                name.escape_debug()
            )));
        }
        Ok(format!("\"{}\"", name.replace('"', "\"\"")))
    }

    fn check_common(identifier: &str) -> Result<()> {
        if identifier.trim().is_empty() {
            return Err(ExportError::Security(
                "SQL identifier cannot be empty or whitespace-only".to_string(),
            ));
        }

        if identifier.len() > Self::MAX_IDENTIFIER_LENGTH {
            return Err(ExportError::Security(format!(
                "SQL identifier too long (max {} characters)",
                Self::MAX_IDENTIFIER_LENGTH
            )));
        }

        if identifier.contains('\0') {
            return Err(ExportError::Security(
                "SQL identifier cannot contain null bytes".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_string_debug_is_redacted() {
        let secret = SecureString::new("hunter2");
        assert_eq!(format!("{secret:?}"), "SecureString(***)");
        assert_eq!(secret.expose(), "hunter2");
        assert_eq!(secret.into_string(), "hunter2");
    }

    #[test]
    fn test_escape_identifier() {
        assert_eq!(SqlSecurity::escape_identifier("Metric").unwrap(), "\"Metric\"");
        assert!(SqlSecurity::escape_identifier("").is_err());
        assert!(SqlSecurity::escape_identifier("1table").is_err());
        assert!(SqlSecurity::escape_identifier("a.b").is_err());
        assert!(SqlSecurity::escape_identifier(&"x".repeat(200)).is_err());
    }

    #[test]
    fn test_quote_column() {
        assert_eq!(SqlSecurity::quote_column("parent.name").unwrap(), "\"parent.name\"");
        assert_eq!(
            SqlSecurity::quote_column("avg(\"temp\")").unwrap(),
            "\"avg(\"\"temp\"\")\""
        );
        assert!(SqlSecurity::quote_column("   ").is_err());
        assert!(SqlSecurity::quote_column("bad\nname").is_err());
    }
}
