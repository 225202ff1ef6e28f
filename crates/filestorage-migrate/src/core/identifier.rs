//! Identifier validation and quoting.
//!
//! SQL identifiers (databases, roles, tables, columns) cannot be bound as
//! parameters, and `CREATE DATABASE` / `CREATE USER` do not accept bind
//! parameters at all. Every dynamic name therefore goes through
//! [`validate_identifier`] and a dialect-specific quoting function, and the
//! few string literals that must be inlined into DDL go through
//! [`pg_string_literal`].

use crate::error::{MigrateError, Result};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes
/// - MySQL: 64 characters
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers exceeding [`MAX_IDENTIFIER_LENGTH`].
///
/// # Errors
///
/// Returns `MigrateError::Config` for invalid identifiers with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("zodb")?, "\"zodb\"");
/// assert_eq!(quote_pg("a\"b")?, "\"a\"\"b\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a MySQL identifier using backticks.
///
/// ```ignore
/// assert_eq!(quote_mysql("users")?, "`users`");
/// assert_eq!(quote_mysql("table`name")?, "`table``name`");
/// ```
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Render a PostgreSQL string literal for DDL that cannot take parameters
/// (`PASSWORD '...'`, `ALTER DATABASE ... SET x = '...'`).
///
/// Uses the `E''` form so backslashes are unambiguous regardless of
/// `standard_conforming_strings`.
pub fn pg_string_literal(value: &str) -> Result<String> {
    if value.contains('\0') {
        return Err(MigrateError::Config(
            "SECURITY: string literal contains null byte".to_string(),
        ));
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "''");
    Ok(format!("E'{}'", escaped))
}

/// Validate a PostgreSQL setting value such as `32MB` or `1h`.
///
/// Only alphanumerics, `.`, `_` and `-` are accepted; anything else is
/// rejected rather than quoted.
pub fn validate_setting_value(value: &str) -> Result<()> {
    if value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(MigrateError::Config(format!(
            "invalid setting value {:?}",
            value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("object_state").is_ok());
        assert!(validate_identifier("sapl_documentos").is_ok());
        assert!(validate_identifier("column with spaces").is_ok());
        assert!(validate_identifier("日本語").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        let result = validate_identifier("");
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("table\0name");
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_rejects_too_long() {
        let long_name = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        let result = validate_identifier(&long_name);
        assert!(result.unwrap_err().to_string().contains("maximum length"));
    }

    #[test]
    fn test_quote_pg_escapes_double_quote() {
        assert_eq!(quote_pg("zodb").unwrap(), "\"zodb\"");
        assert_eq!(quote_pg("a\"b\"c").unwrap(), "\"a\"\"b\"\"c\"");
    }

    #[test]
    fn test_quote_mysql_escapes_backtick() {
        assert_eq!(quote_mysql("users").unwrap(), "`users`");
        assert_eq!(quote_mysql("table`name").unwrap(), "`table``name`");
    }

    #[test]
    fn test_quote_mysql_sql_injection_safely_quoted() {
        let result = quote_mysql("Robert`); DROP TABLE Students;--");
        assert_eq!(result.unwrap(), "`Robert``); DROP TABLE Students;--`");
    }

    #[test]
    fn test_pg_string_literal() {
        assert_eq!(pg_string_literal("openlegis").unwrap(), "E'openlegis'");
        assert_eq!(pg_string_literal("it's").unwrap(), "E'it''s'");
        assert_eq!(pg_string_literal("a\\b").unwrap(), "E'a\\\\b'");
        assert!(pg_string_literal("a\0b").is_err());
    }

    #[test]
    fn test_validate_setting_value() {
        assert!(validate_setting_value("32MB").is_ok());
        assert!(validate_setting_value("1h").is_ok());
        assert!(validate_setting_value("32MB; DROP DATABASE x").is_err());
        assert!(validate_setting_value("").is_err());
    }
}
