//! Identifier validation
//!
//! Every table, column and alias that reaches generated SQL is validated
//! here and then quoted by the dialect. Values never go through this path;
//! they are always bound as parameters.

use crate::error::CompileError;

/// Characters allowed in SQL identifiers (alphanumeric, underscore, dollar)
const ALLOWED_IDENTIFIER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_$";

/// Longest identifier accepted (PostgreSQL truncates at 63 bytes)
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate that an identifier is safe to quote into SQL
pub fn validate_identifier(identifier: &str) -> Result<(), CompileError> {
    let Some(first) = identifier.chars().next() else {
        return Err(CompileError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    };

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(CompileError::InvalidIdentifier(format!(
            "'{}' is too long (max {} characters)",
            identifier, MAX_IDENTIFIER_LEN
        )));
    }

    if let Some(c) = identifier.chars().find(|c| !ALLOWED_IDENTIFIER_CHARS.contains(*c)) {
        return Err(CompileError::InvalidIdentifier(format!(
            "'{}' contains invalid character '{}'",
            identifier, c
        )));
    }

    if first.is_ascii_digit() {
        return Err(CompileError::InvalidIdentifier(format!(
            "'{}' cannot start with a number",
            identifier
        )));
    }

    Ok(())
}
