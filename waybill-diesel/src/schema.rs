//! Schema identifiers.
//!
//! Each module owns a PostgreSQL schema of the same name. Schema names are
//! spliced into SQL text, so they are validated and quoted here rather than
//! bound as parameters.

use crate::{DieselError, DieselResult};

/// Longest identifier PostgreSQL keeps without truncation.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Whether `name` is a plain, unquoted-safe PostgreSQL identifier.
pub fn is_valid_schema(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate `name` and return it double-quoted for use in SQL.
pub fn quote_schema(name: &str) -> DieselResult<String> {
    if is_valid_schema(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(DieselError::InvalidSchema(name.to_string()))
    }
}

/// `"schema".table`, validated.
pub fn qualified_table(schema: &str, table: &str) -> DieselResult<String> {
    Ok(format!("{}.{}", quote_schema(schema)?, table))
}
