//! Row transcoder: scalar values to MySQL literal text, and back.
//!
//! Literal policy:
//!
//! | Value | Literal |
//! |---|---|
//! | NULL | `NULL` |
//! | bool | `1` / `0` |
//! | integer, decimal, float | decimal text, unquoted (NaN/inf become `NULL`) |
//! | text | single-quoted; `'` doubled, `\`, NUL, LF, CR and ^Z backslash-escaped |
//! | bytes | `0x` + lowercase hex (`X''` when empty) |
//! | uuid, temporal | formatted, then quoted as text |
//!
//! Statements built here are executed as plain text with no parameter
//! binding, so a `?` or `%s` inside migrated data stays data.

pub mod lexer;
pub mod parse;

use std::fmt::Write as _;

use crate::core::identifier::quote_mysql;
use crate::core::{Row, SqlValue};
use crate::error::Result;

pub use lexer::{split_statements, tokenize, Lexer, Spanned, Token};
pub use parse::{decode_literal, insert_prefix_end, parse_insert, InsertStatement, InsertValue};

/// Render a value as a MySQL literal.
pub fn to_literal(value: &SqlValue<'_>) -> String {
    let mut out = String::new();
    write_literal(&mut out, value);
    out
}

/// Append the literal for `value` to `out`.
pub fn write_literal(out: &mut String, value: &SqlValue<'_>) {
    match value {
        SqlValue::Null => out.push_str("NULL"),
        SqlValue::Bool(b) => out.push_str(if *b { "1" } else { "0" }),
        SqlValue::I64(n) => {
            let _ = write!(out, "{}", n);
        }
        SqlValue::U64(n) => {
            let _ = write!(out, "{}", n);
        }
        SqlValue::F32(f) => {
            if f.is_finite() {
                let _ = write!(out, "{}", f);
            } else {
                out.push_str("NULL");
            }
        }
        SqlValue::F64(f) => {
            if f.is_finite() {
                let _ = write!(out, "{}", f);
            } else {
                out.push_str("NULL");
            }
        }
        SqlValue::Decimal(d) => {
            let _ = write!(out, "{}", d);
        }
        SqlValue::Text(s) => write_quoted(out, s),
        SqlValue::Bytes(b) if b.is_empty() => out.push_str("X''"),
        SqlValue::Bytes(b) => {
            out.push_str("0x");
            out.push_str(&hex::encode(b));
        }
        SqlValue::Uuid(u) => write_quoted(out, &u.to_string()),
        SqlValue::DateTime(dt) => {
            write_quoted(out, &dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        }
        SqlValue::DateTimeOffset(dto) => {
            write_quoted(out, &dto.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string())
        }
        SqlValue::Date(d) => write_quoted(out, &d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => write_quoted(out, &t.format("%H:%M:%S%.6f").to_string()),
    }
}

/// Quote and escape a string as a MySQL string literal.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    write_quoted(&mut out, s);
    out
}

fn write_quoted(out: &mut String, s: &str) {
    out.reserve(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\x1a' => out.push_str("\\Z"),
            other => out.push(other),
        }
    }
    out.push('\'');
}

/// Build one `INSERT IGNORE` statement for rows that share a column set.
///
/// `columns` fixes the column order; a row missing one of them gets the
/// `DEFAULT` keyword in that position.
pub fn render_insert_ignore(table: &str, columns: &[String], rows: &[Row]) -> Result<String> {
    let quoted_cols = columns
        .iter()
        .map(|c| quote_mysql(c))
        .collect::<Result<Vec<_>>>()?;

    let mut sql = String::with_capacity(64 + rows.len() * columns.len() * 16);
    let _ = write!(
        sql,
        "INSERT IGNORE INTO {} ({}) VALUES ",
        quote_mysql(table)?,
        quoted_cols.join(", ")
    );

    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (j, col) in columns.iter().enumerate() {
            if j > 0 {
                sql.push_str(", ");
            }
            match row.get(col) {
                Some(value) => write_literal(&mut sql, value),
                None => sql.push_str("DEFAULT"),
            }
        }
        sql.push(')');
    }

    Ok(sql)
}
