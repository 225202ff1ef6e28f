//! Literal decoding and `INSERT` statement parsing on top of the lexer.

use std::borrow::Cow;
use std::str::FromStr;

use rust_decimal::Decimal;

use super::lexer::{Lexer, Spanned, Token};
use super::to_literal;
use crate::core::identifier::quote_mysql;
use crate::core::SqlValue;
use crate::error::{MigrateError, Result};

/// One cell of a `VALUES` tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertValue {
    /// A literal together with its source text.
    ///
    /// `text` is `None` for values built in code; those render through
    /// [`to_literal`].
    Literal {
        value: SqlValue<'static>,
        text: Option<String>,
    },
    /// The `DEFAULT` keyword.
    Default,
}

impl InsertValue {
    /// A value with no source text.
    pub fn new(value: SqlValue<'static>) -> Self {
        InsertValue::Literal { value, text: None }
    }

    /// The decoded value, `None` for `DEFAULT`.
    pub fn value(&self) -> Option<&SqlValue<'static>> {
        match self {
            InsertValue::Literal { value, .. } => Some(value),
            InsertValue::Default => None,
        }
    }

    pub fn into_value(self) -> Option<SqlValue<'static>> {
        match self {
            InsertValue::Literal { value, .. } => Some(value),
            InsertValue::Default => None,
        }
    }

    /// Source text when there is one, so numbers wider than any native
    /// type go back out unchanged.
    fn render(&self) -> String {
        match self {
            InsertValue::Literal {
                text: Some(text), ..
            } => text.clone(),
            InsertValue::Literal { value, text: None } => to_literal(value),
            InsertValue::Default => "DEFAULT".to_string(),
        }
    }
}

/// A parsed `INSERT ... VALUES` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub ignore: bool,
    pub table: String,
    /// Explicit column list. Empty when the statement relies on table order.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<InsertValue>>,
}

impl InsertStatement {
    /// Keep only the columns accepted by `keep`, in their original order.
    ///
    /// Returns the number of columns dropped.
    pub fn retain_columns(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let mask: Vec<bool> = self.columns.iter().map(|c| keep(c)).collect();
        let dropped = mask.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return 0;
        }

        let mut idx = 0;
        self.columns.retain(|_| {
            idx += 1;
            mask[idx - 1]
        });
        for row in &mut self.rows {
            let mut idx = 0;
            row.retain(|_| {
                idx += 1;
                mask.get(idx - 1).copied().unwrap_or(false)
            });
        }
        dropped
    }

    /// Render back to SQL text.
    pub fn to_sql(&self) -> Result<String> {
        let mut sql = String::from(if self.ignore {
            "INSERT IGNORE INTO "
        } else {
            "INSERT INTO "
        });
        sql.push_str(&quote_mysql(&self.table)?);
        if !self.columns.is_empty() {
            let cols = self
                .columns
                .iter()
                .map(|c| quote_mysql(c))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" (");
            sql.push_str(&cols.join(", "));
            sql.push(')');
        }
        sql.push_str(" VALUES ");
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            let cells: Vec<String> = row.iter().map(InsertValue::render).collect();
            sql.push_str(&cells.join(", "));
            sql.push(')');
        }
        Ok(sql)
    }
}

/// Decode numeric literal text.
///
/// Integers become `I64` (or `U64` past `i64::MAX`), fixed-point text becomes
/// `Decimal`, exponent notation becomes `F64`.
pub fn decode_number(text: &str, offset: usize) -> Result<SqlValue<'static>> {
    let invalid = || MigrateError::syntax(offset, format!("invalid number {:?}", text));

    if text.contains(['e', 'E']) {
        return f64::from_str(text).map(SqlValue::F64).map_err(|_| invalid());
    }
    if !text.contains('.') {
        if let Ok(v) = i64::from_str(text) {
            return Ok(SqlValue::I64(v));
        }
        if let Ok(v) = u64::from_str(text) {
            return Ok(SqlValue::U64(v));
        }
    }
    match Decimal::from_str(text) {
        Ok(d) => Ok(SqlValue::Decimal(d)),
        Err(_) => f64::from_str(text).map(SqlValue::F64).map_err(|_| invalid()),
    }
}

fn value_from_token(tok: &Spanned<'_>, src: &str) -> Result<InsertValue> {
    let value = match &tok.token {
        Token::Null => SqlValue::Null,
        Token::Default => return Ok(InsertValue::Default),
        Token::Bool(b) => SqlValue::Bool(*b),
        Token::Str(s) => SqlValue::Text(Cow::Owned(s.to_string())),
        Token::Number(n) => decode_number(n, tok.start)?,
        Token::Hex(bytes) => SqlValue::Bytes(Cow::Owned(bytes.clone())),
        other => {
            return Err(MigrateError::syntax(
                tok.start,
                format!("unsupported value expression {:?}", other),
            ))
        }
    };
    Ok(InsertValue::Literal {
        value,
        text: src.get(tok.start..tok.end).map(str::to_string),
    })
}

/// Decode a single literal such as `'a''b'`, `0x00ff` or `NULL`.
pub fn decode_literal(sql: &str) -> Result<SqlValue<'static>> {
    let mut lexer = Lexer::new(sql);
    let tok = lexer
        .next_token()?
        .ok_or_else(|| MigrateError::syntax(0, "empty literal"))?;
    if let Some(extra) = lexer.next_token()? {
        return Err(MigrateError::syntax(extra.start, "trailing input after literal"));
    }
    value_from_token(&tok, sql)?
        .into_value()
        .ok_or_else(|| MigrateError::syntax(tok.start, "DEFAULT is not a value"))
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Spanned<'a>>,
    pos: usize,
    len: usize,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str) -> Result<Self> {
        let tokens = Lexer::new(sql).collect::<Result<Vec<_>>>()?;
        Ok(Self {
            src: sql,
            tokens,
            pos: 0,
            len: sql.len(),
        })
    }

    fn peek(&self) -> Option<&Spanned<'a>> {
        self.tokens.get(self.pos)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.len, |t| t.start)
    }

    fn next(&mut self) -> Result<&Spanned<'a>> {
        let offset = self.offset();
        let tok = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| MigrateError::syntax(offset, "unexpected end of statement"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Spanned {
                token: Token::Word(w),
                ..
            }) if w.eq_ignore_ascii_case(word) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn eat(&mut self, token: &Token<'_>) -> bool {
        if self.peek().is_some_and(|t| &t.token == token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token<'_>, what: &str) -> Result<()> {
        let offset = self.offset();
        if self.eat(token) {
            Ok(())
        } else {
            Err(MigrateError::syntax(offset, format!("expected {}", what)))
        }
    }

    fn identifier(&mut self) -> Result<String> {
        let tok = self.next()?;
        match &tok.token {
            Token::Word(w) => Ok((*w).to_string()),
            Token::QuotedIdent(name) => Ok(name.to_string()),
            other => Err(MigrateError::syntax(
                tok.start,
                format!("expected identifier, found {:?}", other),
            )),
        }
    }

    /// `name` or `db.name`; the database qualifier is dropped.
    fn table_name(&mut self) -> Result<String> {
        let mut name = self.identifier()?;
        while self.eat(&Token::Symbol('.')) {
            name = self.identifier()?;
        }
        Ok(name)
    }

    fn insert(&mut self) -> Result<InsertStatement> {
        let offset = self.offset();
        if !self.eat_word("INSERT") {
            return Err(MigrateError::syntax(offset, "expected INSERT"));
        }
        for modifier in ["LOW_PRIORITY", "DELAYED", "HIGH_PRIORITY"] {
            self.eat_word(modifier);
        }
        let ignore = self.eat_word("IGNORE");
        self.eat_word("INTO");
        let table = self.table_name()?;

        let mut columns = Vec::new();
        if self.eat(&Token::LParen) {
            loop {
                columns.push(self.identifier()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RParen, "')' after column list")?;
                break;
            }
        }

        let offset = self.offset();
        if !(self.eat_word("VALUES") || self.eat_word("VALUE")) {
            return Err(MigrateError::syntax(offset, "expected VALUES"));
        }

        let mut rows = Vec::new();
        loop {
            self.expect(&Token::LParen, "'(' opening a row")?;
            let mut row = Vec::new();
            loop {
                let tok = self.next()?.clone();
                row.push(value_from_token(&tok, self.src)?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RParen, "')' closing a row")?;
                break;
            }
            if !columns.is_empty() && row.len() != columns.len() {
                return Err(MigrateError::syntax(
                    self.offset(),
                    format!(
                        "row has {} values for {} columns",
                        row.len(),
                        columns.len()
                    ),
                ));
            }
            rows.push(row);
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.eat(&Token::Semicolon);
        if let Some(tok) = self.peek() {
            return Err(MigrateError::syntax(
                tok.start,
                "unsupported clause after VALUES",
            ));
        }

        Ok(InsertStatement {
            ignore,
            table,
            columns,
            rows,
        })
    }
}

/// Parse an `INSERT [IGNORE] INTO t [(cols)] VALUES (...), (...)` statement.
pub fn parse_insert(sql: &str) -> Result<InsertStatement> {
    Parser::new(sql)?.insert()
}

/// Byte range of the leading `INSERT` keyword plus any `IGNORE` modifier,
/// used to force `INSERT IGNORE` on statements that cannot be fully parsed.
pub fn insert_prefix_end(sql: &str) -> Result<Option<usize>> {
    let mut lexer = Lexer::new(sql);
    let Some(first) = lexer.next_token()? else {
        return Ok(None);
    };
    match first.token {
        Token::Word(w) if w.eq_ignore_ascii_case("INSERT") => {}
        _ => return Ok(None),
    }
    let mut end = first.end;
    while let Some(tok) = lexer.next_token()? {
        match tok.token {
            Token::Word(w)
                if ["LOW_PRIORITY", "DELAYED", "HIGH_PRIORITY", "IGNORE"]
                    .iter()
                    .any(|m| w.eq_ignore_ascii_case(m)) =>
            {
                end = tok.end;
            }
            _ => break,
        }
    }
    Ok(Some(end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multi_row_insert() {
        let stmt = parse_insert(
            "INSERT INTO `norma` (`id`, `ementa`, `arquivo`) VALUES (1, 'Lei n''1', 0x00ff), (2, NULL, DEFAULT);",
        )
        .unwrap();
        assert!(!stmt.ignore);
        assert_eq!(stmt.table, "norma");
        assert_eq!(stmt.columns, vec!["id", "ementa", "arquivo"]);
        assert_eq!(stmt.rows.len(), 2);
        assert_eq!(
            stmt.rows[0][1].value(),
            Some(&SqlValue::Text(Cow::Owned("Lei n'1".to_string())))
        );
        assert_eq!(
            stmt.rows[0][2].value(),
            Some(&SqlValue::Bytes(Cow::Owned(vec![0x00, 0xff])))
        );
        assert_eq!(stmt.rows[1][2], InsertValue::Default);
    }

    #[test]
    fn test_parse_qualified_table_and_ignore() {
        let stmt = parse_insert("insert ignore into legacy.autor (id) values (7)").unwrap();
        assert!(stmt.ignore);
        assert_eq!(stmt.table, "autor");
    }

    #[test]
    fn test_parse_rejects_function_values() {
        assert!(parse_insert("INSERT INTO t (a) VALUES (NOW())").is_err());
    }

    #[test]
    fn test_parse_rejects_arity_mismatch() {
        assert!(parse_insert("INSERT INTO t (a, b) VALUES (1)").is_err());
    }

    #[test]
    fn test_retain_columns_drops_cells() {
        let mut stmt =
            parse_insert("INSERT INTO t (a, gone, b) VALUES (1, 2, 3), (4, 5, 6)").unwrap();
        let dropped = stmt.retain_columns(|c| c != "gone");
        assert_eq!(dropped, 1);
        assert_eq!(stmt.columns, vec!["a", "b"]);
        assert_eq!(stmt.rows[1].len(), 2);
        assert_eq!(
            stmt.to_sql().unwrap(),
            "INSERT INTO `t` (`a`, `b`) VALUES (1, 3), (4, 6)"
        );
    }

    #[test]
    fn test_to_sql_keeps_literal_text() {
        let sql = "INSERT INTO `t` (`a`, `b`, `c`, `d`, `e`) VALUES \
                   (123456789012345678901234567890, 1234567890123456789012345678.123456, \
                   0.000000000000000000000000000000123, 1e400, 'it\\'s'), \
                   (-0.50, 0x00FF, X'', TRUE, \"dq\")";
        let stmt = parse_insert(sql).unwrap();
        assert_eq!(stmt.to_sql().unwrap(), sql);
    }

    #[test]
    fn test_to_sql_keeps_wide_values_after_column_drop() {
        let mut stmt = parse_insert(
            "INSERT INTO t (id, gone, total) VALUES (1, 2, 99999999999999999999999999999999.000001)",
        )
        .unwrap();
        stmt.retain_columns(|c| c != "gone");
        assert_eq!(
            stmt.to_sql().unwrap(),
            "INSERT INTO `t` (`id`, `total`) VALUES (1, 99999999999999999999999999999999.000001)"
        );
    }

    #[test]
    fn test_values_built_in_code_render_as_literals() {
        let stmt = InsertStatement {
            ignore: true,
            table: "t".to_string(),
            columns: vec!["a".to_string(), "b".to_string()],
            rows: vec![vec![
                InsertValue::new(SqlValue::Text(Cow::Owned("o'k".to_string()))),
                InsertValue::Default,
            ]],
        };
        assert_eq!(
            stmt.to_sql().unwrap(),
            "INSERT IGNORE INTO `t` (`a`, `b`) VALUES ('o''k', DEFAULT)"
        );
    }

    #[test]
    fn test_decode_number_kinds() {
        assert_eq!(decode_number("-5", 0).unwrap(), SqlValue::I64(-5));
        assert_eq!(
            decode_number("18446744073709551615", 0).unwrap(),
            SqlValue::U64(u64::MAX)
        );
        assert_eq!(
            decode_number("12.50", 0).unwrap(),
            SqlValue::Decimal(Decimal::from_str("12.50").unwrap())
        );
        assert_eq!(decode_number("1e3", 0).unwrap(), SqlValue::F64(1000.0));
    }

    #[test]
    fn test_decode_literal_rejects_trailing_input() {
        assert!(decode_literal("'a' 'b'").is_err());
        assert_eq!(decode_literal("NULL").unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_insert_prefix_end() {
        assert_eq!(insert_prefix_end("INSERT INTO t VALUES (1)").unwrap(), Some(6));
        assert_eq!(
            insert_prefix_end("INSERT IGNORE INTO t VALUES (1)").unwrap(),
            Some(13)
        );
        assert_eq!(insert_prefix_end("UPDATE t SET a = 1").unwrap(), None);
    }
}
