//! Tokenizer for the MySQL literal grammar.
//!
//! Covers what the transcoder emits and what SQL dumps contain: quoted and
//! bare identifiers, quoted strings with doubling and backslash escapes,
//! numbers, hex blobs, `NULL`/`DEFAULT`/`TRUE`/`FALSE` and punctuation.
//! Comments are skipped outside strings.

use std::borrow::Cow;

use crate::error::{MigrateError, Result};

/// One lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// Bare word (keyword or unquoted identifier).
    Word(&'a str),
    /// Backtick-quoted identifier, unescaped.
    QuotedIdent(Cow<'a, str>),
    /// Single- or double-quoted string, unescaped.
    Str(Cow<'a, str>),
    /// Numeric literal text, sign included.
    Number(&'a str),
    /// `0x...` or `X'...'` blob, decoded.
    Hex(Vec<u8>),
    Null,
    Default,
    Bool(bool),
    LParen,
    RParen,
    Comma,
    Semicolon,
    /// Any other punctuation character.
    Symbol(char),
}

/// Token plus its byte range in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<'a> {
    pub token: Token<'a>,
    pub start: usize,
    pub end: usize,
}

/// Streaming tokenizer over a SQL string.
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes().get(self.pos + offset).copied()
    }

    /// Skip whitespace and comments. Errors on an unterminated block comment.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek_at(0) {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'#') => self.skip_line(),
                Some(b'-')
                    if self.peek_at(1) == Some(b'-')
                        && self.peek_at(2).map_or(true, |c| c.is_ascii_whitespace()) =>
                {
                    self.skip_line()
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.pos;
                    match self.src[self.pos + 2..].find("*/") {
                        Some(rel) => self.pos += 2 + rel + 2,
                        None => {
                            return Err(MigrateError::syntax(start, "unterminated block comment"))
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_line(&mut self) {
        match self.src[self.pos..].find('\n') {
            Some(rel) => self.pos += rel + 1,
            None => self.pos = self.src.len(),
        }
    }

    /// Next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Result<Option<Spanned<'a>>> {
        self.skip_trivia()?;
        let start = self.pos;
        let Some(b) = self.peek_at(0) else {
            return Ok(None);
        };

        let token = match b {
            b'\'' | b'"' => self.lex_string(b)?,
            b'`' => self.lex_quoted_ident()?,
            b'(' => self.punct(Token::LParen),
            b')' => self.punct(Token::RParen),
            b',' => self.punct(Token::Comma),
            b';' => self.punct(Token::Semicolon),
            b'0' if matches!(self.peek_at(1), Some(b'x' | b'X'))
                && self.peek_at(2).is_some_and(|c| c.is_ascii_hexdigit()) =>
            {
                self.lex_hex_number()?
            }
            b'x' | b'X' if self.peek_at(1) == Some(b'\'') => self.lex_hex_string()?,
            b'0'..=b'9' => self.lex_number(),
            b'-' | b'.' if self.starts_number() => self.lex_number(),
            _ if is_word_start(b) => self.lex_word(),
            _ => {
                let ch = self.src[self.pos..].chars().next().unwrap_or('\0');
                self.pos += ch.len_utf8();
                Token::Symbol(ch)
            }
        };

        Ok(Some(Spanned {
            token,
            start,
            end: self.pos,
        }))
    }

    fn punct(&mut self, token: Token<'a>) -> Token<'a> {
        self.pos += 1;
        token
    }

    fn starts_number(&self) -> bool {
        match (self.peek_at(0), self.peek_at(1), self.peek_at(2)) {
            (Some(b'-'), Some(d), _) if d.is_ascii_digit() => true,
            (Some(b'-'), Some(b'.'), Some(d)) if d.is_ascii_digit() => true,
            (Some(b'.'), Some(d), _) if d.is_ascii_digit() => true,
            _ => false,
        }
    }

    fn lex_number(&mut self) -> Token<'a> {
        let start = self.pos;
        if self.peek_at(0) == Some(b'-') {
            self.pos += 1;
        }
        self.eat_digits();
        if self.peek_at(0) == Some(b'.') {
            self.pos += 1;
            self.eat_digits();
        }
        if matches!(self.peek_at(0), Some(b'e' | b'E')) {
            let exp_digits = match self.peek_at(1) {
                Some(b'+' | b'-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if exp_digits {
                self.pos += 1;
                if matches!(self.peek_at(0), Some(b'+' | b'-')) {
                    self.pos += 1;
                }
                self.eat_digits();
            }
        }
        Token::Number(&self.src[start..self.pos])
    }

    fn eat_digits(&mut self) {
        while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn lex_hex_number(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        self.pos += 2;
        let digits_start = self.pos;
        while self.peek_at(0).is_some_and(|c| c.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        let digits = &self.src[digits_start..self.pos];
        let decoded = if digits.len() % 2 == 1 {
            hex::decode(format!("0{}", digits))
        } else {
            hex::decode(digits)
        };
        decoded
            .map(Token::Hex)
            .map_err(|e| MigrateError::syntax(start, format!("invalid hex literal: {}", e)))
    }

    fn lex_hex_string(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        self.pos += 2;
        let digits_start = self.pos;
        let Some(rel) = self.src[digits_start..].find('\'') else {
            return Err(MigrateError::syntax(start, "unterminated hex string"));
        };
        let digits = &self.src[digits_start..digits_start + rel];
        self.pos = digits_start + rel + 1;
        hex::decode(digits)
            .map(Token::Hex)
            .map_err(|e| MigrateError::syntax(start, format!("invalid hex string: {}", e)))
    }

    fn lex_word(&mut self) -> Token<'a> {
        let start = self.pos;
        for ch in self.src[start..].chars() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
        if self.pos == start {
            // Non-alphanumeric multibyte character.
            let ch = self.src[start..].chars().next().unwrap_or('\0');
            self.pos += ch.len_utf8().max(1);
            return Token::Symbol(ch);
        }
        let word = &self.src[start..self.pos];
        if word.eq_ignore_ascii_case("NULL") {
            Token::Null
        } else if word.eq_ignore_ascii_case("DEFAULT") {
            Token::Default
        } else if word.eq_ignore_ascii_case("TRUE") {
            Token::Bool(true)
        } else if word.eq_ignore_ascii_case("FALSE") {
            Token::Bool(false)
        } else {
            Token::Word(word)
        }
    }

    fn lex_quoted_ident(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        let mut i = start + 1;
        let mut owned: Option<String> = None;
        let mut seg_start = i;
        let bytes = self.bytes();
        loop {
            match bytes.get(i) {
                None => return Err(MigrateError::syntax(start, "unterminated quoted identifier")),
                Some(b'`') if bytes.get(i + 1) == Some(&b'`') => {
                    let buf = owned.get_or_insert_with(String::new);
                    buf.push_str(&self.src[seg_start..i]);
                    buf.push('`');
                    i += 2;
                    seg_start = i;
                }
                Some(b'`') => {
                    let tail = &self.src[seg_start..i];
                    self.pos = i + 1;
                    return Ok(Token::QuotedIdent(finish(owned, tail)));
                }
                Some(_) => i += 1,
            }
        }
    }

    fn lex_string(&mut self, quote: u8) -> Result<Token<'a>> {
        let start = self.pos;
        let mut i = start + 1;
        let mut owned: Option<String> = None;
        let mut seg_start = i;
        let bytes = self.bytes();
        loop {
            let Some(&b) = bytes.get(i) else {
                return Err(MigrateError::syntax(start, "unterminated string literal"));
            };
            if b == quote {
                if bytes.get(i + 1) == Some(&quote) {
                    let buf = owned.get_or_insert_with(String::new);
                    buf.push_str(&self.src[seg_start..i]);
                    buf.push(quote as char);
                    i += 2;
                    seg_start = i;
                    continue;
                }
                let tail = &self.src[seg_start..i];
                self.pos = i + 1;
                return Ok(Token::Str(finish(owned, tail)));
            }
            if b == b'\\' {
                let Some(escaped) = self.src[i + 1..].chars().next() else {
                    return Err(MigrateError::syntax(start, "unterminated string literal"));
                };
                let buf = owned.get_or_insert_with(String::new);
                buf.push_str(&self.src[seg_start..i]);
                match escaped {
                    'n' => buf.push('\n'),
                    'r' => buf.push('\r'),
                    't' => buf.push('\t'),
                    '0' => buf.push('\0'),
                    'Z' => buf.push('\x1a'),
                    'b' => buf.push('\x08'),
                    // Pattern escapes keep their backslash.
                    '%' | '_' => {
                        buf.push('\\');
                        buf.push(escaped);
                    }
                    other => buf.push(other),
                }
                i += 1 + escaped.len_utf8();
                seg_start = i;
                continue;
            }
            i += 1;
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Spanned<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(Some(tok)) => Some(Ok(tok)),
            Ok(None) => None,
            Err(e) => {
                self.pos = self.src.len();
                Some(Err(e))
            }
        }
    }
}

fn finish<'a>(owned: Option<String>, tail: &'a str) -> Cow<'a, str> {
    match owned {
        Some(mut buf) => {
            buf.push_str(tail);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(tail),
    }
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

/// Tokenize the whole input.
pub fn tokenize(src: &str) -> Result<Vec<Spanned<'_>>> {
    Lexer::new(src).collect()
}

/// Split a script into statements on top-level semicolons.
///
/// Each returned slice starts at the statement's first token and excludes
/// the terminating semicolon. Empty statements are dropped.
pub fn split_statements(src: &str) -> Result<Vec<&str>> {
    let mut statements = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for tok in Lexer::new(src) {
        let tok = tok?;
        if tok.token == Token::Semicolon {
            if let Some((start, end)) = current.take() {
                statements.push(&src[start..end]);
            }
            continue;
        }
        current = Some(match current {
            Some((start, _)) => (start, tok.end),
            None => (tok.start, tok.end),
        });
    }
    if let Some((start, end)) = current {
        statements.push(&src[start..end]);
    }

    Ok(statements)
}
