//! Parsers for backend type names and CREATE TABLE statements
//!
//! Type names go through the pest grammar in `types.pest`. Anything that
//! is not a known container (`Nullable`, `Array`, `Tuple`, `Nested`) is an
//! opaque scalar whose name keeps its parameter list verbatim.
//!
//! CREATE TABLE statements are scanned by hand: only the column list is
//! interpreted, the rest of the statement is kept as text.

use crate::types::{FieldType, RecordKind, RecordType, ScalarType, Type};
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;
use tracing::warn;

#[derive(Parser)]
#[grammar = "types.pest"]
struct TypeNameParser;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unexpected end of input, expected {0}")]
    UnexpectedEnd(String),

    #[error("Expected {expected} at offset {offset}, found '{found}'")]
    Expected {
        expected: String,
        offset: usize,
        found: String,
    },

    #[error("Invalid type name: {0}")]
    Type(#[from] pest::error::Error<Rule>),
}

/// Keywords that terminate a column's type text inside CREATE TABLE.
const COLUMN_KEYWORDS: &[&str] = &[
    "NULL",
    "NOT",
    "DEFAULT",
    "MATERIALIZED",
    "EPHEMERAL",
    "ALIAS",
    "CODEC",
    "TTL",
    "COMMENT",
];

/// Keywords that terminate a column default expression.
const EXPRESSION_KEYWORDS: &[&str] = &["CODEC", "TTL", "COMMENT"];

/// Table-level elements that end the column list.
const TABLE_ELEMENT_KEYWORDS: &[&str] = &["INDEX", "PROJECTION", "CONSTRAINT", "PRIMARY"];

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn error(&self, expected: &str) -> ParseError {
        let rest = self.rest();
        if rest.is_empty() {
            ParseError::UnexpectedEnd(expected.to_string())
        } else {
            ParseError::Expected {
                expected: expected.to_string(),
                offset: self.pos,
                found: rest.chars().take(20).collect(),
            }
        }
    }

    fn eat(&mut self, c: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: u8) -> Result<(), ParseError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(&format!("'{}'", c as char)))
        }
    }

    /// Case-insensitive keyword at a word boundary.
    fn peek_keyword(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        starts_with_keyword(self.rest(), keyword)
    }

    fn keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(keyword))
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("identifier"));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    /// Bare identifier or one quoted with `"` or backticks.
    fn name(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some(quote @ (b'"' | b'`')) => self.quoted(quote),
            _ => self.ident(),
        }
    }

    /// Quoted text with backslash escapes and doubled-quote escapes.
    fn quoted(&mut self, quote: u8) -> Result<String, ParseError> {
        self.skip_ws();
        if self.peek() != Some(quote) {
            return Err(self.error(&format!("{}", quote as char)));
        }
        self.pos += 1;
        let mut out: Vec<u8> = Vec::new();
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() {
            let b = bytes[self.pos];
            if b == b'\\' && self.pos + 1 < bytes.len() {
                out.push(bytes[self.pos + 1]);
                self.pos += 2;
            } else if b == quote {
                if bytes.get(self.pos + 1) == Some(&quote) {
                    out.push(quote);
                    self.pos += 2;
                } else {
                    self.pos += 1;
                    return Ok(String::from_utf8_lossy(&out).into_owned());
                }
            } else {
                out.push(b);
                self.pos += 1;
            }
        }
        Err(ParseError::UnexpectedEnd(format!("closing {}", quote as char)))
    }

    /// Consumes a parenthesized group and returns its inner text verbatim.
    fn balanced(&mut self) -> Result<String, ParseError> {
        self.expect(b'(')?;
        let start = self.pos;
        let end = scan_until(self.src, self.pos, &[b')'], &[]);
        if end >= self.src.len() {
            return Err(ParseError::UnexpectedEnd("')'".to_string()));
        }
        self.pos = end + 1;
        Ok(self.src[start..end].trim().to_string())
    }
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    if text.len() < keyword.len() || !text.is_char_boundary(keyword.len()) {
        return false;
    }
    if !text[..keyword.len()].eq_ignore_ascii_case(keyword) {
        return false;
    }
    match text.as_bytes().get(keyword.len()) {
        Some(b) => !(b.is_ascii_alphanumeric() || *b == b'_'),
        None => true,
    }
}

/// Scans from `start` to the first depth-zero byte in `stops`, or the first
/// depth-zero keyword in `keywords` that follows whitespace. Quoted text is
/// skipped. Returns the stop offset (or the input length).
fn scan_until(src: &str, start: usize, stops: &[u8], keywords: &[&str]) -> usize {
    let bytes = src.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' | b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'(' => depth += 1,
            b')' if depth > 0 => depth -= 1,
            _ if depth == 0 && stops.contains(&b) => return i,
            _ if depth == 0
                && i > start
                && bytes[i - 1].is_ascii_whitespace()
                && keywords.iter().any(|k| starts_with_keyword(&src[i..], k)) =>
            {
                return i;
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Parses a complete type name.
pub fn parse_type(text: &str) -> Result<Type, ParseError> {
    let mut pairs = TypeNameParser::parse(Rule::type_name, text)?;
    let root = next_pair(&mut pairs, "type name")?;
    build_type(next_pair(&mut root.into_inner(), "type")?)
}

/// Like [`parse_type`], substituting `Unknown(<text>)` on failure.
pub fn parse_type_or_unknown(text: &str) -> Type {
    match parse_type(text) {
        Ok(ty) => ty,
        Err(e) => {
            warn!(type_text = %text, error = %e, "unparseable type, using Unknown");
            Type::unknown(text)
        }
    }
}

fn next_pair<'a>(pairs: &mut Pairs<'a, Rule>, expected: &str) -> Result<Pair<'a, Rule>, ParseError> {
    pairs
        .next()
        .ok_or_else(|| ParseError::UnexpectedEnd(expected.to_string()))
}

fn build_type(pair: Pair<'_, Rule>) -> Result<Type, ParseError> {
    let rule = pair.as_rule();
    let offset = pair.as_span().start();
    let text = pair.as_str();
    let mut inner = pair.into_inner();

    match rule {
        Rule::nullable => {
            let ty = build_type(next_pair(&mut inner, "type")?)?;
            if !ty.is_scalar() {
                warn!(inner = %ty, "Nullable around a container, pushing nullability to leaves");
            }
            Ok(ty.into_nullable())
        }
        Rule::array => Ok(Type::array(build_type(next_pair(&mut inner, "type")?)?)),
        Rule::record => {
            let kind = match next_pair(&mut inner, "Tuple or Nested")?.as_str() {
                "Nested" => RecordKind::Nested,
                _ => RecordKind::Tuple,
            };
            let fields = inner
                .enumerate()
                .map(|(i, field)| build_field(field, i + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Type::Record(RecordType { kind, fields }))
        }
        Rule::scalar => {
            let name = next_pair(&mut inner, "identifier")?.as_str();
            Ok(match inner.next() {
                Some(params) => Type::Scalar(ScalarType {
                    name: format!("{}({})", name, params.as_str().trim()),
                    nullable: false,
                }),
                None => Type::scalar(name),
            })
        }
        _ => Err(ParseError::Expected {
            expected: "type".to_string(),
            offset,
            found: text.to_string(),
        }),
    }
}

/// A named field, or an unnamed element named by its 1-based position.
fn build_field(pair: Pair<'_, Rule>, position: usize) -> Result<FieldType, ParseError> {
    let mut inner = pair.into_inner();
    let first = next_pair(&mut inner, "field")?;
    if first.as_rule() != Rule::field_name {
        return Ok(FieldType {
            name: position.to_string(),
            ty: build_type(first)?,
        });
    }

    let name = field_name(next_pair(&mut first.into_inner(), "field name")?)?;
    let ty = build_type(next_pair(&mut inner, "field type")?)?;
    Ok(FieldType { name, ty })
}

fn field_name(pair: Pair<'_, Rule>) -> Result<String, ParseError> {
    let quote = match pair.as_rule() {
        Rule::double_quoted => '"',
        Rule::backquoted => '`',
        _ => return Ok(pair.as_str().to_string()),
    };
    let text = next_pair(&mut pair.into_inner(), "quoted name")?.as_str();
    Ok(unescape(text, quote))
}

/// Resolves backslash escapes and doubled quotes.
fn unescape(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else if c == quote && chars.peek() == Some(&quote) {
            chars.next();
            out.push(quote);
        } else {
            out.push(c);
        }
    }
    out
}

/// One column of a parsed CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub ty: Type,
    /// Everything after the type (DEFAULT, CODEC, TTL...) except the comment
    pub modifiers: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableDefinition {
    pub database: Option<String>,
    pub name: String,
    pub cluster: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    /// ENGINE / ORDER BY / SETTINGS and anything else, verbatim
    pub tail: String,
}

/// Parses a CREATE TABLE statement. Unparseable column types become
/// `Unknown(<text>)`; only a malformed statement structure is an error.
pub fn parse_create_table(query: &str) -> Result<CreateTableDefinition, ParseError> {
    let mut cursor = Cursor::new(query);
    cursor.expect_keyword("CREATE")?;
    cursor.expect_keyword("TABLE")?;
    if cursor.keyword("IF") {
        cursor.expect_keyword("NOT")?;
        cursor.expect_keyword("EXISTS")?;
    }

    let first = cursor.name()?;
    let (database, name) = if cursor.eat(b'.') {
        (Some(first), cursor.name()?)
    } else {
        (None, first)
    };

    let cluster = if cursor.keyword("ON") {
        cursor.expect_keyword("CLUSTER")?;
        Some(cursor.name()?)
    } else {
        None
    };

    cursor.expect(b'(')?;
    let mut columns = Vec::new();
    loop {
        cursor.skip_ws();
        if cursor.eat(b')') {
            break;
        }
        if TABLE_ELEMENT_KEYWORDS
            .iter()
            .any(|k| cursor.peek_keyword(k))
        {
            // index and constraint definitions are not columns
            let end = scan_until(query, cursor.pos, &[b')'], &[]);
            if end >= query.len() {
                return Err(ParseError::UnexpectedEnd("')'".to_string()));
            }
            cursor.pos = end + 1;
            break;
        }
        columns.push(parse_column(&mut cursor)?);
        if cursor.eat(b',') {
            continue;
        }
        cursor.expect(b')')?;
        break;
    }

    Ok(CreateTableDefinition {
        database,
        name,
        cluster,
        columns,
        tail: cursor.rest().trim().to_string(),
    })
}

fn parse_column(cursor: &mut Cursor<'_>) -> Result<ColumnDefinition, ParseError> {
    let name = cursor.name()?;
    cursor.skip_ws();

    let type_end = scan_until(cursor.src, cursor.pos, b",)", COLUMN_KEYWORDS);
    let type_text = cursor.src[cursor.pos..type_end].trim();
    if type_text.is_empty() {
        return Err(cursor.error("column type"));
    }
    let ty = parse_type_or_unknown(type_text);
    cursor.pos = type_end;

    let mut modifiers: Vec<String> = Vec::new();
    let mut comment = None;
    loop {
        if cursor.keyword("NOT") {
            cursor.expect_keyword("NULL")?;
            modifiers.push("NOT NULL".to_string());
        } else if cursor.keyword("NULL") {
            modifiers.push("NULL".to_string());
        } else if let Some(kind) = ["DEFAULT", "MATERIALIZED", "EPHEMERAL", "ALIAS", "TTL"]
            .into_iter()
            .find(|k| cursor.keyword(k))
        {
            cursor.skip_ws();
            let end = scan_until(cursor.src, cursor.pos, b",)", EXPRESSION_KEYWORDS);
            let expr = cursor.src[cursor.pos..end].trim();
            modifiers.push(if expr.is_empty() {
                kind.to_string()
            } else {
                format!("{} {}", kind, expr)
            });
            cursor.pos = end;
        } else if cursor.keyword("CODEC") {
            let codec = cursor.balanced()?;
            modifiers.push(format!("CODEC({})", codec));
        } else if cursor.keyword("COMMENT") {
            comment = Some(cursor.quoted(b'\'')?);
        } else {
            break;
        }
    }

    Ok(ColumnDefinition {
        name,
        ty,
        modifiers: modifiers.join(" "),
        comment,
    })
}
