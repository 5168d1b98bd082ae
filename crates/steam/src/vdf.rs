//! Text VDF (Valve KeyValues) parsing and writing.
//!
//! Used for `libraryfolders.vdf` and `appmanifest_*.acf`. The format is a
//! tree of quoted `"key" "value"` pairs and `"key" { ... }` sections.
//! Parsing keeps an explicit stack of open sections instead of recursing,
//! so nesting depth is limited only by memory.

use std::fmt;
use std::mem;

use indexmap::IndexMap;
use serde::Serialize;

/// A value in a [`Record`]: either a string or a nested record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Record(Record),
}

impl Value {
    /// Returns the string if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Record(_) => None,
        }
    }

    /// Returns the nested record if this is a record value.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            Value::String(_) => None,
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

/// An ordered set of key/value pairs at one nesting level.
///
/// Keys are case-sensitive. Inserting an existing key replaces its value
/// but keeps the key at its first position.
///
/// Dropping, cloning and comparing walk the tree with a heap stack, so a
/// deeply nested record is safe to handle. `Debug` and `Serialize` still
/// recurse once per level; check [`Record::depth`] before serializing a
/// tree built from untrusted input.
#[derive(Debug, Default, Serialize)]
#[serde(transparent)]
pub struct Record {
    entries: IndexMap<String, Value>,
}

impl Drop for Record {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let mut pending = vec![mem::take(&mut self.entries)];
        while let Some(entries) = pending.pop() {
            for (_, value) in entries {
                if let Value::Record(mut child) = value {
                    pending.push(mem::take(&mut child.entries));
                }
            }
        }
    }
}

impl Clone for Record {
    fn clone(&self) -> Self {
        // Each frame: key in the parent copy, source entries left, copy so far.
        let mut stack = vec![(None, self.entries.iter(), Record::new())];
        while let Some((_, source, copy)) = stack.last_mut() {
            match source.next() {
                Some((key, Value::String(s))) => {
                    copy.entries.insert(key.clone(), Value::String(s.clone()));
                }
                Some((key, Value::Record(child))) => {
                    stack.push((Some(key), child.entries.iter(), Record::new()));
                }
                None => {
                    let Some((key, _, done)) = stack.pop() else {
                        break;
                    };
                    match (key, stack.last_mut()) {
                        (Some(key), Some((_, _, parent))) => {
                            parent.entries.insert(key.clone(), Value::Record(done));
                        }
                        _ => return done,
                    }
                }
            }
        }
        Record::new()
    }
}

// Order-sensitive, unlike IndexMap's own equality.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.entries.len() != b.entries.len() {
                return false;
            }
            for ((ka, va), (kb, vb)) in a.entries.iter().zip(b.entries.iter()) {
                if ka != kb {
                    return false;
                }
                match (va, vb) {
                    (Value::String(x), Value::String(y)) if x == y => {}
                    (Value::Record(x), Value::Record(y)) => stack.push((x, y)),
                    _ => return false,
                }
            }
        }
        true
    }
}

impl Eq for Record {}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a key/value pair, returning the previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Removes a key, shifting later keys down so order is kept.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    /// Number of nested record levels, counting this one.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1)];
        while let Some((record, depth)) = stack.pop() {
            max = max.max(depth);
            for value in record.entries.values() {
                if let Value::Record(child) = value {
                    stack.push((child, depth + 1));
                }
            }
        }
        max
    }

    /// Looks up a key ignoring ASCII case. Exact matches win.
    pub fn get_ignore_case(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).or_else(|| {
            self.entries
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_record(&self, key: &str) -> Option<&Record> {
        self.get(key).and_then(Value::as_record)
    }

    /// Parses a string value as `i64`. Absent or non-numeric yields `None`.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_str(key).and_then(|s| s.trim().parse().ok())
    }

    /// Parses a string value as `u64`. Absent or non-numeric yields `None`.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_str(key).and_then(|s| s.trim().parse().ok())
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_text(self))
    }
}

/// A text VDF syntax error with the 1-based position where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("VDF parse error at line {line}, column {column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("unterminated quoted string")]
    UnterminatedString,

    #[error("unterminated conditional tag")]
    UnterminatedConditional,

    #[error("unexpected '}}' with no open section")]
    UnexpectedCloseBrace,

    #[error("'{{' without a preceding key")]
    UnexpectedOpenBrace,

    #[error("{depth} section(s) left open at end of input")]
    UnclosedBrace { depth: usize },

    #[error("key {key:?} has no value")]
    MissingValue { key: String },
}

#[derive(Debug, PartialEq)]
enum Token {
    Str(String),
    Open,
    Close,
    /// Platform conditional such as `[$WIN32]`; ignored.
    Conditional,
}

struct Spanned {
    token: Token,
    line: usize,
    column: usize,
}

struct Lexer<'a> {
    text: &'a str,
    /// Byte offset into `text`.
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text: text.strip_prefix('\u{feff}').unwrap_or(text),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, column: usize, kind: ParseErrorKind) -> ParseError {
        ParseError { line, column, kind }
    }

    /// Skips whitespace and `//` comments.
    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '/' && self.peek_next() == Some('/') {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Spanned>, ParseError> {
        self.skip_trivia();
        let (line, column) = (self.line, self.column);
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let token = match c {
            '{' => {
                self.bump();
                Token::Open
            }
            '}' => {
                self.bump();
                Token::Close
            }
            '"' => {
                self.bump();
                Token::Str(self.quoted(line, column)?)
            }
            '[' => {
                self.conditional(line, column)?;
                Token::Conditional
            }
            _ => Token::Str(self.bare()),
        };

        Ok(Some(Spanned {
            token,
            line,
            column,
        }))
    }

    /// Reads the rest of a quoted string; the opening quote is consumed.
    fn quoted(&mut self, line: usize, column: usize) -> Result<String, ParseError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(line, column, ParseErrorKind::UnterminatedString)),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    None => {
                        return Err(self.error(line, column, ParseErrorKind::UnterminatedString));
                    }
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn conditional(&mut self, line: usize, column: usize) -> Result<(), ParseError> {
        while let Some(c) = self.bump() {
            if c == ']' {
                return Ok(());
            }
            if c == '\n' {
                break;
            }
        }
        Err(self.error(line, column, ParseErrorKind::UnterminatedConditional))
    }

    fn bare(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '"' | '{' | '}') {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }
}

/// An open section on the parse stack.
struct Frame {
    key: String,
    parent: Record,
    line: usize,
    column: usize,
}

/// Parses text VDF into a [`Record`].
///
/// Fails on unterminated strings, unbalanced braces, or a key with no
/// value. No partial record is returned on failure.
pub fn parse(text: &str) -> Result<Record, ParseError> {
    let mut lexer = Lexer::new(text);
    let mut stack: Vec<Frame> = Vec::new();
    let mut current = Record::new();
    let mut pending: Option<(String, usize, usize)> = None;

    while let Some(Spanned {
        token,
        line,
        column,
    }) = lexer.next_token()?
    {
        match token {
            Token::Str(s) => match pending.take() {
                Some((key, _, _)) => {
                    current.insert(key, Value::String(s));
                }
                None => pending = Some((s, line, column)),
            },
            Token::Open => {
                let Some((key, _, _)) = pending.take() else {
                    return Err(lexer.error(line, column, ParseErrorKind::UnexpectedOpenBrace));
                };
                stack.push(Frame {
                    key,
                    parent: mem::take(&mut current),
                    line,
                    column,
                });
            }
            Token::Close => {
                if let Some((key, kline, kcol)) = pending.take() {
                    return Err(lexer.error(kline, kcol, ParseErrorKind::MissingValue { key }));
                }
                let Some(frame) = stack.pop() else {
                    return Err(lexer.error(line, column, ParseErrorKind::UnexpectedCloseBrace));
                };
                let child = mem::replace(&mut current, frame.parent);
                current.insert(frame.key, Value::Record(child));
            }
            Token::Conditional => {}
        }
    }

    if let Some((key, line, column)) = pending {
        return Err(lexer.error(line, column, ParseErrorKind::MissingValue { key }));
    }
    if let Some(innermost) = stack.last() {
        return Err(lexer.error(
            innermost.line,
            innermost.column,
            ParseErrorKind::UnclosedBrace { depth: stack.len() },
        ));
    }

    Ok(current)
}

/// Writes a [`Record`] as tab-indented text VDF that [`parse`] reads back
/// to an equal record.
pub fn to_text(record: &Record) -> String {
    let mut out = String::new();
    // One iterator per open section; depth is the stack height minus one.
    let mut stack = vec![record.entries.iter()];

    while !stack.is_empty() {
        let depth = stack.len() - 1;
        let next = stack[depth].next();
        match next {
            Some((key, Value::String(s))) => {
                indent(&mut out, depth);
                write_quoted(&mut out, key);
                out.push_str("\t\t");
                write_quoted(&mut out, s);
                out.push('\n');
            }
            Some((key, Value::Record(child))) => {
                indent(&mut out, depth);
                write_quoted(&mut out, key);
                out.push('\n');
                indent(&mut out, depth);
                out.push_str("{\n");
                stack.push(child.entries.iter());
            }
            None => {
                stack.pop();
                if depth > 0 {
                    indent(&mut out, depth - 1);
                    out.push_str("}\n");
                }
            }
        }
    }

    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}
