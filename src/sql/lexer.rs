//! # SQL Lexer
//!
//! Zero-copy tokenizer: identifier and string tokens borrow from the
//! input, keywords resolve through a compile-time perfect hash map
//! (`phf`), and `--` comments are skipped. Keywords and identifiers are
//! case-insensitive; the keyword map stores uppercase and lookups go
//! through an on-stack uppercase buffer to avoid allocation for any
//! reasonable identifier length.

use eyre::{bail, Result};
use phf::phf_map;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Table,
    From,
    Where,
    Order,
    By,
    Asc,
    Desc,
    Into,
    Values,
    Set,
    And,
    Or,
    Not,
    Begin,
    Commit,
    Rollback,
    Int,
    Integer,
    Bigint,
    Smallint,
    Tinyint,
    Text,
    Char,
    Float,
    Double,
    Real,
}

static KEYWORDS: phf::Map<&'static str, Keyword> = phf_map! {
    "SELECT" => Keyword::Select,
    "INSERT" => Keyword::Insert,
    "UPDATE" => Keyword::Update,
    "DELETE" => Keyword::Delete,
    "CREATE" => Keyword::Create,
    "DROP" => Keyword::Drop,
    "TABLE" => Keyword::Table,
    "FROM" => Keyword::From,
    "WHERE" => Keyword::Where,
    "ORDER" => Keyword::Order,
    "BY" => Keyword::By,
    "ASC" => Keyword::Asc,
    "DESC" => Keyword::Desc,
    "INTO" => Keyword::Into,
    "VALUES" => Keyword::Values,
    "SET" => Keyword::Set,
    "AND" => Keyword::And,
    "OR" => Keyword::Or,
    "NOT" => Keyword::Not,
    "BEGIN" => Keyword::Begin,
    "COMMIT" => Keyword::Commit,
    "ROLLBACK" => Keyword::Rollback,
    "INT" => Keyword::Int,
    "INTEGER" => Keyword::Integer,
    "BIGINT" => Keyword::Bigint,
    "SMALLINT" => Keyword::Smallint,
    "TINYINT" => Keyword::Tinyint,
    "TEXT" => Keyword::Text,
    "CHAR" => Keyword::Char,
    "FLOAT" => Keyword::Float,
    "DOUBLE" => Keyword::Double,
    "REAL" => Keyword::Real,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Keyword(Keyword),
    Ident(&'a str),
    Int(i64),
    Str(&'a str),
    LParen,
    RParen,
    Comma,
    Semicolon,
    Star,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Lexer<'a> {
        Lexer { input, pos: 0 }
    }

    /// Byte offset of the next unread character; used by the parser to
    /// slice out per-statement source text.
    pub fn offset(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if trimmed.starts_with("--") {
                match trimmed.find('\n') {
                    Some(nl) => self.pos += nl + 1,
                    None => self.pos = self.input.len(),
                }
            } else {
                return;
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token<'a>> {
        self.skip_whitespace_and_comments();
        let rest = self.rest();
        let Some(c) = rest.chars().next() else {
            return Ok(Token::Eof);
        };

        match c {
            '(' => {
                self.pos += 1;
                Ok(Token::LParen)
            }
            ')' => {
                self.pos += 1;
                Ok(Token::RParen)
            }
            ',' => {
                self.pos += 1;
                Ok(Token::Comma)
            }
            ';' => {
                self.pos += 1;
                Ok(Token::Semicolon)
            }
            '*' => {
                self.pos += 1;
                Ok(Token::Star)
            }
            '=' => {
                self.pos += 1;
                Ok(Token::Eq)
            }
            '!' => {
                if rest.starts_with("!=") {
                    self.pos += 2;
                    Ok(Token::Ne)
                } else {
                    bail!("unexpected character '!' (expected '!=')")
                }
            }
            '<' => {
                if rest.starts_with("<=") {
                    self.pos += 2;
                    Ok(Token::Le)
                } else if rest.starts_with("<>") {
                    self.pos += 2;
                    Ok(Token::Ne)
                } else {
                    self.pos += 1;
                    Ok(Token::Lt)
                }
            }
            '>' => {
                if rest.starts_with(">=") {
                    self.pos += 2;
                    Ok(Token::Ge)
                } else {
                    self.pos += 1;
                    Ok(Token::Gt)
                }
            }
            '\'' => {
                let body = &rest[1..];
                match body.find('\'') {
                    Some(end) => {
                        let s = &body[..end];
                        self.pos += end + 2;
                        Ok(Token::Str(s))
                    }
                    None => bail!("unterminated string literal"),
                }
            }
            '-' | '0'..='9' => {
                let negative = c == '-';
                let digits_start = if negative { 1 } else { 0 };
                let end = rest[digits_start..]
                    .find(|ch: char| !ch.is_ascii_digit())
                    .map(|i| i + digits_start)
                    .unwrap_or(rest.len());
                if end == digits_start {
                    bail!("unexpected character '-'");
                }
                let text = &rest[..end];
                let value: i64 = text
                    .parse()
                    .map_err(|e| eyre::eyre!("bad integer literal '{text}': {e}"))?;
                self.pos += end;
                Ok(Token::Int(value))
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let end = rest
                    .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                    .unwrap_or(rest.len());
                let word = &rest[..end];
                self.pos += end;

                let mut upper = [0u8; 32];
                if word.len() <= upper.len() {
                    for (i, b) in word.bytes().enumerate() {
                        upper[i] = b.to_ascii_uppercase();
                    }
                    let upper = std::str::from_utf8(&upper[..word.len()])?;
                    if let Some(kw) = KEYWORDS.get(upper) {
                        return Ok(Token::Keyword(*kw));
                    }
                }
                Ok(Token::Ident(word))
            }
            other => bail!("unexpected character '{other}'"),
        }
    }
}
