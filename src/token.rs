//! The token definition for the run filter language.

use std::fmt;

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind<'a>, start: usize, end: usize) -> Self {
        Self {
            kind,
            span: Span::new(start, end),
        }
    }
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Keywords
    And,   // "AND"
    In,    // "IN"
    Not,   // "NOT"
    Like,  // "LIKE"
    ILike, // "ILIKE"

    // Literals
    /// A bare word, possibly dotted: `metrics.accuracy`, `status`.
    Identifier(&'a str),
    /// A back-tick quoted word; the content is kept verbatim.
    QuotedIdentifier(&'a str),
    /// A single- or double-quoted string, without its quotes.
    String(&'a str),
    Number(f64),

    // Punctuation
    Dot,        // .
    Comma,      // ,
    OpenParen,  // (
    CloseParen, // )

    // Operators
    Equals,        // =
    NotEquals,     // !=
    Less,          // <
    LessEquals,    // <=
    Greater,       // >
    GreaterEquals, // >=

    Eof,
}

impl fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::And => write!(f, "AND"),
            TokenKind::In => write!(f, "IN"),
            TokenKind::Not => write!(f, "NOT"),
            TokenKind::Like => write!(f, "LIKE"),
            TokenKind::ILike => write!(f, "ILIKE"),
            TokenKind::Identifier(s) => write!(f, "IDENTIFIER({})", s),
            TokenKind::QuotedIdentifier(s) => write!(f, "IDENTIFIER(`{}`)", s),
            TokenKind::String(s) => write!(f, "STRING('{}')", s),
            TokenKind::Number(n) => write!(f, "NUMBER({})", n),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::OpenParen => write!(f, "'('"),
            TokenKind::CloseParen => write!(f, "')'"),
            TokenKind::Equals => write!(f, "'='"),
            TokenKind::NotEquals => write!(f, "'!='"),
            TokenKind::Less => write!(f, "'<'"),
            TokenKind::LessEquals => write!(f, "'<='"),
            TokenKind::Greater => write!(f, "'>'"),
            TokenKind::GreaterEquals => write!(f, "'>='"),
            TokenKind::Eof => write!(f, "EOF"),
        }
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
