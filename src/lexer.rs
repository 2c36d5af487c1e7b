//! Lexer for run filter expressions.

use std::fmt;

use crate::token::{Token, TokenKind};

/// A character sequence the lexer could not turn into a token.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    /// Byte offset where the offending input starts.
    pub position: usize,
}

impl LexError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at pos {}", self.message, self.position)
    }
}

impl std::error::Error for LexError {}

pub struct Lexer<'a> {
    input: &'a str,
    /// Current byte offset into the input.
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        self.input[self.position..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn eat_digits(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Reads `-?[0-9]+(\.[0-9]+)?`. A leading `-` has already been consumed
    /// when present.
    fn read_number(&mut self, start: usize) -> Result<Token<'a>, LexError> {
        if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
            return Err(LexError::new("expected digit after '-'", start));
        }
        self.eat_digits();
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            self.eat_digits();
        }

        let literal = &self.input[start..self.position];
        let value = literal
            .parse::<f64>()
            .map_err(|e| LexError::new(format!("invalid number '{}': {}", literal, e), start))?;
        Ok(Token::new(TokenKind::Number(value), start, self.position))
    }

    /// Reads a quoted run up to the matching delimiter. The opening delimiter
    /// has already been consumed; there is no escape processing.
    fn read_quoted(&mut self, start: usize, delimiter: char) -> Result<&'a str, LexError> {
        let content_start = self.position;
        loop {
            match self.bump() {
                Some(c) if c == delimiter => break,
                Some(_) => {}
                None => {
                    return Err(LexError::new(
                        format!("unterminated {} literal", delimiter),
                        start,
                    ))
                }
            }
        }
        Ok(&self.input[content_start..self.position - delimiter.len_utf8()])
    }

    /// Reads an identifier or keyword. A `.` continues the identifier only
    /// when it is followed by another word character, so `tags."key"` still
    /// yields a separate dot token.
    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        loop {
            match self.peek() {
                Some(c) if is_word_char(c) => {
                    self.bump();
                }
                Some('.') if self.peek_next().is_some_and(is_word_char) => {
                    self.bump();
                }
                _ => break,
            }
        }
        let literal = &self.input[start..self.position];
        Token::new(match_keyword(literal), start, self.position)
    }

    /// Runs the lexer to completion. The returned stream always ends with
    /// an `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token<'a>>, LexError> {
        let mut tokens = Vec::new();
        for token in self.by_ref() {
            tokens.push(token?);
        }
        tokens.push(Token::new(TokenKind::Eof, self.position, self.position));
        Ok(tokens)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn match_keyword(s: &str) -> TokenKind {
    match s.to_ascii_lowercase().as_str() {
        "and" => TokenKind::And,
        "in" => TokenKind::In,
        "not" => TokenKind::Not,
        "like" => TokenKind::Like,
        "ilike" => TokenKind::ILike,
        _ => TokenKind::Identifier(s),
    }
}

/// Convenience wrapper around [`Lexer::tokenize`].
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, LexError> {
    Lexer::new(input).tokenize()
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let start = self.position;

        let c = self.bump()?;

        let token = match c {
            '=' => Ok(Token::new(TokenKind::Equals, start, self.position)),
            '.' => Ok(Token::new(TokenKind::Dot, start, self.position)),
            ',' => Ok(Token::new(TokenKind::Comma, start, self.position)),
            '(' => Ok(Token::new(TokenKind::OpenParen, start, self.position)),
            ')' => Ok(Token::new(TokenKind::CloseParen, start, self.position)),
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::new(TokenKind::LessEquals, start, self.position))
                } else {
                    Ok(Token::new(TokenKind::Less, start, self.position))
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::new(TokenKind::GreaterEquals, start, self.position))
                } else {
                    Ok(Token::new(TokenKind::Greater, start, self.position))
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::new(TokenKind::NotEquals, start, self.position))
                } else {
                    Err(LexError::new("expected '=' after '!'", start))
                }
            }
            '\'' | '"' => self
                .read_quoted(start, c)
                .map(|s| Token::new(TokenKind::String(s), start, self.position)),
            '`' => self
                .read_quoted(start, c)
                .map(|s| Token::new(TokenKind::QuotedIdentifier(s), start, self.position)),
            '-' => self.read_number(start),
            c if c.is_ascii_digit() => {
                // Rewind so `read_number` sees the first digit.
                self.position = start;
                self.read_number(start)
            }
            c if c.is_ascii_alphabetic() || c == '_' => Ok(self.read_identifier(start)),
            other => Err(LexError::new(
                format!("unexpected character '{}'", other),
                start,
            )),
        };
        Some(token)
    }
}
