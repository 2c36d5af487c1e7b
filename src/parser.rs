//! Recursive-descent parser for run filter expressions.
//!
//! ## Parse flow
//!
//! ```text
//! parse()
//!   ├─ EOF → empty AndExpr
//!   └─ parse_compare() ( AND parse_compare() )* EOF
//!        ├─ parse_identifier()
//!        │    ├─ word '.' (word | `quoted` | "string")
//!        │    ├─ dotted.word          → split at the first '.'
//!        │    └─ word | `quoted`      → bare key
//!        ├─ [NOT] IN → parse_in_list()   '(' STRING (',' STRING)* ')'
//!        └─ operator → parse_value()     NUMBER | STRING
//! ```
//!
//! ## Grammar
//!
//! ```text
//! Filter   ::= Compare ( AND Compare )* EOF | EOF
//! Compare  ::= Ident ( InTail | OpTail )
//! InTail   ::= (NOT)? IN '(' String (',' String)* ')'
//! OpTail   ::= Op Value
//! Op       ::= '=' | '!=' | '<' | '<=' | '>' | '>=' | LIKE | ILIKE
//! Ident    ::= Word ('.' (Word | String))?
//! Value    ::= Number | String
//! ```
//!
//! ## Examples
//!
//! ```text
//! metrics.accuracy > 0.72
//! params.batch_size = '2' AND tags."mlflow.source.name" LIKE '%train%'
//! attributes.run_id NOT IN ('a1b2', 'c3d4')
//! ```

use std::fmt;

use crate::ast::{AndExpr, CompareExpr, Identifier, OperatorKind, Value};
use crate::token::{Span, Token, TokenKind};

pub struct Parser<'a> {
    tokens: &'a [Token<'a>],
    position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Option<Span>,
}

impl ParseError {
    fn new(message: String, span: Option<Span>) -> Self {
        Self { message, span }
    }

    fn at_position(message: String, span: Span) -> Self {
        Self {
            message,
            span: Some(span),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ParseError {}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token<'a>]) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    fn peek(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position)
    }

    fn peek_kind(&self) -> &'a TokenKind<'a> {
        self.peek().map(|t| &t.kind).unwrap_or(&TokenKind::Eof)
    }

    fn advance(&mut self) -> Option<&'a Token<'a>> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    fn match_token(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    /// Builds "expected X, got Y at pos P" for the current token.
    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::at_position(
                format!(
                    "expected {}, got {} at pos {}",
                    expected, token.kind, token.span.start
                ),
                token.span,
            ),
            None => ParseError::new(
                format!("expected {}, got end of input", expected),
                None,
            ),
        }
    }

    fn expect(&mut self, expected: TokenKind, description: &str) -> Result<&'a Token<'a>, ParseError> {
        if self.match_token(&expected) {
            self.advance().ok_or_else(|| self.unexpected(description))
        } else {
            Err(self.unexpected(description))
        }
    }

    pub fn parse(&mut self) -> Result<AndExpr, ParseError> {
        let mut exprs = Vec::new();

        if self.match_token(&TokenKind::Eof) || self.peek().is_none() {
            return Ok(AndExpr { exprs });
        }

        exprs.push(self.parse_compare()?);
        while self.match_token(&TokenKind::And) {
            self.advance();
            exprs.push(self.parse_compare()?);
        }

        if !self.match_token(&TokenKind::Eof) {
            return Err(self.unexpected("AND or end of input"));
        }

        Ok(AndExpr { exprs })
    }

    fn parse_compare(&mut self) -> Result<CompareExpr, ParseError> {
        let left = self.parse_identifier()?;

        match self.peek_kind() {
            TokenKind::In => {
                self.advance();
                let values = self.parse_in_list()?;
                Ok(CompareExpr {
                    left,
                    op: OperatorKind::In,
                    right: Value::StringList(values),
                })
            }
            TokenKind::Not => {
                self.advance();
                self.expect(TokenKind::In, "IN after NOT")?;
                let values = self.parse_in_list()?;
                Ok(CompareExpr {
                    left,
                    op: OperatorKind::NotIn,
                    right: Value::StringList(values),
                })
            }
            _ => {
                let op = self.parse_operator()?;
                let right = self.parse_value()?;
                Ok(CompareExpr { left, op, right })
            }
        }
    }

    fn parse_identifier(&mut self) -> Result<Identifier, ParseError> {
        let token = match self.peek() {
            Some(token) => token,
            None => return Err(self.unexpected("identifier")),
        };

        match &token.kind {
            TokenKind::Identifier(word) => {
                let word: &str = word;
                self.advance();
                if self.match_token(&TokenKind::Dot) {
                    if word.contains('.') {
                        return Err(self.unexpected("operator"));
                    }
                    self.advance();
                    let key = self.parse_key()?;
                    return Ok(Identifier::new(Some(word), key));
                }
                match word.split_once('.') {
                    Some((scope, key)) => Ok(Identifier::new(Some(scope), key)),
                    None => Ok(Identifier::new(None, word)),
                }
            }
            TokenKind::QuotedIdentifier(word) => {
                self.advance();
                Ok(Identifier::new(None, word))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// The part after `scope.`: a word, a back-ticked word or a string.
    fn parse_key(&mut self) -> Result<&'a str, ParseError> {
        match self.peek_kind() {
            TokenKind::Identifier(key) | TokenKind::QuotedIdentifier(key) | TokenKind::String(key) => {
                self.advance();
                Ok(*key)
            }
            _ => Err(self.unexpected("IDENTIFIER or STRING")),
        }
    }

    fn parse_operator(&mut self) -> Result<OperatorKind, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Equals => OperatorKind::Equals,
            TokenKind::NotEquals => OperatorKind::NotEquals,
            TokenKind::Less => OperatorKind::Less,
            TokenKind::LessEquals => OperatorKind::LessEquals,
            TokenKind::Greater => OperatorKind::Greater,
            TokenKind::GreaterEquals => OperatorKind::GreaterEquals,
            TokenKind::Like => OperatorKind::Like,
            TokenKind::ILike => OperatorKind::ILike,
            _ => return Err(self.unexpected("operator")),
        };
        self.advance();
        Ok(op)
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        let value = match self.peek_kind() {
            TokenKind::Number(n) => Value::Number(*n),
            TokenKind::String(s) => Value::String(s.to_string()),
            _ => return Err(self.unexpected("NUMBER or STRING")),
        };
        self.advance();
        Ok(value)
    }

    /// `'(' STRING (',' STRING)* ')'`; the keyword has been consumed.
    fn parse_in_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::OpenParen, "'('")?;

        let mut values = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::String(s) => {
                    values.push(s.to_string());
                    self.advance();
                }
                _ => return Err(self.unexpected("STRING")),
            }
            if self.match_token(&TokenKind::Comma) {
                self.advance();
                continue;
            }
            break;
        }

        self.expect(TokenKind::CloseParen, "')'")?;
        Ok(values)
    }
}

/// Lexes and parses `input` in one step; lexing failures are reported as
/// parse errors at the offending position.
pub fn parse(input: &str) -> Result<AndExpr, ParseError> {
    let tokens = crate::lexer::tokenize(input).map_err(|e| {
        ParseError::at_position(e.to_string(), Span::new(e.position, e.position + 1))
    })?;
    Parser::new(&tokens).parse()
}
