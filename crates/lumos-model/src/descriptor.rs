//! Target descriptors: which methods receive call-site metadata
//!
//! A descriptor names an owner (fully qualified, simple, or a Kotlin package
//! for top-level functions), a method name and the parameter types as written
//! in source. Textual form:
//!
//! ```text
//! com.example.JavaExample.targetMethodInJava(int)
//! JavaExample.targetMethodInJava(int)
//! com.example.greet(kotlin.String, Int?)
//! com.example.Service.reset          # no parameter list: no parameters
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;
use crate::lexer::{tokenize, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DescriptorRepr", into = "String")]
pub struct TargetDescriptor {
    owner: String,
    method: String,
    params: Vec<String>,
}

/// Accepted configuration shapes
#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorRepr {
    Text(String),
    Table {
        #[serde(rename = "type")]
        owner: String,
        method: String,
        #[serde(default)]
        params: Vec<String>,
    },
}

impl TryFrom<DescriptorRepr> for TargetDescriptor {
    type Error = DescriptorError;

    fn try_from(repr: DescriptorRepr) -> Result<Self, Self::Error> {
        match repr {
            DescriptorRepr::Text(text) => text.parse(),
            DescriptorRepr::Table { owner, method, params } => {
                TargetDescriptor::new(owner, method, params)
            }
        }
    }
}

impl From<TargetDescriptor> for String {
    fn from(d: TargetDescriptor) -> String {
        d.to_string()
    }
}

impl TargetDescriptor {
    pub fn new(
        owner: impl Into<String>,
        method: impl Into<String>,
        params: Vec<String>,
    ) -> Result<Self, DescriptorError> {
        let owner = owner.into().trim().to_string();
        let method = method.into().trim().to_string();
        if owner.is_empty() {
            return Err(DescriptorError::EmptyPart("owner"));
        }
        if method.is_empty() {
            return Err(DescriptorError::EmptyPart("method name"));
        }
        let params: Vec<String> = params.into_iter().map(|p| p.trim().to_string()).collect();
        if params.iter().any(String::is_empty) {
            return Err(DescriptorError::EmptyPart("parameter type"));
        }
        Ok(Self { owner, method, params })
    }

    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        Parser::new(text).parse()
    }

    /// Owner as written (`com.example.Foo`, `Foo` or a package)
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.owner, self.method, self.params.join(","))
    }
}

impl FromStr for TargetDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: tokenize(source),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn unexpected(&self, token: Token) -> DescriptorError {
        DescriptorError::UnexpectedToken {
            text: self.source.to_string(),
            found: token.text(self.source).to_string(),
            offset: token.start,
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, DescriptorError> {
        match self.peek() {
            Some(t) if t.kind == kind => {
                self.pos += 1;
                Ok(t)
            }
            Some(t) => Err(self.unexpected(t)),
            None => Err(DescriptorError::UnexpectedEnd(self.source.to_string())),
        }
    }

    fn parse(mut self) -> Result<TargetDescriptor, DescriptorError> {
        if self.tokens.is_empty() {
            return Err(DescriptorError::Empty);
        }

        let mut path = vec![self.expect(TokenKind::Ident)?.text(self.source)];
        while self.peek().map(|t| t.kind) == Some(TokenKind::Dot) {
            self.pos += 1;
            path.push(self.expect(TokenKind::Ident)?.text(self.source));
        }
        if path.len() < 2 {
            return Err(DescriptorError::MissingOwner(self.source.to_string()));
        }
        let method = path.pop().unwrap_or_default().to_string();
        let owner = path.join(".");

        let mut params = Vec::new();
        if self.peek().is_some() {
            self.expect(TokenKind::LParen)?;
            if self.peek().map(|t| t.kind) == Some(TokenKind::RParen) {
                self.pos += 1;
            } else {
                loop {
                    params.push(self.parse_type()?);
                    match self.peek() {
                        Some(t) if t.kind == TokenKind::Comma => self.pos += 1,
                        Some(t) if t.kind == TokenKind::RParen => {
                            self.pos += 1;
                            break;
                        }
                        Some(t) => return Err(self.unexpected(t)),
                        None => return Err(DescriptorError::UnexpectedEnd(self.source.to_string())),
                    }
                }
            }
        }
        if let Some(t) = self.peek() {
            return Err(self.unexpected(t));
        }

        TargetDescriptor::new(owner, method, params)
    }

    /// One parameter type, returned as its source text
    fn parse_type(&mut self) -> Result<String, DescriptorError> {
        let start = match self.peek() {
            Some(t) => t.start,
            None => return Err(DescriptorError::UnexpectedEnd(self.source.to_string())),
        };
        let mut end = start;
        let mut depth = 0usize;

        while let Some(t) = self.peek() {
            match t.kind {
                TokenKind::Comma | TokenKind::RParen if depth == 0 => break,
                TokenKind::LAngle => depth += 1,
                TokenKind::RAngle => {
                    if depth == 0 {
                        return Err(self.unexpected(t));
                    }
                    depth -= 1;
                }
                TokenKind::LParen | TokenKind::Error => return Err(self.unexpected(t)),
                _ => {}
            }
            end = t.end;
            self.pos += 1;
        }

        if depth != 0 {
            return Err(DescriptorError::UnexpectedEnd(self.source.to_string()));
        }
        if end == start {
            return match self.peek() {
                Some(t) => Err(self.unexpected(t)),
                None => Err(DescriptorError::UnexpectedEnd(self.source.to_string())),
            };
        }
        Ok(self.source[start..end].to_string())
    }
}
