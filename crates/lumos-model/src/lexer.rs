//! Tokens of the textual target-descriptor syntax
//!
//! `com.example.Owner.method(int, java.lang.String[], List<String>?, String...)`

use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum TokenKind {
    #[token(".")]
    Dot,
    #[token("...")]
    Ellipsis,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("<")]
    LAngle,
    #[token(">")]
    RAngle,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("?")]
    Question,
    #[token("*")]
    Star,

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*")]
    Ident,

    Error,
}

impl TokenKind {
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Dot => "'.'",
            TokenKind::Ellipsis => "'...'",
            TokenKind::Comma => "','",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LAngle => "'<'",
            TokenKind::RAngle => "'>'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Question => "'?'",
            TokenKind::Star => "'*'",
            TokenKind::Ident => "identifier",
            TokenKind::Error => "invalid character",
        }
    }
}

/// A token with its byte range in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Tokenize a descriptor; unknown characters become [`TokenKind::Error`]
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut lexer = TokenKind::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let kind = result.unwrap_or(TokenKind::Error);
        tokens.push(Token {
            kind,
            start: span.start,
            end: span.end,
        });
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_descriptor_tokens() {
        assert_eq!(
            kinds("a.B.run(int, String...)"),
            vec![
                TokenKind::Ident,
                TokenKind::Dot,
                TokenKind::Ident,
                TokenKind::Dot,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::Ident,
                TokenKind::Comma,
                TokenKind::Ident,
                TokenKind::Ellipsis,
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_generic_and_nullable() {
        assert_eq!(
            kinds("List<Int>?[]"),
            vec![
                TokenKind::Ident,
                TokenKind::LAngle,
                TokenKind::Ident,
                TokenKind::RAngle,
                TokenKind::Question,
                TokenKind::LBracket,
                TokenKind::RBracket,
            ]
        );
    }

    #[test]
    fn test_invalid_character() {
        let tokens = tokenize("a#b");
        assert_eq!(tokens[1].kind, TokenKind::Error);
        assert_eq!(tokens[1].text("a#b"), "#");
    }
}
