use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    // Special
    Illegal,
    Eof,

    // Identifiers & literals
    Ident,
    Var,
    Int,
    Float,
    Str,

    // Operators & delimiters
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Dot,
    Comma,
    Colon,
    Semicolon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // Keywords
    Require,
    Eval,
    Undef,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenType::Illegal => "ILLEGAL",
            TokenType::Eof => "EOF",
            TokenType::Ident => "IDENT",
            TokenType::Var => "VAR",
            TokenType::Int => "INT",
            TokenType::Float => "FLOAT",
            TokenType::Str => "STRING",
            TokenType::Assign => "=",
            TokenType::Plus => "+",
            TokenType::Minus => "-",
            TokenType::Star => "*",
            TokenType::Slash => "/",
            TokenType::Dot => ".",
            TokenType::Comma => ",",
            TokenType::Colon => ":",
            TokenType::Semicolon => ";",
            TokenType::LParen => "(",
            TokenType::RParen => ")",
            TokenType::LBracket => "[",
            TokenType::RBracket => "]",
            TokenType::LBrace => "{",
            TokenType::RBrace => "}",
            TokenType::Require => "require",
            TokenType::Eval => "eval",
            TokenType::Undef => "undef",
        };
        write!(f, "{}", s)
    }
}

/// A lexed token. String literals carry their decoded bytes separately so
/// escape processing happens exactly once, in the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub literal: String,
    pub bytes: Option<Vec<u8>>,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(token_type: TokenType, literal: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            token_type,
            literal: literal.into(),
            bytes: None,
            line,
            column,
        }
    }

    pub fn string(bytes: Vec<u8>, line: usize, column: usize) -> Self {
        Self {
            token_type: TokenType::Str,
            literal: String::from_utf8_lossy(&bytes).into_owned(),
            bytes: Some(bytes),
            line,
            column,
        }
    }
}

pub fn lookup_ident(ident: &str) -> TokenType {
    match ident {
        "require" => TokenType::Require,
        "eval" => TokenType::Eval,
        "undef" => TokenType::Undef,
        _ => TokenType::Ident,
    }
}
