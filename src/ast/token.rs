//! Tokens produced by the fragment lexer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A line/column position inside one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Token kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Int(i64),

    // Keywords
    KwInt,
    KwBool,
    KwVoid,
    KwConst,
    KwExtern,
    KwInline,
    KwTemplate,
    KwStruct,
    KwVirtual,
    KwNamespace,
    KwReturn,
    KwIf,
    KwElse,
    KwWhile,
    KwTrue,
    KwFalse,
    KwSizeof,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Semi,
    Comma,
    PathSep,
    Lt,
    Gt,
    LtEq,
    GtEq,
    EqEq,
    NotEq,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
}

impl Token {
    /// Map an identifier to its keyword, if it is one.
    pub fn keyword(word: &str) -> Option<Token> {
        let kw = match word {
            "int" => Token::KwInt,
            "bool" => Token::KwBool,
            "void" => Token::KwVoid,
            "const" => Token::KwConst,
            "extern" => Token::KwExtern,
            "inline" => Token::KwInline,
            "template" => Token::KwTemplate,
            "struct" => Token::KwStruct,
            "virtual" => Token::KwVirtual,
            "namespace" => Token::KwNamespace,
            "return" => Token::KwReturn,
            "if" => Token::KwIf,
            "else" => Token::KwElse,
            "while" => Token::KwWhile,
            "true" => Token::KwTrue,
            "false" => Token::KwFalse,
            "sizeof" => Token::KwSizeof,
            _ => return None,
        };
        Some(kw)
    }

    /// True for tokens that can only start a declaration.
    pub fn starts_declaration(&self) -> bool {
        matches!(
            self,
            Token::KwInt
                | Token::KwBool
                | Token::KwVoid
                | Token::KwConst
                | Token::KwExtern
                | Token::KwInline
                | Token::KwTemplate
                | Token::KwStruct
                | Token::KwVirtual
                | Token::KwNamespace
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Ident(name) => return write!(f, "identifier '{}'", name),
            Token::Int(value) => return write!(f, "integer {}", value),
            Token::KwInt => "'int'",
            Token::KwBool => "'bool'",
            Token::KwVoid => "'void'",
            Token::KwConst => "'const'",
            Token::KwExtern => "'extern'",
            Token::KwInline => "'inline'",
            Token::KwTemplate => "'template'",
            Token::KwStruct => "'struct'",
            Token::KwVirtual => "'virtual'",
            Token::KwNamespace => "'namespace'",
            Token::KwReturn => "'return'",
            Token::KwIf => "'if'",
            Token::KwElse => "'else'",
            Token::KwWhile => "'while'",
            Token::KwTrue => "'true'",
            Token::KwFalse => "'false'",
            Token::KwSizeof => "'sizeof'",
            Token::LParen => "'('",
            Token::RParen => "')'",
            Token::LBrace => "'{'",
            Token::RBrace => "'}'",
            Token::Semi => "';'",
            Token::Comma => "','",
            Token::PathSep => "'::'",
            Token::Lt => "'<'",
            Token::Gt => "'>'",
            Token::LtEq => "'<='",
            Token::GtEq => "'>='",
            Token::EqEq => "'=='",
            Token::NotEq => "'!='",
            Token::Assign => "'='",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::Slash => "'/'",
            Token::Percent => "'%'",
            Token::Bang => "'!'",
            Token::AndAnd => "'&&'",
            Token::OrOr => "'||'",
        };
        f.write_str(text)
    }
}

/// A token together with where it started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}
