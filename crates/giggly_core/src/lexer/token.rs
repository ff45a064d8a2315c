use super::Span;

/// The payload-free or payload-bearing kind of a single token. Kept separate from
/// [`Token`] so the parser can match on `TokenKind` without dragging the span along.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Integer(i64),
    Float(f64),
    Str(String),
    Identifier(String),

    Def,
    Struct,
    ModuleKw,
    Import,
    Return,
    If,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Switch,
    Case,
    Other,
    Try,
    Catch,
    Raise,
    New,
    True,
    False,
    Volatile,
    Autocast,
    Generic,
    Ref,
    Free,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    Assign,
    Arrow,
    ColonColon,
    Dot,
    At,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use TokenKind::*;
        match self {
            Integer(v) => write!(f, "{v}"),
            Float(v) => write!(f, "{v}"),
            Str(v) => write!(f, "{v:?}"),
            Identifier(v) => write!(f, "{v}"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}
