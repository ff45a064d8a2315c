//! # Lexer
//!
//! Hand-rolled longest-match scanner that turns GigglyCode source text into a flat
//! token stream. Every token carries a [`Span`] so later stages (the parser, the
//! semantic core, diagnostics) can always point back at the exact source range a
//! node came from.
//!
//! The scanner is a single linear pass: skip whitespace and comments, try to match
//! the longest token starting at the current position, advance, repeat. Keywords are
//! recognized by looking identifiers up in a static table *after* the identifier
//! pattern matches, so `"format"` and `"for"` never race against each other based on
//! pattern registration order.

mod token;

pub use token::{Token, TokenKind};

use std::fmt;

/// A source range, expressed as inclusive `(line, column)` pairs, both zero-based.
#[derive(Debug, Clone, Default, Eq)]
pub struct Span {
    pub start: (usize, usize),
    pub end: (usize, usize),
}

impl Span {
    pub fn new(start: (usize, usize), end: (usize, usize)) -> Self {
        Span { start, end }
    }

    /// Span covering both `self` and `other`, taking `self`'s start and `other`'s end.
    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
        }
    }
}

/// Spans never participate in AST/token equality checks in tests; two nodes parsed
/// from different source offsets can still be "the same" node structurally.
impl PartialEq for Span {
    fn eq(&self, _other: &Span) -> bool {
        true
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.0 + 1,
            self.start.1 + 1,
            self.end.0 + 1,
            self.end.1 + 1
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

impl std::error::Error for LexError {}

pub type LexResult<T> = Result<T, LexError>;

fn keyword_kind(ident: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match ident {
        "def" => Def,
        "struct" => Struct,
        "module" => ModuleKw,
        "import" => Import,
        "return" => Return,
        "if" => If,
        "else" => Else,
        "while" => While,
        "for" => For,
        "in" => In,
        "break" => Break,
        "continue" => Continue,
        "switch" => Switch,
        "case" => Case,
        "other" => Other,
        "try" => Try,
        "catch" => Catch,
        "raise" => Raise,
        "new" => New,
        "true" => True,
        "false" => False,
        "volatile" => Volatile,
        "autocast" => Autocast,
        "generic" => Generic,
        "ref" => Ref,
        "free" => Free,
        _ => return None,
    })
}

/// Longest-match scanner over a single source file's text.
pub struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    position: usize,
    line: usize,
    col: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            bytes: input.as_bytes(),
            position: 0,
            line: 0,
            col: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.position).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.position += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn here(&self) -> (usize, usize) {
        (self.line, self.col)
    }

    fn eat_whitespace_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
                self.advance();
            }

            if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'/') {
                while !matches!(self.peek(), None | Some(b'\n')) {
                    self.advance();
                }
                continue;
            }

            if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'*') {
                self.advance();
                self.advance();
                while !(self.peek().is_none() || (self.peek() == Some(b'*') && self.peek_at(1) == Some(b'/'))) {
                    self.advance();
                }
                self.advance();
                self.advance();
                continue;
            }

            break;
        }
    }

    fn push(&mut self, kind: TokenKind, start: (usize, usize)) {
        let span = Span::new(start, self.here());
        self.tokens.push(Token { kind, span });
    }

    fn lex_number(&mut self) -> LexResult<()> {
        let start = self.here();
        let begin = self.position;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }

        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.input[begin..self.position];
        if is_float {
            let value: f64 = text.parse().map_err(|_| LexError {
                message: format!("invalid float literal '{text}'"),
                span: Span::new(start, self.here()),
            })?;
            self.push(TokenKind::Float(value), start);
        } else {
            let value: i64 = text.parse().map_err(|_| LexError {
                message: format!("invalid integer literal '{text}'"),
                span: Span::new(start, self.here()),
            })?;
            self.push(TokenKind::Integer(value), start);
        }
        Ok(())
    }

    fn lex_identifier_or_keyword(&mut self) {
        let start = self.here();
        let begin = self.position;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.advance();
        }
        let text = &self.input[begin..self.position];
        match keyword_kind(text) {
            Some(kind) => self.push(kind, start),
            None => self.push(TokenKind::Identifier(text.to_string()), start),
        }
    }

    fn lex_string(&mut self) -> LexResult<()> {
        let start = self.here();
        self.advance(); // opening quote
        let begin = self.position;
        while !matches!(self.peek(), None | Some(b'"')) {
            if self.peek() == Some(b'\\') {
                self.advance();
            }
            self.advance();
        }
        if self.peek() != Some(b'"') {
            return Err(LexError {
                message: "unterminated string literal".into(),
                span: Span::new(start, self.here()),
            });
        }
        let raw = &self.input[begin..self.position];
        self.advance(); // closing quote
        let value = unescape::unescape(raw).unwrap_or_else(|| raw.to_string());
        self.push(TokenKind::Str(value), start);
        Ok(())
    }

    /// Try to match one of the multi-character operators/delimiters at the current
    /// position, longest first. Returns the matched kind and its textual length.
    fn match_symbol(&self) -> Option<(TokenKind, usize)> {
        use TokenKind::*;
        const THREE: &[(&str, TokenKind)] = &[];
        const TWO: &[(&str, fn() -> TokenKind)] = &[
            ("==", || Eq),
            ("!=", || Neq),
            ("<=", || Lte),
            (">=", || Gte),
            ("->", || Arrow),
            ("::", || ColonColon),
        ];
        let rest = &self.input[self.position..];
        for (pat, _) in THREE {
            if rest.starts_with(pat) {
                unreachable!("no three-char operators defined: {pat}");
            }
        }
        for (pat, make) in TWO {
            if rest.starts_with(pat) {
                return Some((make(), pat.len()));
            }
        }
        let one = self.peek()?;
        let kind = match one {
            b'+' => Plus,
            b'-' => Minus,
            b'*' => Star,
            b'/' => Slash,
            b'%' => Percent,
            b'^' => Caret,
            b'<' => Lt,
            b'>' => Gt,
            b'=' => Assign,
            b'(' => LParen,
            b')' => RParen,
            b'{' => LBrace,
            b'}' => RBrace,
            b'[' => LBracket,
            b']' => RBracket,
            b',' => Comma,
            b';' => Semicolon,
            b':' => Colon,
            b'.' => Dot,
            b'@' => At,
            _ => return None,
        };
        Some((kind, 1))
    }

    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        loop {
            self.eat_whitespace_and_comments();
            let Some(c) = self.peek() else { break };

            if c.is_ascii_digit() {
                self.lex_number()?;
                continue;
            }

            if c.is_ascii_alphabetic() || c == b'_' {
                self.lex_identifier_or_keyword();
                continue;
            }

            if c == b'"' {
                self.lex_string()?;
                continue;
            }

            let start = self.here();
            if let Some((kind, len)) = self.match_symbol() {
                for _ in 0..len {
                    self.advance();
                }
                self.push(kind, start);
                continue;
            }

            return Err(LexError {
                message: format!("unexpected character '{}'", c as char),
                span: Span::new(start, start),
            });
        }

        Ok(self.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .lex()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_integer_and_float() {
        assert_eq!(kinds("42 3.14"), vec![TokenKind::Integer(42), TokenKind::Float(3.14)]);
    }

    #[test]
    fn lexes_keywords_before_identifiers() {
        assert_eq!(
            kinds("def foo"),
            vec![TokenKind::Def, TokenKind::Identifier("foo".into())]
        );
    }

    #[test]
    fn distinguishes_format_from_for() {
        assert_eq!(kinds("format"), vec![TokenKind::Identifier("format".into())]);
        assert_eq!(kinds("for"), vec![TokenKind::For]);
    }

    #[test]
    fn lexes_string_with_escapes() {
        assert_eq!(kinds(r#""hi\n""#), vec![TokenKind::Str("hi\n".into())]);
    }

    #[test]
    fn skips_line_and_block_comments() {
        assert_eq!(
            kinds("// a comment\n1 /* block */ 2"),
            vec![TokenKind::Integer(1), TokenKind::Integer(2)]
        );
    }

    #[test]
    fn lexes_two_char_operators_before_one_char() {
        assert_eq!(kinds("== != <= >= -> ::"), vec![
            TokenKind::Eq,
            TokenKind::Neq,
            TokenKind::Lte,
            TokenKind::Gte,
            TokenKind::Arrow,
            TokenKind::ColonColon,
        ]);
    }

    #[test]
    fn reports_unterminated_string() {
        assert!(Lexer::new("\"oops").lex().is_err());
    }
}
