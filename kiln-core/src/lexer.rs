//! Lexer for Kiln source text.

use crate::diagnostic::{Diagnostic, codes};
use crate::span::Span;

/// Kind of a token produced by the lexer.
///
/// The lexer only recognizes keywords and literal shapes. Literal
/// values are decoded by the parser so that all value errors carry
/// parser spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Special
    Eof,

    // Identifiers and literals
    Ident,
    IntLiteral,
    StringLiteral,

    // Punctuation
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    Comma,    // ,
    Semi,     // ;
    Colon,    // :
    Dot,      // .
    Arrow,    // ->

    // Operators
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    Bang,     // !
    Equal,    // =
    EqEq,     // ==
    BangEq,   // !=
    Less,     // <
    LessEq,   // <=
    Greater,  // >
    GreaterEq,// >=
    AndAnd,   // &&
    OrOr,     // ||

    // Keywords
    Fn,
    Let,
    If,
    Else,
    While,
    Return,
    True,
    False,
}

impl TokenKind {
    /// Human readable form used in "expected ..." diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Eof => "end of input",
            TokenKind::Ident => "identifier",
            TokenKind::IntLiteral => "integer literal",
            TokenKind::StringLiteral => "string literal",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::LBrace => "`{`",
            TokenKind::RBrace => "`}`",
            TokenKind::Comma => "`,`",
            TokenKind::Semi => "`;`",
            TokenKind::Colon => "`:`",
            TokenKind::Dot => "`.`",
            TokenKind::Arrow => "`->`",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Percent => "`%`",
            TokenKind::Bang => "`!`",
            TokenKind::Equal => "`=`",
            TokenKind::EqEq => "`==`",
            TokenKind::BangEq => "`!=`",
            TokenKind::Less => "`<`",
            TokenKind::LessEq => "`<=`",
            TokenKind::Greater => "`>`",
            TokenKind::GreaterEq => "`>=`",
            TokenKind::AndAnd => "`&&`",
            TokenKind::OrOr => "`||`",
            TokenKind::Fn => "`fn`",
            TokenKind::Let => "`let`",
            TokenKind::If => "`if`",
            TokenKind::Else => "`else`",
            TokenKind::While => "`while`",
            TokenKind::Return => "`return`",
            TokenKind::True => "`true`",
            TokenKind::False => "`false`",
        }
    }
}

/// Keywords in the order completion lists them.
pub const KEYWORDS: &[&str] = &["else", "false", "fn", "if", "let", "return", "true", "while"];

/// A single token with its kind and span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn text<'src>(&self, source: &'src str) -> &'src str {
        &source[self.span.range()]
    }
}

/// Result of lexing a source file.
#[derive(Debug, Clone, Default)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    /// Spans of `//` comments, excluding the terminating newline.
    pub comments: Vec<Span>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lex a source string into tokens. The last token is always `Eof`.
pub fn lex(source: &str) -> LexResult {
    let mut lexer = Lexer {
        source,
        chars: source.as_bytes(),
        index: 0,
        comments: Vec::new(),
        diagnostics: Vec::new(),
    };
    lexer.run()
}

struct Lexer<'src> {
    source: &'src str,
    chars: &'src [u8],
    index: usize,
    comments: Vec<Span>,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    fn run(&mut self) -> LexResult {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            if is_whitespace(ch) {
                self.consume_char();
                continue;
            }

            let start = self.index as u32;
            let token = match ch {
                b'/' if self.peek_next() == Some(b'/') => {
                    self.skip_comment(start);
                    None
                }
                b'(' => self.single(TokenKind::LParen, start),
                b')' => self.single(TokenKind::RParen, start),
                b'{' => self.single(TokenKind::LBrace, start),
                b'}' => self.single(TokenKind::RBrace, start),
                b',' => self.single(TokenKind::Comma, start),
                b';' => self.single(TokenKind::Semi, start),
                b':' => self.single(TokenKind::Colon, start),
                b'.' => self.single(TokenKind::Dot, start),
                b'+' => self.single(TokenKind::Plus, start),
                b'*' => self.single(TokenKind::Star, start),
                b'/' => self.single(TokenKind::Slash, start),
                b'%' => self.single(TokenKind::Percent, start),
                b'-' => self.pair(b'>', TokenKind::Arrow, TokenKind::Minus, start),
                b'=' => self.pair(b'=', TokenKind::EqEq, TokenKind::Equal, start),
                b'!' => self.pair(b'=', TokenKind::BangEq, TokenKind::Bang, start),
                b'<' => self.pair(b'=', TokenKind::LessEq, TokenKind::Less, start),
                b'>' => self.pair(b'=', TokenKind::GreaterEq, TokenKind::Greater, start),
                b'&' if self.peek_next() == Some(b'&') => {
                    self.consume_char();
                    self.single(TokenKind::AndAnd, start)
                }
                b'|' if self.peek_next() == Some(b'|') => {
                    self.consume_char();
                    self.single(TokenKind::OrOr, start)
                }
                b'"' => self.lex_string(start),
                b'0'..=b'9' => self.lex_number(start),
                _ if is_ident_start(ch) => self.lex_ident_or_keyword(start),
                _ => {
                    self.consume_utf8_char();
                    self.unexpected_char(start)
                }
            };

            if let Some(tok) = token {
                tokens.push(tok);
            }
        }

        let len = self.chars.len() as u32;
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::empty(len),
        });

        LexResult {
            tokens,
            comments: core::mem::take(&mut self.comments),
            diagnostics: core::mem::take(&mut self.diagnostics),
        }
    }

    fn single(&mut self, kind: TokenKind, start: u32) -> Option<Token> {
        self.consume_char();
        self.token(kind, start)
    }

    /// Lexes `first second` as `joined`, or just `first` as `alone`.
    fn pair(&mut self, second: u8, joined: TokenKind, alone: TokenKind, start: u32) -> Option<Token> {
        self.consume_char();
        if self.peek_char() == Some(second) {
            self.consume_char();
            self.token(joined, start)
        } else {
            self.token(alone, start)
        }
    }

    fn token(&self, kind: TokenKind, start: u32) -> Option<Token> {
        Some(Token {
            kind,
            span: Span::new(start, self.index as u32),
        })
    }

    fn unexpected_char(&mut self, start: u32) -> Option<Token> {
        let span = Span::new(start, self.index as u32);
        let text = &self.source[span.range()];
        self.diagnostics.push(Diagnostic::error(
            codes::UNEXPECTED_CHARACTER,
            format!("unexpected character `{text}`"),
            span,
        ));
        None
    }

    fn skip_comment(&mut self, start: u32) {
        while let Some(ch) = self.peek_char() {
            if ch == b'\n' {
                break;
            }
            self.consume_char();
        }
        self.comments.push(Span::new(start, self.index as u32));
    }

    fn lex_string(&mut self, start: u32) -> Option<Token> {
        // opening quote
        self.consume_char();

        while let Some(ch) = self.peek_char() {
            match ch {
                b'"' => {
                    self.consume_char();
                    return self.token(TokenKind::StringLiteral, start);
                }
                b'\n' => break,
                b'\\' => {
                    self.consume_char();
                    if self.peek_char().is_some_and(|next| next != b'\n') {
                        self.consume_utf8_char();
                    }
                }
                _ => self.consume_char(),
            }
        }

        // Unterminated: still produce the token so later phases see a literal.
        let span = Span::new(start, self.index as u32);
        self.diagnostics.push(Diagnostic::error(
            codes::UNTERMINATED_STRING,
            "unterminated string literal",
            span,
        ));
        self.token(TokenKind::StringLiteral, start)
    }

    fn lex_number(&mut self, start: u32) -> Option<Token> {
        while let Some(ch) = self.peek_char() {
            if matches!(ch, b'0'..=b'9' | b'_') {
                self.consume_char();
            } else {
                break;
            }
        }
        self.token(TokenKind::IntLiteral, start)
    }

    fn lex_ident_or_keyword(&mut self, start: u32) -> Option<Token> {
        while let Some(ch) = self.peek_char() {
            if is_ident_continue(ch) {
                self.consume_char();
            } else {
                break;
            }
        }

        let text = &self.source[start as usize..self.index];
        let kind = match text {
            "fn" => TokenKind::Fn,
            "let" => TokenKind::Let,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Ident,
        };
        self.token(kind, start)
    }

    fn peek_char(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if self.index < self.chars.len() {
            self.index += 1;
        }
    }

    /// Consumes one full UTF-8 scalar so spans stay on char boundaries.
    fn consume_utf8_char(&mut self) {
        let width = self.source[self.index..]
            .chars()
            .next()
            .map_or(1, char::len_utf8);
        self.index = (self.index + width).min(self.chars.len());
    }
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r')
}

pub fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

pub fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_function_header() {
        assert_eq!(
            kinds("fn add(a: int) -> int {"),
            vec![
                TokenKind::Fn,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::Ident,
                TokenKind::Colon,
                TokenKind::Ident,
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::Ident,
                TokenKind::LBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_compound_operators() {
        assert_eq!(
            kinds("a <= b && c != d || !e"),
            vec![
                TokenKind::Ident,
                TokenKind::LessEq,
                TokenKind::Ident,
                TokenKind::AndAnd,
                TokenKind::Ident,
                TokenKind::BangEq,
                TokenKind::Ident,
                TokenKind::OrOr,
                TokenKind::Bang,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn records_comments_and_skips_them() {
        let result = lex("let x = 1; // note\nx");
        assert_eq!(result.comments, vec![Span::new(11, 18)]);
        assert_eq!(result.tokens.len(), 7);
    }

    #[test]
    fn reports_unterminated_string_but_keeps_token() {
        let result = lex("print(\"oops");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].code, codes::UNTERMINATED_STRING);
        assert!(result.tokens.iter().any(|t| t.kind == TokenKind::StringLiteral));
    }

    #[test]
    fn reports_unexpected_character() {
        let result = lex("let a = 1 # 2;");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].span, Span::new(10, 11));
    }

    #[test]
    fn keeps_non_ascii_spans_on_char_boundaries() {
        let source = "let é = 1;";
        let result = lex(source);
        assert_eq!(result.diagnostics.len(), 1);
        let span = result.diagnostics[0].span;
        assert_eq!(&source[span.range()], "é");
    }
}
