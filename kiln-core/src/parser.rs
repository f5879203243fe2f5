//! Recursive-descent parser with statement-level error recovery.
//!
//! A syntax error inside a statement is reported once, the parser
//! skips to the next `;` or `}` and carries on, so one broken line
//! does not hide the diagnostics of the rest of the unit. Only
//! excessive nesting aborts the parse entirely.

use crate::ast::*;
use crate::diagnostic::{Diagnostic, codes};
use crate::lexer::{LexResult, Token, TokenKind};
use crate::span::Span;

/// Deepest expression/block nesting the parser accepts.
pub const MAX_NESTING: usize = 256;

#[derive(Debug, Clone)]
pub struct ParseResult {
    /// `None` when the parse was aborted and no tree is available.
    pub unit: Option<SourceUnit>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn parse(source: &str, lexed: &LexResult) -> ParseResult {
    let mut parser = Parser {
        source,
        tokens: &lexed.tokens,
        comments: &lexed.comments,
        pos: 0,
        depth: 0,
        diagnostics: Vec::new(),
    };
    let unit = parser.parse_unit().ok();
    ParseResult {
        unit,
        diagnostics: parser.diagnostics,
    }
}

/// Why a production gave up. The diagnostic is already recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bail {
    Recover,
    Abort,
}

type PResult<T> = Result<T, Bail>;

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    comments: &'a [Span],
    pos: usize,
    depth: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Parser<'a> {
    fn parse_unit(&mut self) -> PResult<SourceUnit> {
        let mut items = Vec::new();
        while !self.at(TokenKind::Eof) {
            match self.peek().kind {
                TokenKind::Fn => match self.parse_function() {
                    Ok(function) => items.push(Item::Function(function)),
                    Err(Bail::Recover) => self.synchronize(),
                    Err(Bail::Abort) => return Err(Bail::Abort),
                },
                TokenKind::RBrace => {
                    let token = self.bump();
                    self.diagnostics.push(Diagnostic::error(
                        codes::UNEXPECTED_TOKEN,
                        "unexpected `}` without a matching `{`",
                        token.span,
                    ));
                }
                _ => {
                    if let Some(stmt) = self.parse_stmt_recovering()? {
                        items.push(Item::Statement(stmt));
                    }
                }
            }
        }
        Ok(SourceUnit { items })
    }

    fn parse_function(&mut self) -> PResult<FunctionDecl> {
        let fn_token = self.expect(TokenKind::Fn)?;
        let docs = self.doc_comment_before(fn_token.span.start);
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        if !self.at(TokenKind::RParen) {
            loop {
                let name = self.expect_ident()?;
                self.expect(TokenKind::Colon)?;
                let ty = self.expect_type()?;
                params.push(Param { name, ty });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        let result = if self.eat(TokenKind::Arrow) {
            Some(self.expect_type()?)
        } else {
            None
        };

        let body = self.parse_block()?;
        let span = fn_token.span.to(body.span);
        Ok(FunctionDecl {
            name,
            params,
            result,
            body,
            docs,
            span,
        })
    }

    fn parse_block(&mut self) -> PResult<Block> {
        let open = self.expect(TokenKind::LBrace)?;
        self.enter(open.span)?;

        let mut stmts = Vec::new();
        while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
            if self.at(TokenKind::Fn) {
                let start = self.peek().span;
                self.diagnostics.push(Diagnostic::error(
                    codes::ITEM_NOT_ALLOWED,
                    "functions can only be declared at the top level",
                    start,
                ));
                match self.parse_function() {
                    Ok(_) | Err(Bail::Recover) => {}
                    Err(Bail::Abort) => return Err(Bail::Abort),
                }
                continue;
            }
            if let Some(stmt) = self.parse_stmt_recovering()? {
                stmts.push(stmt);
            }
        }

        let close = self.expect(TokenKind::RBrace);
        self.depth -= 1;
        let end = match close {
            Ok(token) => token.span,
            Err(Bail::Abort) => return Err(Bail::Abort),
            Err(Bail::Recover) => self.peek().span,
        };
        Ok(Block {
            stmts,
            span: open.span.to(end),
        })
    }

    fn parse_stmt_recovering(&mut self) -> PResult<Option<Stmt>> {
        match self.parse_stmt() {
            Ok(stmt) => Ok(Some(stmt)),
            Err(Bail::Recover) => {
                self.synchronize();
                Ok(None)
            }
            Err(Bail::Abort) => Err(Bail::Abort),
        }
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let start = self.peek().span;
        match self.peek().kind {
            TokenKind::Semi => {
                self.bump();
                Ok(Stmt {
                    kind: StmtKind::Empty,
                    span: start,
                })
            }
            TokenKind::Let => {
                self.bump();
                let name = self.expect_ident()?;
                let ty = if self.eat(TokenKind::Colon) {
                    Some(self.expect_type()?)
                } else {
                    None
                };
                self.expect(TokenKind::Equal)?;
                let init = self.parse_expr()?;
                Ok(self.finish_stmt(StmtKind::Let { name, ty, init }, start))
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.bump();
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                let span = start.to(body.span);
                Ok(Stmt {
                    kind: StmtKind::While { cond, body },
                    span,
                })
            }
            TokenKind::Return => {
                self.bump();
                let value = if self.at(TokenKind::Semi) || self.at(TokenKind::RBrace) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(self.finish_stmt(StmtKind::Return(value), start))
            }
            TokenKind::Ident if self.peek_nth(1).kind == TokenKind::Equal => {
                let target = self.expect_ident()?;
                self.bump();
                let value = self.parse_expr()?;
                Ok(self.finish_stmt(StmtKind::Assign { target, value }, start))
            }
            _ => {
                let expr = self.parse_expr()?;
                Ok(self.finish_stmt(StmtKind::Expr(expr), start))
            }
        }
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let start = self.expect(TokenKind::If)?.span;
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let mut span = start.to(then_block.span);

        let else_branch = if self.eat(TokenKind::Else) {
            if self.at(TokenKind::If) {
                let at = self.peek().span;
                self.enter(at)?;
                let nested = self.parse_if();
                self.depth -= 1;
                let nested = nested?;
                span = span.to(nested.span);
                Some(ElseBranch::If(Box::new(nested)))
            } else {
                let block = self.parse_block()?;
                span = span.to(block.span);
                Some(ElseBranch::Block(block))
            }
        } else {
            None
        };

        Ok(Stmt {
            kind: StmtKind::If {
                cond,
                then_block,
                else_branch,
            },
            span,
        })
    }

    /// Requires the closing `;`. A missing one is reported but the
    /// statement is kept so its bindings stay visible.
    fn finish_stmt(&mut self, kind: StmtKind, start: Span) -> Stmt {
        let end = self.previous_span();
        if !self.eat(TokenKind::Semi) {
            let found = self.peek();
            self.diagnostics.push(Diagnostic::error(
                codes::UNEXPECTED_TOKEN,
                format!("expected `;`, found {}", found.kind.describe()),
                found.span,
            ));
            self.synchronize();
        }
        Stmt {
            kind,
            span: start.to(end),
        }
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        let start = self.peek().span;
        self.enter(start)?;
        let expr = self.parse_binary(0);
        self.depth -= 1;
        expr
    }

    /// Every operator folded into the left operand deepens the tree, so
    /// each one counts against the nesting limit.
    fn parse_binary(&mut self, min_precedence: u8) -> PResult<Expr> {
        let mut folded = 0;
        let expr = self.fold_binary(min_precedence, &mut folded);
        self.depth -= folded;
        expr
    }

    fn fold_binary(&mut self, min_precedence: u8, folded: &mut usize) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, precedence)) = binary_op(self.peek().kind) {
            if precedence < min_precedence {
                break;
            }
            let token = self.bump();
            self.enter(token.span)?;
            *folded += 1;
            let rhs = self.parse_binary(precedence + 1)?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let token = self.bump();
        self.enter(token.span)?;
        let operand = self.parse_unary();
        self.depth -= 1;
        let operand = operand?;
        let span = token.span.to(operand.span);
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        })
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut folded = 0;
        let expr = self.fold_calls(&mut folded);
        self.depth -= folded;
        expr
    }

    fn fold_calls(&mut self, folded: &mut usize) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        while self.at(TokenKind::LParen) {
            let open = self.bump();
            self.enter(open.span)?;
            *folded += 1;
            let mut args = Vec::new();
            if !self.at(TokenKind::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            let close = self.expect(TokenKind::RParen)?;
            let span = expr.span.to(close.span);
            expr = Expr {
                kind: ExprKind::Call {
                    callee: Box::new(expr),
                    args,
                },
                span,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let token = self.peek();
        match token.kind {
            TokenKind::IntLiteral => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Int(self.int_value(token)),
                    span: token.span,
                })
            }
            TokenKind::StringLiteral => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Str(self.string_value(token)),
                    span: token.span,
                })
            }
            TokenKind::True | TokenKind::False => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Bool(token.kind == TokenKind::True),
                    span: token.span,
                })
            }
            TokenKind::Ident => {
                let name = self.expect_ident()?;
                if !self.eat(TokenKind::Dot) {
                    let span = name.span;
                    return Ok(Expr {
                        kind: ExprKind::Name(name),
                        span,
                    });
                }
                if !self.at(TokenKind::Ident) {
                    let found = self.peek();
                    self.diagnostics.push(Diagnostic::error(
                        codes::UNEXPECTED_TOKEN,
                        format!("expected function name after `{}.`", name.name),
                        found.span,
                    ));
                    return Ok(Expr::error(name.span.to(self.previous_span())));
                }
                let member = self.expect_ident()?;
                let span = name.span.to(member.span);
                Ok(Expr {
                    kind: ExprKind::Path {
                        library: name,
                        member,
                    },
                    span,
                })
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    codes::UNEXPECTED_TOKEN,
                    format!("expected expression, found {}", token.kind.describe()),
                    token.span,
                ));
                Err(Bail::Recover)
            }
        }
    }

    fn int_value(&mut self, token: Token) -> i32 {
        let digits: String = token
            .text(self.source)
            .chars()
            .filter(|c| *c != '_')
            .collect();
        match digits.parse::<i32>() {
            Ok(value) => value,
            Err(_) => {
                self.diagnostics.push(Diagnostic::error(
                    codes::INTEGER_OUT_OF_RANGE,
                    format!("integer literal `{digits}` does not fit in an int"),
                    token.span,
                ));
                0
            }
        }
    }

    fn string_value(&mut self, token: Token) -> String {
        let raw = token.text(self.source);
        let body = raw.strip_prefix('"').unwrap_or(raw);
        let body = body.strip_suffix('"').unwrap_or(body);
        let body_start = token.span.start + 1;

        let mut value = String::with_capacity(body.len());
        let mut chars = body.char_indices();
        while let Some((offset, ch)) = chars.next() {
            if ch != '\\' {
                value.push(ch);
                continue;
            }
            match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, '"')) => value.push('"'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, '0')) => value.push('\0'),
                Some((_, other)) => {
                    let start = body_start + offset as u32;
                    let end = start + 1 + other.len_utf8() as u32;
                    self.diagnostics.push(Diagnostic::error(
                        codes::INVALID_ESCAPE,
                        format!("unknown escape sequence `\\{other}`"),
                        Span::new(start, end),
                    ));
                }
                None => {}
            }
        }
        value
    }

    // -----------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------

    fn peek(&self) -> Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Token {
        let last = self.tokens.len().saturating_sub(1);
        self.tokens[(self.pos + n).min(last)]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn bump(&mut self) -> Token {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn previous_span(&self) -> Span {
        match self.pos.checked_sub(1) {
            Some(index) => self.tokens[index].span,
            None => self.peek().span,
        }
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.at(kind) {
            return Ok(self.bump());
        }
        let found = self.peek();
        self.diagnostics.push(Diagnostic::error(
            codes::UNEXPECTED_TOKEN,
            format!("expected {}, found {}", kind.describe(), found.kind.describe()),
            found.span,
        ));
        Err(Bail::Recover)
    }

    fn expect_ident(&mut self) -> PResult<Ident> {
        let token = self.expect(TokenKind::Ident)?;
        Ok(Ident {
            name: token.text(self.source).to_string(),
            span: token.span,
        })
    }

    fn expect_type(&mut self) -> PResult<TypeRef> {
        let ident = self.expect_ident()?;
        Ok(TypeRef {
            name: ident.name,
            span: ident.span,
        })
    }

    fn enter(&mut self, span: Span) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            self.diagnostics.push(Diagnostic::error(
                codes::NESTING_TOO_DEEP,
                format!("nesting exceeds the limit of {MAX_NESTING} levels"),
                span,
            ));
            return Err(Bail::Abort);
        }
        self.depth += 1;
        Ok(())
    }

    /// Skips to the next statement boundary at the current nesting level.
    fn synchronize(&mut self) {
        let mut depth = 0usize;
        let mut skipped = false;
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Eof => return,
                TokenKind::Semi if depth == 0 => {
                    self.bump();
                    return;
                }
                TokenKind::RBrace if depth == 0 => return,
                TokenKind::RBrace => depth -= 1,
                TokenKind::LBrace => depth += 1,
                TokenKind::Fn
                | TokenKind::Let
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Return
                    if depth == 0 && skipped =>
                {
                    return;
                }
                _ => {}
            }
            self.bump();
            skipped = true;
        }
    }

    /// Collects the `///` comment lines directly above `offset`.
    fn doc_comment_before(&self, offset: u32) -> Option<String> {
        let mut lines = Vec::new();
        let mut boundary = offset;
        for comment in self.comments.iter().rev().filter(|c| c.end <= offset) {
            let gap = &self.source[comment.end as usize..boundary as usize];
            if !gap.chars().all(char::is_whitespace) || gap.matches('\n').count() > 1 {
                break;
            }
            let text = &self.source[comment.range()];
            let Some(doc) = text.strip_prefix("///") else {
                break;
            };
            lines.push(doc.strip_prefix(' ').unwrap_or(doc).to_string());
            boundary = comment.start;
        }
        if lines.is_empty() {
            return None;
        }
        lines.reverse();
        Some(lines.join("\n"))
    }
}

fn binary_op(kind: TokenKind) -> Option<(BinaryOp, u8)> {
    let op = match kind {
        TokenKind::OrOr => (BinaryOp::Or, 1),
        TokenKind::AndAnd => (BinaryOp::And, 2),
        TokenKind::EqEq => (BinaryOp::Eq, 3),
        TokenKind::BangEq => (BinaryOp::Ne, 3),
        TokenKind::Less => (BinaryOp::Lt, 4),
        TokenKind::LessEq => (BinaryOp::Le, 4),
        TokenKind::Greater => (BinaryOp::Gt, 4),
        TokenKind::GreaterEq => (BinaryOp::Ge, 4),
        TokenKind::Plus => (BinaryOp::Add, 5),
        TokenKind::Minus => (BinaryOp::Sub, 5),
        TokenKind::Star => (BinaryOp::Mul, 6),
        TokenKind::Slash => (BinaryOp::Div, 6),
        TokenKind::Percent => (BinaryOp::Rem, 6),
        _ => return None,
    };
    Some(op)
}
