//! Completion candidates and the completion trigger heuristic.
//!
//! Candidates are computed from a [`Compilation`] snapshot and a
//! caret offset. The context at the caret decides the candidate set:
//!
//! - after `library.`: that library's functions
//! - after `:` or `->`: type names
//! - inside a string literal or comment: nothing
//! - anywhere else: locals in scope, declared functions, built-ins,
//!   libraries and keywords
//!
//! Every candidate replaces the identifier run around the caret, see
//! [`default_completion_span`].

use core::fmt;

use crate::ast::{ElseBranch, FunctionDecl, Ident, Item, SourceUnit, Stmt, StmtKind};
use crate::builtins::BUILTINS;
use crate::compiler::Compilation;
use crate::diagnostic::codes;
use crate::lexer::{KEYWORDS, TokenKind, is_ident_continue, is_ident_start};
use crate::span::Span;
use crate::types::TYPE_NAMES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompletionTag {
    Keyword,
    Function,
    Intrinsic,
    Module,
    Local,
    Parameter,
    Type,
}

impl CompletionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionTag::Keyword => "Keyword",
            CompletionTag::Function => "Function",
            CompletionTag::Intrinsic => "Intrinsic",
            CompletionTag::Module => "Module",
            CompletionTag::Local => "Local",
            CompletionTag::Parameter => "Parameter",
            CompletionTag::Type => "Type",
        }
    }
}

impl fmt::Display for CompletionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    pub display_text: String,
    /// Text matched against the typed prefix.
    pub filter_text: String,
    /// Ordering key among items of equal match quality.
    pub sort_text: String,
    pub inline_description: String,
    pub tags: Vec<CompletionTag>,
    /// Range the item replaces when committed.
    pub span: Span,
}

impl CompletionItem {
    fn new(name: &str, rank: u8, description: String, tag: CompletionTag, span: Span) -> Self {
        CompletionItem {
            display_text: name.to_string(),
            filter_text: name.to_string(),
            sort_text: format!("{rank}_{name}"),
            inline_description: description,
            tags: vec![tag],
            span,
        }
    }
}

/// What happened at the caret right before completion was considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTrigger {
    /// Explicit request, e.g. ctrl+space.
    Invoke,
    /// `char` was typed; the caret is right after it.
    Insertion(char),
    /// `char` was removed; the caret is where it used to start.
    Deletion(char),
}

/// Clamps `caret` into `source` and onto a char boundary.
pub fn clamp_caret(source: &str, caret: u32) -> u32 {
    let mut offset = (caret as usize).min(source.len());
    while !source.is_char_boundary(offset) {
        offset -= 1;
    }
    offset as u32
}

/// The identifier run touching the caret, empty at the caret when
/// there is none.
pub fn default_completion_span(source: &str, caret: u32) -> Span {
    let caret = clamp_caret(source, caret) as usize;
    let bytes = source.as_bytes();
    let mut start = caret;
    while start > 0 && is_ident_continue(bytes[start - 1]) {
        start -= 1;
    }
    let mut end = caret;
    while end < bytes.len() && is_ident_continue(bytes[end]) {
        end += 1;
    }
    Span::new(start as u32, end as u32)
}

/// Text of the default completion span up to the caret.
pub fn typed_prefix(source: &str, caret: u32) -> &str {
    let caret = clamp_caret(source, caret);
    let span = default_completion_span(source, caret);
    &source[span.start as usize..caret as usize]
}

/// Keeps items whose filter text starts with `prefix`, ignoring case,
/// except items that are exactly `prefix`. Items matching the prefix
/// case-sensitively rank first, then by sort text.
pub fn filter_completions(items: Vec<CompletionItem>, prefix: &str) -> Vec<CompletionItem> {
    if prefix.is_empty() {
        return items;
    }
    let lowered = prefix.to_lowercase();
    let mut kept: Vec<CompletionItem> = items
        .into_iter()
        .filter(|item| item.filter_text != prefix)
        .filter(|item| item.filter_text.to_lowercase().starts_with(&lowered))
        .collect();
    kept.sort_by(|a, b| {
        let a_exact = a.filter_text.starts_with(prefix);
        let b_exact = b.filter_text.starts_with(prefix);
        b_exact
            .cmp(&a_exact)
            .then_with(|| a.sort_text.cmp(&b.sort_text))
            .then_with(|| a.display_text.cmp(&b.display_text))
    });
    kept
}

/// Raw candidates at `caret`, unfiltered. Empty when the unit has no
/// syntax tree to reason about.
pub fn completions(compilation: &Compilation, caret: u32) -> Vec<CompletionItem> {
    let Some(unit) = compilation.syntax() else {
        return Vec::new();
    };
    let source = compilation.source();
    let caret = clamp_caret(source, caret);
    let span = default_completion_span(source, caret);

    match context_at(compilation, caret, span) {
        Context::Silent => Vec::new(),
        Context::Member(library) => match compilation.library(&library) {
            Some(library) => library
                .functions()
                .iter()
                .map(|sig| {
                    CompletionItem::new(&sig.name, 1, sig.to_string(), CompletionTag::Function, span)
                })
                .collect(),
            None => Vec::new(),
        },
        Context::Type => TYPE_NAMES
            .iter()
            .map(|name| {
                CompletionItem::new(name, 0, format!("type {name}"), CompletionTag::Type, span)
            })
            .collect(),
        Context::General => general_items(compilation, unit, caret, span),
    }
}

/// Whether an edit at `caret` should open or refresh completion.
pub fn should_trigger(compilation: &Compilation, caret: u32, trigger: CompletionTrigger) -> bool {
    let source = compilation.source();
    let caret = clamp_caret(source, caret);
    let bytes = source.as_bytes();
    let before = |distance: usize| -> Option<u8> {
        (caret as usize)
            .checked_sub(distance)
            .and_then(|index| bytes.get(index).copied())
    };

    match trigger {
        CompletionTrigger::Invoke => true,
        _ if in_comment(compilation, caret) || in_string(compilation, caret) => false,
        CompletionTrigger::Insertion('.') => before(2).is_some_and(is_ident_continue),
        CompletionTrigger::Insertion(ch) if ch.is_ascii() && is_ident_start(ch as u8) => {
            !before(2).is_some_and(is_ident_continue)
        }
        CompletionTrigger::Insertion(_) => false,
        CompletionTrigger::Deletion(_) => before(1).is_some_and(is_ident_continue),
    }
}

enum Context {
    Silent,
    Member(String),
    Type,
    General,
}

fn context_at(compilation: &Compilation, caret: u32, span: Span) -> Context {
    if in_comment(compilation, caret) || in_string(compilation, caret) {
        return Context::Silent;
    }
    let source = compilation.source();
    let before = &source[..span.start as usize];

    if let Some(qualifier) = before.strip_suffix('.') {
        let start = qualifier
            .bytes()
            .rposition(|b| !is_ident_continue(b))
            .map_or(0, |index| index + 1);
        let name = &qualifier[start..];
        return match name.bytes().next() {
            Some(first) if is_ident_start(first) => Context::Member(name.to_string()),
            _ => Context::Silent,
        };
    }

    let trimmed = before.trim_end();
    if trimmed.ends_with("->") || trimmed.ends_with(':') {
        return Context::Type;
    }
    Context::General
}

fn in_comment(compilation: &Compilation, caret: u32) -> bool {
    compilation
        .comments()
        .iter()
        .any(|comment| comment.start < caret && caret <= comment.end)
}

/// An unterminated literal runs to the caret at its end; a closed one
/// ends before its closing quote.
fn in_string(compilation: &Compilation, caret: u32) -> bool {
    let unterminated: Vec<Span> = compilation
        .lex_diagnostics()
        .iter()
        .filter(|d| d.code == codes::UNTERMINATED_STRING)
        .map(|d| d.span)
        .collect();
    compilation
        .tokens()
        .iter()
        .filter(|token| token.kind == TokenKind::StringLiteral)
        .any(|token| {
            if unterminated.contains(&token.span) {
                token.span.start < caret && token.span.touches(caret)
            } else {
                token.span.start < caret && caret < token.span.end
            }
        })
}

fn general_items(
    compilation: &Compilation,
    unit: &SourceUnit,
    caret: u32,
    span: Span,
) -> Vec<CompletionItem> {
    let mut items = Vec::new();

    for (ident, is_param) in scope_at(compilation.source(), unit, caret) {
        let ty = compilation
            .binding_type(ident.span)
            .map(|ty| ty.name())
            .unwrap_or("?");
        let tag = if is_param {
            CompletionTag::Parameter
        } else {
            CompletionTag::Local
        };
        let description = format!("{}: {ty}", ident.name);
        items.push(CompletionItem::new(&ident.name, 0, description, tag, span));
    }

    let mut seen_functions = Vec::new();
    for sig in compilation.functions() {
        if seen_functions.contains(&sig.name.as_str()) {
            continue;
        }
        seen_functions.push(&sig.name);
        items.push(CompletionItem::new(
            &sig.name,
            1,
            sig.to_string(),
            CompletionTag::Function,
            span,
        ));
    }

    for builtin in BUILTINS {
        items.push(CompletionItem::new(
            builtin.name,
            2,
            builtin.signature.to_string(),
            CompletionTag::Intrinsic,
            span,
        ));
    }

    for library in compilation.libraries() {
        items.push(CompletionItem::new(
            library.name(),
            3,
            format!("library {}", library.name()),
            CompletionTag::Module,
            span,
        ));
    }

    for keyword in KEYWORDS {
        items.push(CompletionItem::new(
            keyword,
            4,
            "keyword".to_string(),
            CompletionTag::Keyword,
            span,
        ));
    }

    items
}

/// Locals and parameters visible at `caret`, innermost binding per name.
fn scope_at<'u>(source: &str, unit: &'u SourceUnit, caret: u32) -> Vec<(&'u Ident, bool)> {
    let mut found = Vec::new();

    let enclosing = unit.items.iter().find_map(|item| match item {
        Item::Function(function) if block_contains(source, function.body.span, caret) => {
            Some(function)
        }
        _ => None,
    });

    match enclosing {
        Some(function) => collect_function(source, function, caret, &mut found),
        None => {
            let statements = unit.items.iter().filter_map(|item| match item {
                Item::Statement(stmt) => Some(stmt),
                Item::Function(_) => None,
            });
            collect_stmts(source, statements, caret, &mut found);
        }
    }

    let mut visible: Vec<(&Ident, bool)> = Vec::new();
    for (ident, is_param) in found.into_iter().rev() {
        if !visible.iter().any(|(seen, _)| seen.name == ident.name) {
            visible.push((ident, is_param));
        }
    }
    visible.reverse();
    visible
}

fn collect_function<'u>(
    source: &str,
    function: &'u FunctionDecl,
    caret: u32,
    found: &mut Vec<(&'u Ident, bool)>,
) {
    found.extend(function.params.iter().map(|param| (&param.name, true)));
    collect_stmts(source, function.body.stmts.iter(), caret, found);
}

fn collect_stmts<'u>(
    source: &str,
    stmts: impl Iterator<Item = &'u Stmt>,
    caret: u32,
    found: &mut Vec<(&'u Ident, bool)>,
) {
    for stmt in stmts {
        if stmt.span.start >= caret {
            break;
        }
        match &stmt.kind {
            StmtKind::Let { name, .. } if caret > stmt.span.end => found.push((name, false)),
            StmtKind::If {
                then_block,
                else_branch,
                ..
            } => {
                if block_contains(source, then_block.span, caret) {
                    collect_stmts(source, then_block.stmts.iter(), caret, found);
                }
                match else_branch {
                    Some(ElseBranch::Block(block)) if block_contains(source, block.span, caret) => {
                        collect_stmts(source, block.stmts.iter(), caret, found);
                    }
                    Some(ElseBranch::If(nested)) => {
                        collect_stmts(source, core::iter::once(nested.as_ref()), caret, found);
                    }
                    _ => {}
                }
            }
            StmtKind::While { body, .. } if block_contains(source, body.span, caret) => {
                collect_stmts(source, body.stmts.iter(), caret, found);
            }
            _ => {}
        }
    }
}

/// Whether `caret` is inside the braces of a block. A block left
/// unclosed at the end of the text extends through its last offset.
fn block_contains(source: &str, span: Span, caret: u32) -> bool {
    let last = span
        .end
        .checked_sub(1)
        .and_then(|index| source.as_bytes().get(index as usize));
    let closed = last == Some(&b'}') && span.len() > 1;
    span.start < caret && (caret < span.end || !closed && caret == span.end)
}
