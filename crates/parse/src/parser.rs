use anyhow::{anyhow, bail, Result};
use lex::{
    render_tokens, Diagnostic, DiagnosticKind, Keyword as Kw, LiteralKind, Punctuator as P, Span,
    Token, TokenKind as K,
};
use log::debug;
use pp::expr::parse_int_literal;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ast::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    TopLevel,
    Field,
    Param,
}

struct Specifiers {
    base: Type,
    storage: StorageClass,
    quals: Qualifiers,
    is_typedef: bool,
    is_inline: bool,
    /// `struct S` without a body: `struct S;` alone declares it.
    tag_ref: Option<(EntityKind, String)>,
}

enum Derivation {
    Pointer,
    Array(ArrayExtent),
    Function {
        params: Vec<Param>,
        variadic: bool,
        /// Only unnamed parameters of unknown type names: an identifier
        /// list if a body or a declaration list follows.
        kr_candidate: bool,
    },
}

/// Derivations ordered from the one binding tightest to the name outwards.
struct Declarator {
    name: Option<(String, Span)>,
    ops: Vec<Derivation>,
}

impl Declarator {
    fn build(&self, base: Type, skip: usize) -> Type {
        self.ops.iter().skip(skip).rev().fold(base, |ty, op| match op {
            Derivation::Pointer => Type::Pointer(Box::new(ty)),
            Derivation::Array(ext) => Type::Array(Box::new(ty), ext.clone()),
            Derivation::Function { params, variadic, .. } => Type::Func {
                ret: Box::new(ty),
                params: params.iter().map(|p| p.ty.clone()).collect(),
                variadic: *variadic,
            },
        })
    }
}

fn is_gnu_extra(name: &str) -> bool {
    matches!(
        name,
        "__attribute__" | "__attribute" | "__declspec" | "__asm__" | "__asm" | "asm" | "__extension__"
    )
}

/// Recursive-descent declaration parser over preprocessed tokens. Function
/// bodies are skipped, not parsed.
pub struct Parser<'a> {
    toks: &'a [Token],
    pos: usize,
    typedefs: FxHashSet<String>,
    enum_values: FxHashMap<String, i64>,
    decls: Vec<Declaration>,
    diagnostics: Vec<Diagnostic>,
    docs: &'a [Token],
    // end offset of the previous top-level declaration, for doc attachment
    last_end: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Parser<'a> {
    pub fn new(toks: &'a [Token]) -> Self {
        Self {
            toks,
            pos: 0,
            typedefs: FxHashSet::default(),
            enum_values: FxHashMap::default(),
            decls: Vec::new(),
            diagnostics: Vec::new(),
            docs: &[],
            last_end: 0,
            cancel: None,
        }
    }

    pub fn with_doc_comments(mut self, docs: &'a [Token]) -> Self {
        self.docs = docs;
        self
    }

    /// Checked before each top-level declaration.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn peek(&self) -> Option<&'a Token> {
        self.toks.get(self.pos)
    }

    fn peek_nth(&self, n: usize) -> Option<&'a Token> {
        self.toks.get(self.pos + n)
    }

    fn bump(&mut self) -> Result<&'a Token> {
        let tok = self
            .toks
            .get(self.pos)
            .ok_or_else(|| anyhow!("unexpected end of input"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn peek_is_punct(&self, p: P) -> bool {
        self.peek().is_some_and(|t| t.is_punct(p))
    }

    fn describe_peek(&self) -> String {
        match self.peek() {
            Some(t) => format!("`{}`", t.text),
            None => "end of input".to_string(),
        }
    }

    fn expect_punct(&mut self, p: P) -> Result<()> {
        if self.consume_punct(p) {
            return Ok(());
        }
        bail!("expected `{}`, found {}", p.as_str(), self.describe_peek())
    }

    fn consume_punct(&mut self, p: P) -> bool {
        if self.peek_is_punct(p) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn consume_keyword(&mut self, kw: Kw) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(kw)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn consume_qualifier(&mut self) -> bool {
        match self.peek().map(|t| &t.kind) {
            Some(K::Keyword(Kw::Const | Kw::Volatile | Kw::Restrict | Kw::Atomic)) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    /// Span from `start` to the last consumed token.
    fn span_from(&self, start: &Span) -> Span {
        match self.toks.get(..self.pos).and_then(|s| s.last()) {
            Some(last) => start.to(&last.span),
            None => start.clone(),
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }

    pub fn parse(mut self) -> TranslationUnit {
        let mut cancelled = false;
        while self.pos < self.toks.len() {
            if self.cancelled() {
                debug!("parse cancelled after {} declarations", self.decls.len());
                cancelled = true;
                break;
            }
            if self.consume_punct(P::Semicolon) {
                continue;
            }
            let start = self.pos;
            let committed = self.decls.len();
            if let Err(e) = self.parse_external_declaration() {
                self.decls.truncate(committed);
                if let Some(at) = self.toks.get(self.pos).or_else(|| self.toks.last()) {
                    let d = Diagnostic::new(DiagnosticKind::SyntaxError, &at.span, format!("{:#}", e));
                    debug!("{}", d);
                    self.diagnostics.push(d);
                }
                self.recover(start);
            }
            if let Some(prev) = self.toks.get(..self.pos).and_then(|s| s.last()) {
                self.last_end = self.last_end.max(prev.span.end);
            }
        }
        TranslationUnit {
            declarations: self.decls,
            diagnostics: self.diagnostics,
            cancelled,
        }
    }

    /// Skip from `start` past the next `;` or balanced `{...}` at the top
    /// level. Always makes progress.
    fn recover(&mut self, start: usize) {
        let mut depth = 0usize;
        let mut i = start;
        while let Some(t) = self.toks.get(i) {
            i += 1;
            match t.kind {
                K::Punct(P::LBrace) => depth += 1,
                K::Punct(P::RBrace) => {
                    if depth <= 1 {
                        break;
                    }
                    depth -= 1;
                }
                K::Punct(P::Semicolon) if depth == 0 => break,
                _ => {}
            }
        }
        self.pos = i.max(start + 1).min(self.toks.len());
    }

    fn doc_for(&self, start: &Span) -> Option<String> {
        self.docs
            .iter()
            .filter(|d| {
                d.span.file == start.file && d.span.start >= self.last_end && d.span.end <= start.start
            })
            .last()
            .map(|d| d.text.clone())
    }

    fn push(&mut self, decl: Declaration) {
        debug!(
            "{} `{}` at {}",
            decl.entity_kind(),
            decl.name,
            decl.span
        );
        self.decls.push(decl);
    }

    fn parse_external_declaration(&mut self) -> Result<()> {
        let start = self
            .peek()
            .ok_or_else(|| anyhow!("unexpected end of input"))?
            .span
            .clone();
        let doc = self.doc_for(&start);
        let first = self.decls.len();

        if self.skip_gnu_extras() && self.consume_punct(P::Semicolon) {
            // top-level asm("...");
            return Ok(());
        }
        if self.consume_keyword(Kw::StaticAssert) {
            self.skip_parens()?;
            return self.expect_punct(P::Semicolon);
        }

        let specs = self.parse_specifiers(Ctx::TopLevel)?;
        if self.consume_punct(P::Semicolon) {
            if let (Some((kind, name)), false) = (&specs.tag_ref, specs.is_typedef) {
                let kind = match kind {
                    EntityKind::Struct => DeclKind::Struct { fields: None },
                    EntityKind::Union => DeclKind::Union { fields: None },
                    _ => DeclKind::Enum { constants: None },
                };
                self.push(Declaration {
                    name: name.clone(),
                    has_explicit_name: true,
                    span: self.span_from(&start),
                    storage: StorageClass::None,
                    quals: Qualifiers::none(),
                    doc: None,
                    kind,
                });
            }
            self.attach_doc(first, &doc);
            return Ok(());
        }

        loop {
            let d = self.parse_declarator(Ctx::TopLevel)?;
            self.skip_gnu_extras();
            let Some((name, _)) = d.name.clone() else {
                bail!("expected a declarator name, found {}", self.describe_peek());
            };

            if specs.is_typedef {
                let target = d.build(specs.base.clone(), 0);
                self.typedefs.insert(name.clone());
                self.push(Declaration {
                    name,
                    has_explicit_name: true,
                    span: self.span_from(&start),
                    storage: StorageClass::None,
                    quals: specs.quals,
                    doc: None,
                    kind: DeclKind::Typedef { target },
                });
            } else if let Some(Derivation::Function { params, variadic, kr_candidate }) = d.ops.first() {
                let ret = d.build(specs.base.clone(), 1);
                let mut params = params.clone();
                let kr_list = *kr_candidate
                    && !self.peek_is_punct(P::Semicolon)
                    && !self.peek_is_punct(P::Comma)
                    && !self.peek_is_punct(P::Assign);
                if kr_list {
                    self.parse_kr_declarations(&mut params)?;
                }
                if self.peek_is_punct(P::LBrace) {
                    let calls = self.skip_body()?;
                    self.push(Declaration {
                        name,
                        has_explicit_name: true,
                        span: self.span_from(&start),
                        storage: specs.storage,
                        quals: specs.quals,
                        doc: None,
                        kind: DeclKind::Function {
                            ret,
                            params,
                            variadic: *variadic,
                            has_body: true,
                            is_inline: specs.is_inline,
                            calls,
                        },
                    });
                    self.attach_doc(first, &doc);
                    return Ok(());
                }
                self.push(Declaration {
                    name,
                    has_explicit_name: true,
                    span: self.span_from(&start),
                    storage: specs.storage,
                    quals: specs.quals,
                    doc: None,
                    kind: DeclKind::Function {
                        ret,
                        params,
                        variadic: *variadic,
                        has_body: false,
                        is_inline: specs.is_inline,
                        calls: Vec::new(),
                    },
                });
            } else {
                let ty = d.build(specs.base.clone(), 0);
                let init = if self.consume_punct(P::Assign) {
                    let toks = self.capture_until(&[P::Comma, P::Semicolon]);
                    if toks.is_empty() {
                        bail!("expected an initializer for `{}`", name);
                    }
                    Some(render_tokens(toks))
                } else {
                    None
                };
                self.push(Declaration {
                    name,
                    has_explicit_name: true,
                    span: self.span_from(&start),
                    storage: specs.storage,
                    quals: specs.quals,
                    doc: None,
                    kind: DeclKind::Variable { ty, init },
                });
            }

            if self.consume_punct(P::Comma) {
                continue;
            }
            self.expect_punct(P::Semicolon)?;
            break;
        }
        self.attach_doc(first, &doc);
        Ok(())
    }

    fn attach_doc(&mut self, first: usize, doc: &Option<String>) {
        if doc.is_none() {
            return;
        }
        for d in self.decls.iter_mut().skip(first) {
            if d.doc.is_none() && !matches!(d.kind, DeclKind::EnumConstant { .. }) {
                d.doc = doc.clone();
            }
        }
    }

    // Unknown identifier in specifier position with no base type yet.
    fn looks_like_type_name(&self, ctx: Ctx) -> bool {
        if ctx == Ctx::Param {
            return true;
        }
        match self.peek_nth(1).map(|t| &t.kind) {
            Some(K::Identifier(_)) | Some(K::Punct(P::Star)) => true,
            Some(K::Keyword(Kw::Const | Kw::Volatile | Kw::Restrict)) => true,
            _ => false,
        }
    }

    fn parse_specifiers(&mut self, ctx: Ctx) -> Result<Specifiers> {
        let mut words: Vec<Kw> = Vec::new();
        let mut base: Option<Type> = None;
        let mut storage = StorageClass::None;
        let mut quals = Qualifiers::none();
        let mut is_typedef = false;
        let mut is_inline = false;
        let mut tag_ref = None;
        let mut seen_any = false;

        while let Some(tok) = self.peek() {
            match &tok.kind {
                K::Keyword(kw) => {
                    match kw {
                        Kw::Typedef => is_typedef = true,
                        Kw::Static => storage = StorageClass::Static,
                        Kw::Extern => storage = StorageClass::Extern,
                        Kw::Register => storage = StorageClass::Register,
                        Kw::Auto => storage = StorageClass::Auto,
                        Kw::ThreadLocal | Kw::Restrict | Kw::Noreturn => {}
                        Kw::Const => quals.is_const = true,
                        Kw::Volatile => quals.is_volatile = true,
                        Kw::Inline => is_inline = true,
                        Kw::Atomic if self.peek_nth(1).is_some_and(|t| t.is_punct(P::LParen)) => {
                            if base.is_some() || !words.is_empty() {
                                bail!("conflicting type specifiers before `_Atomic(...)`");
                            }
                            self.pos += 2;
                            base = Some(self.parse_type_name()?);
                            self.expect_punct(P::RParen)?;
                            seen_any = true;
                            continue;
                        }
                        Kw::Atomic => {}
                        Kw::Alignas => {
                            self.pos += 1;
                            self.skip_parens()?;
                            seen_any = true;
                            continue;
                        }
                        Kw::Void
                        | Kw::Char
                        | Kw::Short
                        | Kw::Int
                        | Kw::Long
                        | Kw::Float
                        | Kw::Double
                        | Kw::Signed
                        | Kw::Unsigned
                        | Kw::Bool
                        | Kw::Complex
                        | Kw::Imaginary => {
                            if let Some(b) = &base {
                                bail!("conflicting type specifiers: `{}` after `{}`", tok.text, b);
                            }
                            words.push(*kw);
                        }
                        Kw::Struct | Kw::Union | Kw::Enum => {
                            if base.is_some() || !words.is_empty() {
                                bail!("conflicting type specifiers before `{}`", tok.text);
                            }
                            let (ty, r) = self.parse_tag_specifier()?;
                            base = Some(ty);
                            tag_ref = r;
                            seen_any = true;
                            continue;
                        }
                        _ => break,
                    }
                    self.pos += 1;
                    seen_any = true;
                }
                K::Identifier(name) => {
                    if is_gnu_extra(name) {
                        self.skip_gnu_extras();
                        continue;
                    }
                    if base.is_some() || !words.is_empty() {
                        break;
                    }
                    if self.typedefs.contains(name.as_str()) || self.looks_like_type_name(ctx) {
                        base = Some(Type::Named(name.clone()));
                        self.pos += 1;
                        seen_any = true;
                        continue;
                    }
                    break;
                }
                _ => break,
            }
        }

        let base = match base {
            Some(b) => b,
            None if !words.is_empty() => Type::Primitive(normalize_primitive(&words)?),
            // `static x;`, `const *p;`: implicit int
            None if seen_any => Type::int(),
            None => bail!("expected declaration specifiers, found {}", self.describe_peek()),
        };
        Ok(Specifiers {
            base,
            storage,
            quals,
            is_typedef,
            is_inline,
            tag_ref,
        })
    }

    fn parse_type_name(&mut self) -> Result<Type> {
        let specs = self.parse_specifiers(Ctx::Param)?;
        let d = self.parse_declarator(Ctx::Param)?;
        Ok(d.build(specs.base, 0))
    }

    /// At `struct`/`union`/`enum`. A body is registered as a definition
    /// right away, before the declaration that contains it.
    fn parse_tag_specifier(&mut self) -> Result<(Type, Option<(EntityKind, String)>)> {
        let kw_tok = self.bump()?;
        let kind = match kw_tok.kind {
            K::Keyword(Kw::Struct) => EntityKind::Struct,
            K::Keyword(Kw::Union) => EntityKind::Union,
            _ => EntityKind::Enum,
        };
        let make = |n: String| match kind {
            EntityKind::Struct => Type::Struct(n),
            EntityKind::Union => Type::Union(n),
            _ => Type::Enum(n),
        };
        self.skip_gnu_extras();
        let tag = match self.peek().and_then(Token::ident) {
            Some(n) => {
                self.pos += 1;
                Some(n.to_string())
            }
            None => None,
        };

        if !self.peek_is_punct(P::LBrace) {
            let name = tag.ok_or_else(|| {
                anyhow!("expected a tag name or `{{` after `{}`, found {}", kw_tok.text, self.describe_peek())
            })?;
            return Ok((make(name.clone()), Some((kind, name))));
        }

        let (name, explicit) = match tag {
            Some(n) => (n, true),
            None => (format!("{}@{}:{}", kind, kw_tok.span.line, kw_tok.span.column), false),
        };
        self.pos += 1;
        let decl_kind = match kind {
            EntityKind::Struct => DeclKind::Struct { fields: Some(self.parse_fields()?) },
            EntityKind::Union => DeclKind::Union { fields: Some(self.parse_fields()?) },
            _ => DeclKind::Enum { constants: Some(self.parse_enumerators()?) },
        };
        let constants = match &decl_kind {
            DeclKind::Enum { constants: Some(c) } => c.clone(),
            _ => Vec::new(),
        };
        self.push(Declaration {
            name: name.clone(),
            has_explicit_name: explicit,
            span: self.span_from(&kw_tok.span),
            storage: StorageClass::None,
            quals: Qualifiers::none(),
            doc: None,
            kind: decl_kind,
        });
        for c in constants {
            self.push(Declaration {
                name: c.name,
                has_explicit_name: true,
                span: c.span,
                storage: StorageClass::None,
                quals: Qualifiers::none(),
                doc: None,
                kind: DeclKind::EnumConstant { enum_name: name.clone(), value: c.value },
            });
        }
        self.skip_gnu_extras();
        Ok((make(name), None))
    }

    /// After `{`; consumes the closing `}`.
    fn parse_fields(&mut self) -> Result<Vec<Field>> {
        let mut fields = Vec::new();
        loop {
            if self.consume_punct(P::RBrace) {
                break;
            }
            if self.peek().is_none() {
                bail!("unterminated member list");
            }
            if self.consume_punct(P::Semicolon) {
                continue;
            }
            if self.consume_keyword(Kw::StaticAssert) {
                self.skip_parens()?;
                self.expect_punct(P::Semicolon)?;
                continue;
            }
            let specs = self.parse_specifiers(Ctx::Field)?;
            if self.consume_punct(P::Semicolon) {
                // anonymous struct/union member
                fields.push(Field { name: None, ty: specs.base, bit_width: None });
                continue;
            }
            loop {
                let (name, ty) = if self.peek_is_punct(P::Colon) {
                    (None, specs.base.clone())
                } else {
                    let d = self.parse_declarator(Ctx::Field)?;
                    (d.name.as_ref().map(|(n, _)| n.clone()), d.build(specs.base.clone(), 0))
                };
                let bit_width = if self.consume_punct(P::Colon) {
                    let w = self.capture_until(&[P::Comma, P::Semicolon]);
                    if w.is_empty() {
                        bail!("expected a bit-field width, found {}", self.describe_peek());
                    }
                    Some(render_tokens(w))
                } else {
                    None
                };
                self.skip_gnu_extras();
                fields.push(Field { name, ty, bit_width });
                if self.consume_punct(P::Comma) {
                    continue;
                }
                self.expect_punct(P::Semicolon)?;
                break;
            }
        }
        Ok(fields)
    }

    /// After `{`; consumes the closing `}`. Implicit values count up from the
    /// previous one; an explicit value that cannot be evaluated makes it and
    /// the implicit values after it unknown.
    fn parse_enumerators(&mut self) -> Result<Vec<EnumConstant>> {
        let mut out = Vec::new();
        let mut next: Option<i64> = Some(0);
        loop {
            if self.consume_punct(P::RBrace) {
                break;
            }
            let tok = self.bump()?;
            let name = tok
                .ident()
                .ok_or_else(|| anyhow!("expected an enumerator name, found `{}`", tok.text))?
                .to_string();
            self.skip_gnu_extras();
            let (value, explicit) = if self.consume_punct(P::Assign) {
                let expr = self.capture_until(&[P::Comma, P::RBrace]);
                if expr.is_empty() {
                    bail!("expected a value for enumerator `{}`", name);
                }
                let known = &self.enum_values;
                let v = pp::eval_int_expr(expr, |n| known.get(n).copied()).ok();
                (v, Some(render_tokens(expr)))
            } else {
                (next, None)
            };
            if let Some(v) = value {
                self.enum_values.insert(name.clone(), v);
            }
            next = value.and_then(|v| v.checked_add(1));
            out.push(EnumConstant {
                name,
                value,
                explicit,
                span: self.span_from(&tok.span),
            });
            if self.consume_punct(P::Comma) {
                continue;
            }
            self.expect_punct(P::RBrace)?;
            break;
        }
        Ok(out)
    }

    // `(` opening a nested declarator rather than a parameter list.
    fn is_nested_declarator(&self) -> bool {
        match self.peek_nth(1).map(|t| &t.kind) {
            Some(K::Punct(P::Star | P::Caret | P::LParen)) => true,
            Some(K::Identifier(n)) => !self.typedefs.contains(n.as_str()),
            _ => false,
        }
    }

    fn parse_declarator(&mut self, ctx: Ctx) -> Result<Declarator> {
        let mut ptrs = 0usize;
        loop {
            if self.consume_punct(P::Star) {
                ptrs += 1;
                continue;
            }
            if ptrs > 0 && self.consume_qualifier() {
                continue;
            }
            if self.skip_gnu_extras() {
                continue;
            }
            break;
        }

        let mut name = None;
        let mut ops: Vec<Derivation> = Vec::new();
        if self.peek_is_punct(P::LParen) && self.is_nested_declarator() {
            self.pos += 1;
            let inner = self.parse_declarator(ctx)?;
            self.expect_punct(P::RParen)?;
            name = inner.name;
            ops = inner.ops;
        } else if let Some(tok) = self.peek() {
            if let Some(id) = tok.ident() {
                name = Some((id.to_string(), tok.span.clone()));
                self.pos += 1;
            }
        }

        loop {
            if self.consume_punct(P::LBracket) {
                ops.push(Derivation::Array(self.parse_array_extent()?));
                continue;
            }
            if self.consume_punct(P::LParen) {
                let (params, variadic, kr_candidate) = self.parse_params()?;
                ops.push(Derivation::Function { params, variadic, kr_candidate });
                continue;
            }
            break;
        }
        ops.extend(std::iter::repeat_with(|| Derivation::Pointer).take(ptrs));
        Ok(Declarator { name, ops })
    }

    /// After `[`; consumes the `]`.
    fn parse_array_extent(&mut self) -> Result<ArrayExtent> {
        while self.consume_keyword(Kw::Static) || self.consume_qualifier() {}
        if self.consume_punct(P::RBracket) {
            return Ok(ArrayExtent::Unsized);
        }
        let expr = self.capture_until(&[P::RBracket]);
        self.expect_punct(P::RBracket)?;
        match expr {
            [t] if matches!(t.kind, K::Literal(LiteralKind::Int { .. })) => parse_int_literal(&t.text)
                .map(|v| ArrayExtent::Fixed(v as u64))
                .ok_or_else(|| anyhow!("invalid array size `{}`", t.text)),
            _ => Ok(ArrayExtent::Unresolved(render_tokens(expr))),
        }
    }

    /// After `(`; consumes the `)`.
    fn parse_params(&mut self) -> Result<(Vec<Param>, bool, bool)> {
        if self.consume_punct(P::RParen) {
            return Ok((Vec::new(), false, false));
        }
        if self.peek().is_some_and(|t| t.is_keyword(Kw::Void))
            && self.peek_nth(1).is_some_and(|t| t.is_punct(P::RParen))
        {
            self.pos += 2;
            return Ok((Vec::new(), false, false));
        }

        let mut params = Vec::new();
        let mut variadic = false;
        let mut kr_candidate = true;
        loop {
            if self.consume_punct(P::Ellipsis) {
                variadic = true;
                kr_candidate = false;
                self.expect_punct(P::RParen)?;
                break;
            }
            let specs = self.parse_specifiers(Ctx::Param)?;
            let d = self.parse_declarator(Ctx::Param)?;
            self.skip_gnu_extras();
            let unknown_name = match &specs.base {
                Type::Named(n) => !self.typedefs.contains(n.as_str()),
                _ => false,
            };
            kr_candidate &= unknown_name && d.name.is_none() && d.ops.is_empty();
            let ty = d.build(specs.base, 0);
            params.push(Param {
                name: d.name.map(|(n, _)| n),
                ty,
                quals: specs.quals,
            });
            if self.consume_punct(P::Comma) {
                continue;
            }
            self.expect_punct(P::RParen)?;
            break;
        }
        Ok((params, variadic, kr_candidate))
    }

    /// `int f(a, b) int a; char *b; { ... }`: the identifier list was parsed
    /// as unnamed parameters of unknown types. Names come from the list,
    /// types from the declarations (implicit int when missing).
    fn parse_kr_declarations(&mut self, params: &mut [Param]) -> Result<()> {
        for p in params.iter_mut() {
            if let Type::Named(n) = &p.ty {
                p.name = Some(n.clone());
                p.ty = Type::int();
            }
        }
        let resume = self.pos;
        if let Err(e) = self.parse_kr_list(params) {
            debug!("skipping K&R parameter declarations: {:#}", e);
            self.pos = resume;
            while !self.peek_is_punct(P::LBrace) {
                self.bump()?;
            }
        }
        Ok(())
    }

    fn parse_kr_list(&mut self, params: &mut [Param]) -> Result<()> {
        while !self.peek_is_punct(P::LBrace) {
            let specs = self.parse_specifiers(Ctx::TopLevel)?;
            loop {
                let d = self.parse_declarator(Ctx::TopLevel)?;
                if let Some((n, _)) = &d.name {
                    if let Some(p) = params.iter_mut().find(|p| p.name.as_deref() == Some(n.as_str())) {
                        p.ty = d.build(specs.base.clone(), 0);
                        p.quals = specs.quals;
                    }
                }
                if self.consume_punct(P::Comma) {
                    continue;
                }
                self.expect_punct(P::Semicolon)?;
                break;
            }
        }
        Ok(())
    }

    /// At `{`. Skips the balanced body and returns the called identifiers.
    fn skip_body(&mut self) -> Result<Vec<String>> {
        let open = self.bump()?.span.clone();
        let mut depth = 1usize;
        let mut calls: Vec<String> = Vec::new();
        while depth > 0 {
            let tok = self
                .peek()
                .ok_or_else(|| anyhow!("unterminated function body starting at {}", open))?;
            self.pos += 1;
            match &tok.kind {
                K::Punct(P::LBrace) => depth += 1,
                K::Punct(P::RBrace) => depth -= 1,
                K::Identifier(name) if self.peek_is_punct(P::LParen) => {
                    let member = self
                        .toks
                        .get(self.pos.wrapping_sub(2))
                        .is_some_and(|p| p.is_punct(P::Dot) || p.is_punct(P::Arrow));
                    if !member && !calls.contains(name) {
                        calls.push(name.clone());
                    }
                }
                _ => {}
            }
        }
        Ok(calls)
    }

    /// At `(`; skips to the matching `)`.
    fn skip_parens(&mut self) -> Result<()> {
        self.expect_punct(P::LParen)?;
        let mut depth = 1usize;
        while depth > 0 {
            let tok = self.bump().map_err(|_| anyhow!("unbalanced parentheses"))?;
            if tok.is_punct(P::LParen) {
                depth += 1;
            } else if tok.is_punct(P::RParen) {
                depth -= 1;
            }
        }
        Ok(())
    }

    /// `__attribute__((...))`, `__asm__(...)`, `__extension__`. Returns
    /// whether anything was skipped.
    fn skip_gnu_extras(&mut self) -> bool {
        let mut skipped = false;
        while let Some(name) = self.peek().and_then(Token::ident) {
            if !is_gnu_extra(name) {
                break;
            }
            self.pos += 1;
            if name != "__extension__" && self.peek_is_punct(P::LParen) && self.skip_parens().is_err() {
                break;
            }
            skipped = true;
        }
        skipped
    }

    /// Tokens up to (not including) the first of `stops` outside brackets.
    fn capture_until(&mut self, stops: &[P]) -> &'a [Token] {
        let toks = self.toks;
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(t) = toks.get(self.pos) {
            if let K::Punct(p) = t.kind {
                if depth == 0 && stops.contains(&p) {
                    break;
                }
                match p {
                    P::LParen | P::LBracket | P::LBrace => depth += 1,
                    P::RParen | P::RBracket | P::RBrace => {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    }
                    _ => {}
                }
            }
            self.pos += 1;
        }
        &toks[start..self.pos]
    }
}

fn normalize_primitive(words: &[Kw]) -> Result<String> {
    let count = |k: Kw| words.iter().filter(|w| **w == k).count();
    let unsigned = count(Kw::Unsigned) > 0;
    let signed = count(Kw::Signed) > 0;
    let longs = count(Kw::Long);
    let complex = if count(Kw::Complex) + count(Kw::Imaginary) > 0 { " _Complex" } else { "" };
    if signed && unsigned {
        bail!("both `signed` and `unsigned` in declaration specifiers");
    }
    if count(Kw::Void) > 0 {
        if words.len() > 1 {
            bail!("`void` combined with other type specifiers");
        }
        return Ok("void".to_string());
    }
    if count(Kw::Bool) > 0 {
        return Ok("_Bool".to_string());
    }
    if count(Kw::Float) > 0 {
        return Ok(format!("float{}", complex));
    }
    if count(Kw::Double) > 0 {
        let d = if longs > 0 { "long double" } else { "double" };
        return Ok(format!("{}{}", d, complex));
    }
    if !complex.is_empty() && count(Kw::Int) + count(Kw::Char) + count(Kw::Short) + longs == 0 {
        return Ok(format!("double{}", complex));
    }
    let sign = if unsigned { "unsigned " } else { "" };
    let s = if count(Kw::Char) > 0 {
        if signed {
            "signed char".to_string()
        } else {
            format!("{}char", sign)
        }
    } else if count(Kw::Short) > 0 {
        format!("{}short", sign)
    } else if longs >= 2 {
        format!("{}long long", sign)
    } else if longs == 1 {
        format!("{}long", sign)
    } else {
        format!("{}int", sign)
    };
    Ok(s)
}
