use std::collections::VecDeque;

use lex::{tokenize, Diagnostic, DiagnosticKind, LiteralKind, Punctuator as P, Span, Token, TokenKind};
use log::debug;
use rustc_hash::FxHashSet;

use crate::macros::{MacroDefinition, MacroKind, MacroTable, VA_ARGS};

/// Tokens not yet read from one macro body, or from the input itself when
/// `macro_name` is `None`.
struct Context {
    tokens: VecDeque<Token>,
    macro_name: Option<String>,
}

/// An isolated expansion: the input, or one macro argument expanded before
/// substitution. Reading never goes past the end of a level.
struct Level<'a> {
    /// Innermost body last.
    contexts: Vec<Context>,
    out: Vec<Token>,
    /// Invocation whose arguments are being expanded on the levels above.
    call: Option<Invocation<'a>>,
}

impl Level<'_> {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            contexts: vec![Context { tokens: tokens.into(), macro_name: None }],
            out: Vec::new(),
            call: None,
        }
    }

    fn upcoming(&self) -> impl Iterator<Item = &Token> {
        self.contexts.iter().rev().flat_map(|c| c.tokens.iter())
    }
}

struct Invocation<'a> {
    def: &'a MacroDefinition,
    raw: Vec<Vec<Token>>,
    expanded: Vec<Vec<Token>>,
    span: Span,
    leading_space: bool,
}

/// One expansion pass over a token sequence.
///
/// Names currently being expanded live in `active`; an occurrence of one of
/// them is painted (`no_expand`) when read and never expanded again, which
/// makes the output a fixed point of another pass. Open bodies and pending
/// arguments are kept on explicit stacks, so `max_depth` bounds heap use
/// rather than native recursion.
pub(crate) struct Expander<'a> {
    macros: &'a MacroTable,
    active: FxHashSet<String>,
    depth: usize,
    max_depth: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// Set once the depth ceiling was hit; output stops at that point.
    pub exceeded: bool,
}

impl<'a> Expander<'a> {
    pub fn new(macros: &'a MacroTable, max_depth: usize) -> Self {
        Self {
            macros,
            active: FxHashSet::default(),
            depth: 0,
            max_depth,
            diagnostics: Vec::new(),
            exceeded: false,
        }
    }

    pub fn expand(&mut self, tokens: Vec<Token>) -> Vec<Token> {
        let macros = self.macros;
        let mut levels: Vec<Level<'a>> = vec![Level::new(tokens)];

        while !self.exceeded {
            let top = levels.len() - 1;
            let Some(tok) = self.next_token(&mut levels[top]) else {
                if top == 0 {
                    break;
                }
                self.finish_argument(&mut levels);
                continue;
            };
            let level = &mut levels[top];
            if tok.no_expand {
                level.out.push(tok);
                continue;
            }
            let Some(def) = tok.macro_name().and_then(|n| macros.get(n)) else {
                level.out.push(tok);
                continue;
            };

            match &def.kind {
                MacroKind::ObjectLike => {
                    if !self.enter(def, &tok.span) {
                        break;
                    }
                    let body = self.instantiate_object(def, &tok);
                    self.push_context(level, def, body);
                }
                MacroKind::FunctionLike { params, variadic } => {
                    // `#define f g` then `f(1)`: the `(` may come from an
                    // enclosing body or the input after it
                    if !level.upcoming().next().is_some_and(|t| t.is_punct(P::LParen)) {
                        // plain text; painted once final so another pass
                        // cannot join it with a `(` produced later
                        let mut tok = tok;
                        tok.no_expand = top == 0;
                        level.out.push(tok);
                        continue;
                    }
                    let Some((args, close)) = split_args(level.upcoming(), params.len(), *variadic) else {
                        self.report(
                            &tok.span,
                            format!("unterminated invocation of macro `{}`", def.name),
                        );
                        level.out.push(tok);
                        continue;
                    };
                    let Some(args) = match_arity(args, params.len(), *variadic) else {
                        let got = count_args(level.upcoming(), close);
                        self.report(
                            &tok.span,
                            format!(
                                "macro `{}` expects {} argument{}, got {}",
                                def.name,
                                params.len(),
                                if params.len() == 1 { "" } else { "s" },
                                got
                            ),
                        );
                        level.out.push(tok);
                        continue;
                    };

                    let mut read: Vec<Token> = Vec::with_capacity(close + 1);
                    for _ in 0..=close {
                        read.extend(self.next_token(level));
                    }
                    let call_span = match read.last() {
                        Some(last) => tok.span.to(&last.span),
                        None => tok.span.clone(),
                    };
                    // split again: reading painted names of open macros
                    let args = split_args(read.iter(), params.len(), *variadic)
                        .and_then(|(a, _)| match_arity(a, params.len(), *variadic))
                        .unwrap_or(args);
                    if !self.enter(def, &tok.span) {
                        break;
                    }

                    // arguments are fully expanded before the macro itself is active
                    let call = Invocation {
                        def,
                        expanded: Vec::with_capacity(args.len()),
                        raw: args,
                        span: call_span,
                        leading_space: tok.leading_space,
                    };
                    match call.raw.first() {
                        Some(first) => {
                            let first = first.clone();
                            level.call = Some(call);
                            levels.push(Level::new(first));
                        }
                        None => self.substitute_into(level, call),
                    }
                }
            }
        }
        levels.into_iter().next().map(|l| l.out).unwrap_or_default()
    }

    /// Next token of `level`, painted if it names a macro whose body is still
    /// open. A drained body is closed only when reading past it, so a macro
    /// stays active while the last token of its body is examined.
    fn next_token(&mut self, level: &mut Level<'_>) -> Option<Token> {
        loop {
            let ctx = level.contexts.last_mut()?;
            if let Some(mut tok) = ctx.tokens.pop_front() {
                if !tok.no_expand && tok.macro_name().is_some_and(|n| self.active.contains(n)) {
                    tok.no_expand = true;
                }
                return Some(tok);
            }
            if let Some(name) = level.contexts.pop().and_then(|c| c.macro_name) {
                self.active.remove(&name);
                self.depth = self.depth.saturating_sub(1);
            }
        }
    }

    /// The top level finished one argument of the invocation below it.
    fn finish_argument(&mut self, levels: &mut Vec<Level<'a>>) {
        let Some(done) = levels.pop() else { return };
        let Some(parent) = levels.last_mut() else { return };
        let Some(call) = parent.call.as_mut() else { return };
        call.expanded.push(done.out);
        if let Some(next) = call.raw.get(call.expanded.len()) {
            let next = next.clone();
            levels.push(Level::new(next));
            return;
        }
        if let Some(call) = parent.call.take() {
            self.substitute_into(parent, call);
        }
    }

    fn substitute_into(&mut self, level: &mut Level<'a>, call: Invocation<'a>) {
        let def = call.def;
        let mut body = self.substitute(def, def.params(), &call.raw, &call.expanded, &call.span);
        if let Some(first) = body.first_mut() {
            first.leading_space = call.leading_space;
        }
        self.push_context(level, def, body);
    }

    fn push_context(&mut self, level: &mut Level<'a>, def: &MacroDefinition, body: Vec<Token>) {
        self.active.insert(def.name.clone());
        level.contexts.push(Context {
            tokens: body.into(),
            macro_name: Some(def.name.clone()),
        });
    }

    fn enter(&mut self, def: &MacroDefinition, span: &Span) -> bool {
        if self.depth >= self.max_depth {
            if !self.exceeded {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticKind::MacroError,
                        span,
                        format!(
                            "macro expansion depth limit ({}) exceeded while expanding `{}`",
                            self.max_depth, def.name
                        ),
                    )
                    .fatal(),
                );
            }
            self.exceeded = true;
            return false;
        }
        self.depth += 1;
        true
    }

    fn report(&mut self, span: &Span, message: String) {
        debug!("{}: {}", span, message);
        self.diagnostics
            .push(Diagnostic::new(DiagnosticKind::MacroError, span, message));
    }

    fn instantiate_object(&mut self, def: &MacroDefinition, tok: &Token) -> Vec<Token> {
        let mut out: Vec<Token> = Vec::with_capacity(def.body.len());
        let mut i = 0;
        while i < def.body.len() {
            let t = &def.body[i];
            if t.is_punct(P::HashHash) && !out.is_empty() {
                if let Some(rhs) = def.body.get(i + 1) {
                    let lhs = out.pop().into_iter().collect::<Vec<_>>();
                    let pasted = self.paste(lhs, vec![relocate(rhs, &tok.span)], &tok.span);
                    out.extend(pasted);
                    i += 2;
                    continue;
                }
            }
            out.push(relocate(t, &tok.span));
            i += 1;
        }
        if let Some(first) = out.first_mut() {
            first.leading_space = tok.leading_space;
        }
        out
    }

    fn substitute(
        &mut self,
        def: &MacroDefinition,
        params: &[String],
        raw: &[Vec<Token>],
        expanded: &[Vec<Token>],
        call: &Span,
    ) -> Vec<Token> {
        let param_index = |t: &Token| -> Option<usize> {
            let n = t.macro_name()?;
            params.iter().position(|p| p == n)
        };
        let body = &def.body;
        let mut out: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < body.len() {
            let t = &body[i];

            if t.is_punct(P::Hash) {
                if let Some(idx) = body.get(i + 1).and_then(&param_index) {
                    let mut s = stringize(&raw[idx], call);
                    s.leading_space = t.leading_space;
                    out.push(s);
                    i += 2;
                    continue;
                }
            }

            if t.is_punct(P::HashHash) {
                let Some(next) = body.get(i + 1) else {
                    i += 1;
                    continue;
                };
                let rhs: Vec<Token> = match param_index(next) {
                    Some(idx) => {
                        // GNU: `, ## __VA_ARGS__` drops the comma when empty
                        if raw[idx].is_empty()
                            && params[idx] == VA_ARGS
                            && out.last().is_some_and(|c| c.is_punct(P::Comma))
                        {
                            out.pop();
                            i += 2;
                            continue;
                        }
                        raw[idx].clone()
                    }
                    None => vec![relocate(next, call)],
                };
                let lhs = out.pop().into_iter().collect::<Vec<_>>();
                out.extend(self.paste(lhs, rhs, call));
                i += 2;
                continue;
            }

            if let Some(idx) = param_index(t) {
                // operands of `##` take the argument as written
                let pasted_next = body.get(i + 1).is_some_and(|n| n.is_punct(P::HashHash));
                let source = if pasted_next { &raw[idx] } else { &expanded[idx] };
                let start = out.len();
                out.extend(source.iter().cloned());
                if let Some(first) = out.get_mut(start) {
                    first.leading_space = t.leading_space;
                }
                i += 1;
                continue;
            }

            out.push(relocate(t, call));
            i += 1;
        }
        out
    }

    /// Paste the last token of `lhs` with the first of `rhs`. Either side
    /// may be empty (an empty argument).
    fn paste(&mut self, mut lhs: Vec<Token>, rhs: Vec<Token>, call: &Span) -> Vec<Token> {
        let mut rhs = rhs.into_iter();
        let Some(left) = lhs.pop() else {
            return rhs.collect();
        };
        let Some(right) = rhs.next() else {
            lhs.push(left);
            return lhs;
        };
        let text = format!("{}{}", left.text, right.text);
        let mut lexer = tokenize(&text, call.file.clone());
        let relexed: Vec<Token> = lexer.by_ref().collect();
        let clean = lexer.take_diagnostics().is_empty();

        if relexed.len() == 1 && clean && relexed[0].text == text && !relexed[0].is_comment() {
            let mut tok = relexed.into_iter().next().map(|t| Token { span: call.clone(), ..t });
            if let Some(t) = tok.as_mut() {
                t.leading_space = left.leading_space;
            }
            lhs.extend(tok);
        } else {
            self.report(
                call,
                format!(
                    "pasting `{}` and `{}` does not give a valid preprocessing token",
                    left.text, right.text
                ),
            );
            lhs.push(left);
            lhs.push(Token {
                leading_space: false,
                ..right
            });
        }
        lhs.extend(rhs);
        lhs
    }
}

/// Copy of a body token positioned at the invocation.
fn relocate(t: &Token, call: &Span) -> Token {
    Token {
        span: call.clone(),
        ..t.clone()
    }
}

fn stringize(arg: &[Token], call: &Span) -> Token {
    let mut text = String::from("\"");
    for (i, t) in arg.iter().enumerate() {
        if i > 0 && t.leading_space {
            text.push(' ');
        }
        let quoted = matches!(
            t.kind,
            TokenKind::Literal(LiteralKind::String | LiteralKind::Char)
        );
        for c in t.text.chars() {
            if quoted && (c == '"' || c == '\\') {
                text.push('\\');
            }
            text.push(c);
        }
    }
    text.push('"');
    Token {
        kind: TokenKind::Literal(LiteralKind::String),
        text,
        span: call.clone(),
        at_line_start: false,
        leading_space: false,
        no_expand: false,
    }
}

/// Split the parenthesized argument list that `input` starts with. Returns
/// the raw arguments and the index of the closing `)`, or `None` when the
/// list never closes.
fn split_args<'t>(
    input: impl Iterator<Item = &'t Token>,
    nparams: usize,
    variadic: bool,
) -> Option<(Vec<Vec<Token>>, usize)> {
    let mut args: Vec<Vec<Token>> = Vec::new();
    let mut cur: Vec<Token> = Vec::new();
    let mut depth = 0usize;
    for (i, t) in input.enumerate().skip(1) {
        match &t.kind {
            TokenKind::Punct(P::LParen) => depth += 1,
            TokenKind::Punct(P::RParen) if depth == 0 => {
                args.push(cur);
                return Some((args, i));
            }
            TokenKind::Punct(P::RParen) => depth -= 1,
            // the variadic tail keeps its commas
            TokenKind::Punct(P::Comma)
                if depth == 0 && !(variadic && args.len() + 1 >= nparams) =>
            {
                args.push(std::mem::take(&mut cur));
                continue;
            }
            _ => {}
        }
        cur.push(t.clone());
    }
    None
}

fn match_arity(mut args: Vec<Vec<Token>>, nparams: usize, variadic: bool) -> Option<Vec<Vec<Token>>> {
    if nparams == 0 && args.len() == 1 && args[0].is_empty() {
        return Some(Vec::new());
    }
    if variadic && args.len() + 1 == nparams {
        args.push(Vec::new());
    }
    (args.len() == nparams).then_some(args)
}

fn count_args<'t>(input: impl Iterator<Item = &'t Token>, close: usize) -> usize {
    if close == 1 {
        return 0;
    }
    let mut depth = 0usize;
    let mut n = 1;
    for t in input.take(close).skip(1) {
        match t.kind {
            TokenKind::Punct(P::LParen) => depth += 1,
            TokenKind::Punct(P::RParen) => depth = depth.saturating_sub(1),
            TokenKind::Punct(P::Comma) if depth == 0 => n += 1,
            _ => {}
        }
    }
    n
}
