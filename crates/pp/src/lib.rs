//! Preprocessor: directives, conditional compilation and macro expansion
//! over the token stream of one translation unit.
//!
//! `#include` is recorded, never followed. Tokens of inactive regions are
//! not dropped; they go to a side channel tagged with the branch that
//! disabled them.

mod expand;
pub mod expr;
pub mod macros;

use lex::{
    render_tokens, Diagnostic, DiagnosticKind, FileId, IntBase, Lexer, LiteralKind,
    Punctuator as P, Span, Token, TokenKind,
};
use log::{debug, trace};
use serde::Serialize;

use expand::Expander;
pub use macros::{parse_define, MacroDefinition, MacroKind, MacroTable};

pub const DEFAULT_MAX_EXPANSION_DEPTH: usize = 4096;
pub const PREDEFINED_FILE: &str = "<predefined>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConditionalKind {
    If,
    Ifdef,
    Ifndef,
    Elif,
    Else,
}

/// One open `#if` group on the conditional stack.
#[derive(Debug, Clone)]
pub struct ConditionalFrame {
    pub kind: ConditionalKind,
    /// Whether the current branch of this group is selected. Always false
    /// when the enclosing region is inactive.
    pub result: bool,
    /// Some branch of the group has already been selected.
    pub taken: bool,
    pub else_seen: bool,
    pub parent_active: bool,
    /// Index into the branch records of the branch currently open.
    pub branch: usize,
    pub span: Span,
}

/// Record of one branch of a conditional group (`#if`, each `#elif`,
/// `#else`).
#[derive(Debug, Clone, Serialize)]
pub struct ConditionalBranch {
    pub id: usize,
    pub kind: ConditionalKind,
    pub condition: String,
    pub line: u32,
    /// Line of the directive closing this branch; 0 while still open.
    pub end_line: u32,
    /// Branch enclosing the whole group.
    pub parent: Option<usize>,
    /// Macro names the condition refers to.
    pub dependencies: Vec<String>,
    pub taken: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncludeDirective {
    pub path: String,
    /// `<...>` rather than `"..."`.
    pub system: bool,
    pub span: Span,
}

/// A token (or directive token) skipped because its region was disabled.
#[derive(Debug, Clone, Serialize)]
pub struct InactiveToken {
    pub branch: usize,
    pub token: Token,
}

/// Everything the preprocessor produced for one translation unit.
#[derive(Debug, Clone)]
pub struct PreprocessedUnit {
    pub file: FileId,
    /// Expanded tokens of the active regions, comments removed.
    pub tokens: Vec<Token>,
    pub doc_comments: Vec<Token>,
    pub inactive: Vec<InactiveToken>,
    pub branches: Vec<ConditionalBranch>,
    pub includes: Vec<IncludeDirective>,
    pub macros: MacroTable,
    pub diagnostics: Vec<Diagnostic>,
    /// A fatal diagnostic stopped preprocessing; `tokens` holds what came
    /// before it.
    pub halted: bool,
}

impl PreprocessedUnit {
    /// Expanded text, one space between tokens that were separated.
    pub fn text(&self) -> String {
        render_tokens(&self.tokens)
    }
}

pub struct Preprocessor {
    file: FileId,
    macros: MacroTable,
    stack: Vec<ConditionalFrame>,
    branches: Vec<ConditionalBranch>,
    includes: Vec<IncludeDirective>,
    inactive: Vec<InactiveToken>,
    doc_comments: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
    max_depth: usize,
    halted: bool,
}

impl Preprocessor {
    pub fn new(file: FileId) -> Self {
        Self {
            file,
            macros: MacroTable::new(),
            stack: Vec::new(),
            branches: Vec::new(),
            includes: Vec::new(),
            inactive: Vec::new(),
            doc_comments: Vec::new(),
            diagnostics: Vec::new(),
            max_depth: DEFAULT_MAX_EXPANSION_DEPTH,
            halted: false,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Open conditional groups, outermost first.
    pub fn conditional_stack(&self) -> &[ConditionalFrame] {
        &self.stack
    }

    /// Every enclosing conditional branch is selected.
    pub fn is_active(&self) -> bool {
        self.stack.iter().all(|f| f.result)
    }

    /// Add a definition. An identical redefinition is a no-op; a different
    /// one replaces the old definition and yields a diagnostic for the caller
    /// to record.
    pub fn define(&mut self, mut def: MacroDefinition) -> Option<Diagnostic> {
        def.dependencies = self.dependencies_of(&def);
        let diag = match self.macros.get(&def.name) {
            Some(prev) if prev.same_definition(&def) => {
                trace!("identical redefinition of `{}`", def.name);
                return None;
            }
            Some(prev) => Some(Diagnostic::new(
                DiagnosticKind::MacroError,
                &def.span,
                format!(
                    "macro `{}` redefined with a different body (previous definition at {})",
                    def.name, prev.span
                ),
            )),
            None => None,
        };
        if let Some(prev) = self.macros.get(&def.name) {
            def.first_defined = prev.first_defined.clone();
        }
        debug!("define {} = {}", def.name, def.body_text());
        self.macros.insert(def);
        diag
    }

    /// Define from text, as with `-DNAME=BODY` or `-DF(x)=BODY`. The
    /// definition is marked predefined.
    pub fn define_text(&mut self, name: &str, body: &str) -> Result<Option<Diagnostic>, Diagnostic> {
        let src = format!("{} {}", name, body);
        let file = FileId::new(PREDEFINED_FILE);
        let mut lexer = Lexer::new(&src, file.clone());
        let toks: Vec<Token> = lexer.by_ref().filter(|t| !t.is_comment()).collect();
        let whole = Span {
            file,
            start: 0,
            end: src.len(),
            line: 1,
            column: 1,
        };
        if let Some(d) = lexer.take_diagnostics().into_iter().next() {
            return Err(d.non_fatal());
        }
        let mut def = parse_define(&toks, whole.clone())
            .map_err(|e| Diagnostic::new(DiagnosticKind::MacroError, &whole, e.to_string()))?;
        def.predefined = true;
        Ok(self.define(def))
    }

    pub fn undefine(&mut self, name: &str) -> bool {
        self.macros.remove(name).is_some()
    }

    /// Expand macros in `tokens` with the current definitions. Running it
    /// again on its own output changes nothing.
    pub fn expand(&mut self, tokens: Vec<Token>) -> Vec<Token> {
        let mut ex = Expander::new(&self.macros, self.max_depth);
        let out = ex.expand(tokens);
        if ex.exceeded {
            self.halted = true;
        }
        self.diagnostics.append(&mut ex.diagnostics);
        out
    }

    fn dependencies_of(&self, def: &MacroDefinition) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        for t in &def.body {
            let Some(n) = t.macro_name() else { continue };
            if n == def.name || def.params().iter().any(|p| p == n) {
                continue;
            }
            if self.macros.contains(n) && !deps.iter().any(|d| d == n) {
                deps.push(n.to_string());
            }
        }
        deps
    }

    fn current_branch(&self) -> usize {
        self.stack.last().map_or(0, |f| f.branch)
    }

    fn report(&mut self, kind: DiagnosticKind, span: &Span, message: impl Into<String>) {
        let d = Diagnostic::new(kind, span, message);
        debug!("{}", d);
        self.diagnostics.push(d);
    }

    fn report_fatal(&mut self, kind: DiagnosticKind, span: &Span, message: impl Into<String>) {
        let d = Diagnostic::new(kind, span, message).fatal();
        debug!("{}", d);
        self.diagnostics.push(d);
        self.halted = true;
    }

    /// Preprocess `src`, consuming the preprocessor.
    pub fn run(mut self, src: &str) -> PreprocessedUnit {
        let mut lexer = Lexer::new(src, self.file.clone());
        let mut out: Vec<Token> = Vec::new();
        let mut pending: Vec<Token> = Vec::new();
        let mut line: Vec<Token> = Vec::new();
        let mut in_directive = false;

        while let Some(tok) = lexer.next_token() {
            let lex_diags = lexer.take_diagnostics();

            if in_directive && tok.at_line_start {
                self.directive(&line);
                line.clear();
                in_directive = false;
                if self.halted {
                    break;
                }
            }
            if !in_directive && tok.at_line_start && tok.is_punct(P::Hash) {
                self.flush(&mut pending, &mut out);
                if self.halted {
                    break;
                }
                in_directive = true;
            }

            if !lex_diags.is_empty() {
                // `#error don't` is free text, not C tokens
                let free_text = in_directive
                    && matches!(line.get(1).and_then(Token::ident), Some("error" | "warning"));
                if self.is_active() && !free_text {
                    self.flush(&mut pending, &mut out);
                    self.diagnostics.extend(lex_diags);
                    self.halted = true;
                    break;
                }
                self.diagnostics
                    .extend(lex_diags.into_iter().map(Diagnostic::non_fatal));
            }

            if tok.is_comment() {
                if !in_directive && tok.is_doc_comment() && self.is_active() {
                    self.doc_comments.push(tok);
                }
                continue;
            }
            if in_directive {
                line.push(tok);
            } else if self.is_active() {
                pending.push(tok);
            } else {
                let branch = self.current_branch();
                self.inactive.push(InactiveToken { branch, token: tok });
            }
        }

        if !self.halted {
            if in_directive {
                self.directive(&line);
            }
            self.flush(&mut pending, &mut out);
        }
        if !self.halted {
            if let Some(frame) = self.stack.last().cloned() {
                self.report_fatal(
                    DiagnosticKind::ConditionalError,
                    &frame.span,
                    format!("unterminated #{} at end of file", directive_name(frame.kind)),
                );
            }
        }

        debug!(
            "preprocessed {}: {} tokens, {} inactive, {} macros, {} diagnostics",
            self.file,
            out.len(),
            self.inactive.len(),
            self.macros.len(),
            self.diagnostics.len()
        );
        PreprocessedUnit {
            file: self.file,
            tokens: out,
            doc_comments: self.doc_comments,
            inactive: self.inactive,
            branches: self.branches,
            includes: self.includes,
            macros: self.macros,
            diagnostics: self.diagnostics,
            halted: self.halted,
        }
    }

    fn flush(&mut self, pending: &mut Vec<Token>, out: &mut Vec<Token>) {
        if pending.is_empty() {
            return;
        }
        let toks = std::mem::take(pending);
        out.extend(self.expand(toks));
    }

    /// `line[0]` is the `#`.
    fn directive(&mut self, line: &[Token]) {
        let Some(hash) = line.first() else { return };
        let span = match line.last() {
            Some(last) => hash.span.to(&last.span),
            None => hash.span.clone(),
        };
        let Some(name) = line.get(1).and_then(Token::macro_name) else {
            // null directive, or `# 12 "file"` line markers
            return;
        };
        let args = &line[2..];
        let active = self.is_active();
        trace!("#{} at {} (active: {})", name, span, active);

        match name {
            "if" | "ifdef" | "ifndef" => self.open_group(name, args, &span),
            "elif" => self.elif(args, &span),
            "else" => self.else_branch(&span),
            "endif" => self.endif(&span),
            _ if !active => {
                let branch = self.current_branch();
                self.inactive.extend(
                    line.iter()
                        .cloned()
                        .map(|token| InactiveToken { branch, token }),
                );
            }
            "define" => match parse_define(args, span.clone()) {
                Ok(def) => {
                    if let Some(d) = self.define(def) {
                        self.diagnostics.push(d);
                    }
                }
                Err(e) => self.report(DiagnosticKind::MacroError, &span, e.to_string()),
            },
            "undef" => match args.first().and_then(Token::macro_name) {
                Some(n) => {
                    debug!("undef {}", n);
                    self.undefine(n);
                }
                None => self.report(DiagnosticKind::MacroError, &span, "macro name missing in #undef"),
            },
            "include" | "include_next" | "import" => self.include(args, &span),
            "error" => {
                let msg = render_tokens(args);
                self.report(DiagnosticKind::MacroError, &span, format!("#error {}", msg));
            }
            "warning" | "pragma" | "line" | "ident" | "sccs" | "assert" | "unassert" => {
                trace!("ignoring #{}", name);
            }
            other => debug!("{}: unknown directive #{}", span, other),
        }
    }

    fn include(&mut self, args: &[Token], span: &Span) {
        let parsed = parse_include(args).or_else(|| {
            // `#include MACRO`
            let expanded = self.expand(args.to_vec());
            parse_include(&expanded)
        });
        match parsed {
            Some((path, system)) => {
                debug!("include {} (system: {})", path, system);
                self.includes.push(IncludeDirective {
                    path,
                    system,
                    span: span.clone(),
                });
            }
            None => self.report(
                DiagnosticKind::MacroError,
                span,
                format!("malformed #include `{}`", render_tokens(args)),
            ),
        }
    }

    fn open_branch(&mut self, kind: ConditionalKind, args: &[Token], span: &Span, parent: Option<usize>) -> usize {
        let id = self.branches.len();
        let dependencies = condition_dependencies(args);
        self.branches.push(ConditionalBranch {
            id,
            kind,
            condition: render_tokens(args),
            line: span.line,
            end_line: 0,
            parent,
            dependencies,
            taken: false,
        });
        id
    }

    fn close_branch(&mut self, id: usize, line: u32) {
        if let Some(b) = self.branches.get_mut(id) {
            b.end_line = line;
        }
    }

    fn open_group(&mut self, name: &str, args: &[Token], span: &Span) {
        let kind = match name {
            "ifdef" => ConditionalKind::Ifdef,
            "ifndef" => ConditionalKind::Ifndef,
            _ => ConditionalKind::If,
        };
        let parent_active = self.is_active();
        let parent = self.stack.last().map(|f| f.branch);
        let branch = self.open_branch(kind, args, span, parent);

        // conditions inside a disabled region are never evaluated
        let result = parent_active
            && match kind {
                ConditionalKind::If => self.eval_condition(args, span),
                _ => match args.first().and_then(Token::macro_name) {
                    Some(n) => self.macros.contains(n) == (kind == ConditionalKind::Ifdef),
                    None => {
                        self.report(
                            DiagnosticKind::MacroError,
                            span,
                            format!("macro name missing in #{}", name),
                        );
                        false
                    }
                },
            };
        self.branches[branch].taken = result;
        self.stack.push(ConditionalFrame {
            kind,
            result,
            taken: result,
            else_seen: false,
            parent_active,
            branch,
            span: span.clone(),
        });
    }

    fn elif(&mut self, args: &[Token], span: &Span) {
        let Some(frame) = self.stack.last().cloned() else {
            self.report_fatal(DiagnosticKind::ConditionalError, span, "#elif without #if");
            return;
        };
        if frame.else_seen {
            self.report(DiagnosticKind::ConditionalError, span, "#elif after #else");
            if let Some(top) = self.stack.last_mut() {
                top.result = false;
            }
            return;
        }
        self.close_branch(frame.branch, span.line);
        let parent = self.branches[frame.branch].parent;
        let branch = self.open_branch(ConditionalKind::Elif, args, span, parent);
        let result = frame.parent_active && !frame.taken && self.eval_condition(args, span);
        self.branches[branch].taken = result;
        if let Some(top) = self.stack.last_mut() {
            top.kind = ConditionalKind::Elif;
            top.result = result;
            top.taken |= result;
            top.branch = branch;
        }
    }

    fn else_branch(&mut self, span: &Span) {
        let Some(frame) = self.stack.last().cloned() else {
            self.report_fatal(DiagnosticKind::ConditionalError, span, "#else without #if");
            return;
        };
        if frame.else_seen {
            self.report(DiagnosticKind::ConditionalError, span, "#else after #else");
            if let Some(top) = self.stack.last_mut() {
                top.result = false;
            }
            return;
        }
        self.close_branch(frame.branch, span.line);
        let parent = self.branches[frame.branch].parent;
        let branch = self.open_branch(ConditionalKind::Else, &[], span, parent);
        let result = frame.parent_active && !frame.taken;
        self.branches[branch].taken = result;
        if let Some(top) = self.stack.last_mut() {
            top.kind = ConditionalKind::Else;
            top.result = result;
            top.taken = true;
            top.else_seen = true;
            top.branch = branch;
        }
    }

    fn endif(&mut self, span: &Span) {
        match self.stack.pop() {
            Some(frame) => self.close_branch(frame.branch, span.line),
            None => self.report_fatal(DiagnosticKind::ConditionalError, span, "#endif without #if"),
        }
    }

    /// `defined X` / `defined(X)` are replaced before expansion; identifiers
    /// left after expansion count as 0.
    fn eval_condition(&mut self, args: &[Token], span: &Span) -> bool {
        if args.is_empty() {
            self.report(DiagnosticKind::MacroError, span, "#if with no expression");
            return false;
        }
        let mut replaced: Vec<Token> = Vec::with_capacity(args.len());
        let mut i = 0;
        while i < args.len() {
            let t = &args[i];
            if t.ident() != Some("defined") {
                replaced.push(t.clone());
                i += 1;
                continue;
            }
            let (name, next) = match args.get(i + 1) {
                Some(p) if p.is_punct(P::LParen) => {
                    let closed = args.get(i + 3).is_some_and(|c| c.is_punct(P::RParen));
                    match args.get(i + 2).and_then(Token::macro_name) {
                        Some(n) if closed => (Some(n), i + 4),
                        _ => (None, i + 1),
                    }
                }
                Some(n) => (n.macro_name(), i + 2),
                None => (None, i + 1),
            };
            let Some(name) = name else {
                self.report(DiagnosticKind::MacroError, &t.span, "`defined` requires a macro name");
                return false;
            };
            let value = if self.macros.contains(name) { "1" } else { "0" };
            replaced.push(Token {
                kind: TokenKind::Literal(LiteralKind::Int { base: IntBase::Dec }),
                text: value.to_string(),
                ..t.clone()
            });
            i = next;
        }

        let expanded = self.expand(replaced);
        match expr::evaluate(&expanded, |_| Some(0)) {
            Ok(v) => v != 0,
            Err(e) => {
                self.report(
                    DiagnosticKind::MacroError,
                    span,
                    format!("invalid #if condition `{}`: {}", render_tokens(args), e),
                );
                false
            }
        }
    }
}

fn directive_name(kind: ConditionalKind) -> &'static str {
    match kind {
        ConditionalKind::If => "if",
        ConditionalKind::Ifdef => "ifdef",
        ConditionalKind::Ifndef => "ifndef",
        ConditionalKind::Elif => "elif",
        ConditionalKind::Else => "else",
    }
}

fn parse_include(args: &[Token]) -> Option<(String, bool)> {
    let first = args.first()?;
    if matches!(first.kind, TokenKind::Literal(LiteralKind::String)) {
        let path = first.text.strip_prefix('"')?.strip_suffix('"')?;
        return Some((path.to_string(), false));
    }
    if first.is_punct(P::Lt) {
        let close = args.iter().position(|t| t.is_punct(P::Gt))?;
        let path: String = args[1..close].iter().map(|t| t.text.as_str()).collect();
        return Some((path, true));
    }
    None
}

fn condition_dependencies(args: &[Token]) -> Vec<String> {
    let mut deps: Vec<String> = Vec::new();
    for t in args {
        match t.ident() {
            Some("defined") | None => {}
            Some(n) => {
                if !deps.iter().any(|d| d == n) {
                    deps.push(n.to_string());
                }
            }
        }
    }
    deps
}

/// Evaluate a constant expression in a declaration (enum values, array
/// sizes) where `lookup` resolves known names.
pub fn eval_int_expr<F>(tokens: &[Token], lookup: F) -> anyhow::Result<i64>
where
    F: Fn(&str) -> Option<i64>,
{
    expr::evaluate(tokens, lookup)
}
