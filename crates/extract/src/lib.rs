use graph::{Entity, EntityGraph};
use lex::{render_tokens, LiteralKind, Punctuator as P, Span, Token, TokenKind as K};
use log::debug;
use parse::{DeclKind, EntityKind, StorageClass, Type};
use pp::expr::parse_int_literal;
use pp::{MacroDefinition, MacroTable};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractOptions {
    /// Also offer functions only declared in this unit.
    pub include_prototypes: bool,
    pub include_static: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { include_prototypes: false, include_static: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateParam {
    pub name: Option<String>,
    /// Canonical type.
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCandidate {
    pub name: String,
    /// Declared spelling, e.g. `const char *name_of(DayOfWeek day)`.
    pub signature: String,
    pub ret: Type,
    pub params: Vec<CandidateParam>,
    pub variadic: bool,
    pub is_static: bool,
    pub has_body: bool,
    pub calls: Vec<String>,
    pub doc: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroConstant {
    pub name: String,
    /// The literal with its sign, without wrapping parentheses.
    pub literal: String,
    /// `None` for floating constants.
    pub value: Option<i64>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroFunction {
    pub name: String,
    pub params: Vec<String>,
    pub variadic: bool,
    pub body: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestCandidate {
    Function(FunctionCandidate),
    MacroConstant(MacroConstant),
    MacroFunction(MacroFunction),
}

impl TestCandidate {
    pub fn name(&self) -> &str {
        match self {
            TestCandidate::Function(f) => &f.name,
            TestCandidate::MacroConstant(m) => &m.name,
            TestCandidate::MacroFunction(m) => &m.name,
        }
    }

    pub fn span(&self) -> &Span {
        match self {
            TestCandidate::Function(f) => &f.span,
            TestCandidate::MacroConstant(m) => &m.span,
            TestCandidate::MacroFunction(m) => &m.span,
        }
    }
}

/// Candidates from `graph` and its macro table, in order of first
/// appearance: a function counts from its earliest declaration, a macro from
/// its first definition.
pub fn extract(graph: &EntityGraph, opts: &ExtractOptions) -> Vec<TestCandidate> {
    let mut keyed: Vec<(usize, TestCandidate)> = graph
        .of_kind(EntityKind::Function)
        .filter_map(|e| {
            let c = function_candidate(graph, e, opts)?;
            Some((first_seen(e), TestCandidate::Function(c)))
        })
        .collect();
    keyed.extend(macro_candidates(graph.macro_table()));
    keyed.sort_by_key(|(at, _)| *at);
    debug!("extracted {} candidates", keyed.len());
    keyed.into_iter().map(|(_, c)| c).collect()
}

fn first_seen(e: &Entity) -> usize {
    [&e.forward_span, &e.definition_span]
        .into_iter()
        .flatten()
        .map(|s| s.start)
        .min()
        .unwrap_or(e.decl.span.start)
}

fn function_candidate(graph: &EntityGraph, e: &Entity, opts: &ExtractOptions) -> Option<FunctionCandidate> {
    let d = &e.decl;
    let DeclKind::Function { ret, params, variadic, has_body, calls, .. } = &d.kind else {
        return None;
    };
    let is_static = d.storage == StorageClass::Static;
    if (!has_body && !opts.include_prototypes) || (is_static && !opts.include_static) {
        return None;
    }

    let canon_ret = graph.resolve(ret);
    let canon_params: Vec<CandidateParam> = params
        .iter()
        .map(|p| CandidateParam { name: p.name.clone(), ty: graph.resolve(&p.ty) })
        .collect();
    if !canon_ret.is_resolved() || !canon_params.iter().all(|p| p.ty.is_resolved()) {
        debug!("skipping `{}`: unresolved types in its signature", d.name);
        return None;
    }

    let mut list: Vec<String> = params
        .iter()
        .map(|p| format!("{}{}", p.quals.prefix(), p.ty.declare(p.name.as_deref().unwrap_or(""))))
        .collect();
    if *variadic {
        list.push("...".to_string());
    }
    let list = if list.is_empty() { "void".to_string() } else { list.join(", ") };
    let signature = format!("{}{}", d.quals.prefix(), ret.declare(&format!("{}({})", d.name, list)));

    Some(FunctionCandidate {
        name: d.name.clone(),
        signature,
        ret: canon_ret,
        params: canon_params,
        variadic: *variadic,
        is_static,
        has_body: *has_body,
        calls: calls.clone(),
        doc: d.doc.clone(),
        span: d.span.clone(),
    })
}

fn macro_candidates(table: &MacroTable) -> Vec<(usize, TestCandidate)> {
    let mut pure: FxHashMap<String, bool> = FxHashMap::default();
    let mut out = Vec::new();
    for def in table.definitions() {
        if def.predefined {
            continue;
        }
        let at = def.first_defined.start;
        if def.is_function_like() {
            if is_side_effect_free(table, def, &mut pure) {
                out.push((
                    at,
                    TestCandidate::MacroFunction(MacroFunction {
                        name: def.name.clone(),
                        params: def.params().to_vec(),
                        variadic: def.is_variadic(),
                        body: def.body_text(),
                        span: def.span.clone(),
                    }),
                ));
            }
        } else if let Some(c) = numeric_constant(def) {
            out.push((at, TestCandidate::MacroConstant(c)));
        }
    }
    out
}

/// Body is one numeric literal, ignoring wrapping parentheses and a
/// leading sign: `42`, `(-1)`, `(0x10u)`, `3.5f`.
fn numeric_constant(def: &MacroDefinition) -> Option<MacroConstant> {
    let mut body: &[Token] = &def.body;
    while body.len() >= 2
        && body[0].is_punct(P::LParen)
        && body[body.len() - 1].is_punct(P::RParen)
        && encloses(body)
    {
        body = &body[1..body.len() - 1];
    }
    let (negative, lit) = match body {
        [sign, lit] if sign.is_punct(P::Minus) => (true, lit),
        [sign, lit] if sign.is_punct(P::Plus) => (false, lit),
        [lit] => (false, lit),
        _ => return None,
    };
    let value = match lit.kind {
        K::Literal(LiteralKind::Int { .. }) => {
            let v = parse_int_literal(&lit.text)?;
            Some(if negative { v.wrapping_neg() } else { v })
        }
        K::Literal(LiteralKind::Float) => None,
        _ => return None,
    };
    Some(MacroConstant {
        name: def.name.clone(),
        literal: render_tokens(body),
        value,
        span: def.span.clone(),
    })
}

// The first `(` closes at the last token.
fn encloses(body: &[Token]) -> bool {
    let mut depth = 0usize;
    for (i, t) in body.iter().enumerate() {
        if t.is_punct(P::LParen) {
            depth += 1;
        } else if t.is_punct(P::RParen) {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return i == body.len() - 1;
            }
        }
    }
    false
}

enum Scan<'t> {
    Done(bool),
    Calls(&'t MacroDefinition),
}

/// Non-empty body with no `;`, no assignment or increment, and no call other
/// than of another side-effect-free function-like macro. Callees are
/// checked with an explicit stack; a macro reached again while its own check
/// is open is recursive and counts as a call.
fn is_side_effect_free<'t>(
    table: &'t MacroTable,
    def: &'t MacroDefinition,
    memo: &mut FxHashMap<String, bool>,
) -> bool {
    if let Some(&known) = memo.get(&def.name) {
        return known;
    }
    // (macro, body position to resume at)
    let mut stack: Vec<(&'t MacroDefinition, usize)> = vec![(def, 0)];
    let mut open: FxHashSet<&str> = FxHashSet::default();
    open.insert(def.name.as_str());

    while let Some(top) = stack.last_mut() {
        let cur = top.0;
        match scan_body(table, cur, &mut top.1, memo) {
            Scan::Done(true) => {
                memo.insert(cur.name.clone(), true);
                open.remove(cur.name.as_str());
                stack.pop();
            }
            Scan::Calls(callee) if !open.contains(callee.name.as_str()) => {
                open.insert(callee.name.as_str());
                stack.push((callee, 0));
            }
            // impure, or recursive: every open caller is impure too
            Scan::Done(false) | Scan::Calls(_) => {
                for (d, _) in stack.drain(..) {
                    memo.insert(d.name.clone(), false);
                }
                return false;
            }
        }
    }
    memo.get(&def.name).copied().unwrap_or(false)
}

/// Scan `def`'s body from `*pos` up to its end or the next call of a macro
/// whose purity is not known yet.
fn scan_body<'t>(
    table: &'t MacroTable,
    def: &MacroDefinition,
    pos: &mut usize,
    memo: &FxHashMap<String, bool>,
) -> Scan<'t> {
    let body = &def.body;
    if body.is_empty() {
        return Scan::Done(false);
    }
    while let Some(t) = body.get(*pos) {
        *pos += 1;
        match &t.kind {
            K::Punct(P::Semicolon | P::Inc | P::Dec) => return Scan::Done(false),
            K::Punct(p) if p.is_assignment() => return Scan::Done(false),
            K::Identifier(name) if body.get(*pos).is_some_and(|n| n.is_punct(P::LParen)) => {
                match table.get(name) {
                    Some(callee) if callee.is_function_like() => match memo.get(name) {
                        Some(true) => {}
                        Some(false) => return Scan::Done(false),
                        None => return Scan::Calls(callee),
                    },
                    _ => return Scan::Done(false),
                }
            }
            _ => {}
        }
    }
    Scan::Done(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lex::FileId;
    use pp::Preprocessor;

    fn table(src: &str) -> MacroTable {
        Preprocessor::new(FileId::new("m.c")).run(src).macros
    }

    fn names(cands: &[(usize, TestCandidate)]) -> Vec<&str> {
        cands.iter().map(|(_, c)| c.name()).collect()
    }

    #[test]
    fn constants_strip_parens_and_sign() {
        let t = table("#define A 42\n#define B (-1)\n#define C ((0x10u))\n#define D 2.5f\n#define E (1) + (2)\n#define F -x\n#define G\n");
        let consts: Vec<(String, String, Option<i64>)> = macro_candidates(&t)
            .into_iter()
            .filter_map(|(_, c)| match c {
                TestCandidate::MacroConstant(m) => Some((m.name, m.literal, m.value)),
                _ => None,
            })
            .collect();
        assert_eq!(
            consts,
            [
                ("A".into(), "42".into(), Some(42)),
                ("B".into(), "-1".into(), Some(-1)),
                ("C".into(), "0x10u".into(), Some(16)),
                ("D".into(), "2.5f".into(), None),
            ]
        );
    }

    #[test]
    fn side_effects_disqualify_macros() {
        let src = "#define SQ(x) ((x) * (x))\n#define SET(a) (a = 1)\n#define BUMP(a) (a++)\n#define STMT(a) do { f(a); } while (0);\n#define LOG(m) puts(m)\n#define SQ2(x) SQ(SQ(x))\n#define EMPTY(x)\n#define CMP(a, b) ((a) == (b))\n";
        let cands = macro_candidates(&table(src));
        assert_eq!(names(&cands), ["SQ", "SQ2", "CMP"]);
    }

    #[test]
    fn recursive_macro_call_is_a_call() {
        let cands = macro_candidates(&table("#define F(x) F(x)\n#define G(x) H(x)\n#define H(x) G(x)\n"));
        assert!(cands.is_empty());
    }

    #[test]
    fn predefined_macros_are_skipped() {
        let mut p = Preprocessor::new(FileId::new("m.c"));
        p.define_text("VERSION", "3").unwrap();
        let unit = p.run("#define LOCAL 4\n");
        assert_eq!(names(&macro_candidates(&unit.macros)), ["LOCAL"]);
    }
}
