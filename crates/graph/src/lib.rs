use lex::{Diagnostic, DiagnosticKind, Span};
use log::debug;
use parse::{ArrayExtent, DeclKind, Declaration, EntityKind, Type};
use pp::MacroTable;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

pub const DEFAULT_TYPEDEF_CHAIN_LIMIT: usize = 64;

/// One named entity of a translation unit. `decl` holds the current shape:
/// the definition once one is seen, otherwise the latest declaration.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub decl: Declaration,
    /// First declaration that was not a definition.
    pub forward_span: Option<Span>,
    pub definition_span: Option<Span>,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        self.decl.entity_kind()
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn is_defined(&self) -> bool {
        self.definition_span.is_some()
    }
}

/// All entities and the macro table of one translation unit, indexed by
/// (kind, name) in first-seen order.
#[derive(Debug, Clone, Serialize)]
pub struct EntityGraph {
    entities: Vec<Entity>,
    #[serde(skip)]
    index: FxHashMap<(EntityKind, String), usize>,
    macros: MacroTable,
    diagnostics: Vec<Diagnostic>,
    #[serde(skip)]
    chain_limit: usize,
    #[serde(skip)]
    reported_cycles: FxHashSet<Vec<String>>,
}

impl Default for EntityGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityGraph {
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            index: FxHashMap::default(),
            macros: MacroTable::new(),
            diagnostics: Vec::new(),
            chain_limit: DEFAULT_TYPEDEF_CHAIN_LIMIT,
            reported_cycles: FxHashSet::default(),
        }
    }

    pub fn with_chain_limit(mut self, limit: usize) -> Self {
        self.chain_limit = limit;
        self
    }

    /// Register `decls` in order and take ownership of `macros`.
    pub fn build<I>(decls: I, macros: MacroTable) -> Self
    where
        I: IntoIterator<Item = Declaration>,
    {
        let mut g = Self::new();
        g.set_macros(macros);
        for d in decls {
            g.register(d);
        }
        g
    }

    pub fn set_macros(&mut self, macros: MacroTable) {
        self.macros = macros;
    }

    pub fn macro_table(&self) -> &MacroTable {
        &self.macros
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, kind: EntityKind, name: &str) -> Option<&Entity> {
        self.index
            .get(&(kind, name.to_string()))
            .map(|&i| &self.entities[i])
    }

    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(move |e| e.kind() == kind)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn warn(&mut self, span: &Span, message: String) {
        let d = Diagnostic::new(DiagnosticKind::SemanticWarning, span, message);
        debug!("{}", d);
        self.diagnostics.push(d);
    }

    /// Merge `decl` into the graph. A definition refines an earlier forward
    /// declaration; a forward declaration never replaces a definition.
    /// Conflicting shapes warn and the most recent one wins.
    pub fn register(&mut self, mut decl: Declaration) {
        let key = (decl.entity_kind(), decl.name.clone());
        let is_def = decl.is_definition();
        let Some(&i) = self.index.get(&key) else {
            debug!("register {} `{}` at {}", key.0, key.1, decl.span);
            let span = decl.span.clone();
            self.index.insert(key, self.entities.len());
            self.entities.push(Entity {
                forward_span: (!is_def).then(|| span.clone()),
                definition_span: is_def.then_some(span),
                decl,
            });
            return;
        };

        let old = &self.entities[i];
        let conflict = shape_conflict(&old.decl, &decl);
        let second_body = is_def
            && old.is_defined()
            && matches!(old.decl.kind, DeclKind::Function { has_body: true, .. });
        let previous = old.definition_span.clone().unwrap_or_else(|| old.decl.span.clone());
        if decl.doc.is_none() {
            decl.doc = old.decl.doc.clone();
        }

        if second_body {
            self.warn(
                &decl.span,
                format!("redefinition of function `{}` (previous definition at {})", decl.name, previous),
            );
        } else if let Some(detail) = &conflict {
            self.warn(
                &decl.span,
                format!(
                    "conflicting declaration of {} `{}` ({}), previous at {}",
                    key.0, decl.name, detail, previous
                ),
            );
        }

        let entity = &mut self.entities[i];
        if is_def {
            entity.definition_span = Some(decl.span.clone());
            entity.decl = decl;
        } else if entity.is_defined() {
            debug!("keeping definition of `{}` over later declaration", entity.decl.name);
        } else {
            if entity.forward_span.is_none() {
                entity.forward_span = Some(decl.span.clone());
            }
            entity.decl = decl;
        }
    }

    fn typedef_target(&self, name: &str) -> Option<&Type> {
        match &self.get(EntityKind::Typedef, name)?.decl.kind {
            DeclKind::Typedef { target } => Some(target),
            _ => None,
        }
    }

    /// Canonical form of `ty`: typedef names are replaced by what they name,
    /// through pointers, arrays and function types. Unknown names, cycles and
    /// chains longer than the limit become `Unresolved`.
    pub fn resolve(&self, ty: &Type) -> Type {
        let mut chain: Vec<String> = Vec::new();
        self.resolve_in(ty, &mut chain)
    }

    fn resolve_in(&self, ty: &Type, chain: &mut Vec<String>) -> Type {
        match ty {
            Type::Named(name) => {
                if chain.len() >= self.chain_limit || chain.contains(name) {
                    return Type::Unresolved(name.clone());
                }
                let Some(target) = self.typedef_target(name) else {
                    return Type::Unresolved(name.clone());
                };
                chain.push(name.clone());
                let out = self.resolve_in(target, chain);
                chain.pop();
                out
            }
            Type::Pointer(inner) => Type::Pointer(Box::new(self.resolve_in(inner, chain))),
            Type::Array(inner, ext) => Type::Array(Box::new(self.resolve_in(inner, chain)), ext.clone()),
            Type::Func { ret, params, variadic } => Type::Func {
                ret: Box::new(self.resolve_in(ret, chain)),
                params: params.iter().map(|p| self.resolve_in(p, chain)).collect(),
                variadic: *variadic,
            },
            other => other.clone(),
        }
    }

    /// Alias chain starting at typedef `name`: `["C", "B", "A"]` for
    /// `typedef int A; typedef A B; typedef B C;`. Stops at a repeat.
    pub fn typedef_chain(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cur = name.to_string();
        while chain.len() < self.chain_limit && !chain.contains(&cur) {
            let next = match self.typedef_target(&cur) {
                Some(Type::Named(n)) => Some(n.clone()),
                Some(_) => None,
                None if chain.is_empty() => return chain,
                None => None,
            };
            chain.push(cur);
            match next {
                Some(n) => cur = n,
                None => break,
            }
        }
        chain
    }

    /// Report each typedef cycle once. Returns the number of new cycles.
    pub fn check_typedef_cycles(&mut self) -> usize {
        let found = self.find_cycles();
        let mut new = 0;
        for cycle in found {
            if !self.reported_cycles.insert(cycle.clone()) {
                continue;
            }
            new += 1;
            let Some(first) = self.get(EntityKind::Typedef, &cycle[0]) else {
                continue;
            };
            let span = first.decl.span.clone();
            let mut names = cycle.clone();
            names.push(cycle[0].clone());
            self.warn(&span, format!("typedef cycle: {}", names.join(" -> ")));
        }
        new
    }

    /// Depth-first over typedef references with an explicit stack. Every
    /// typedef is finished at most once; each reference back into the current
    /// path closes one cycle.
    fn find_cycles<'g>(&'g self) -> Vec<Vec<String>> {
        struct Visit<'a> {
            name: &'a str,
            refs: Vec<&'a str>,
            next: usize,
        }
        let visit = |name: &'g str| -> Option<Visit<'g>> {
            let mut refs = Vec::new();
            named_refs(self.typedef_target(name)?, &mut refs);
            Some(Visit { name, refs, next: 0 })
        };

        let mut found: Vec<Vec<String>> = Vec::new();
        let mut finished: FxHashSet<&str> = FxHashSet::default();
        let mut on_path: FxHashMap<&str, usize> = FxHashMap::default();
        for root in self.of_kind(EntityKind::Typedef) {
            if finished.contains(root.name()) {
                continue;
            }
            let Some(first) = visit(root.name()) else { continue };
            on_path.insert(first.name, 0);
            let mut stack = vec![first];
            while let Some(top) = stack.last_mut() {
                let Some(&r) = top.refs.get(top.next) else {
                    let done = top.name;
                    stack.pop();
                    on_path.remove(done);
                    finished.insert(done);
                    continue;
                };
                top.next += 1;
                if let Some(&pos) = on_path.get(r) {
                    let members: Vec<String> = stack[pos..].iter().map(|v| v.name.to_string()).collect();
                    let cycle = self.canonical_cycle(&members);
                    if !found.contains(&cycle) {
                        found.push(cycle);
                    }
                } else if !finished.contains(r) {
                    if let Some(next) = visit(r) {
                        on_path.insert(r, stack.len());
                        stack.push(next);
                    }
                }
            }
        }
        found
    }

    // Rotated to start at the member registered first.
    fn canonical_cycle(&self, members: &[String]) -> Vec<String> {
        let order = |n: &String| {
            self.index
                .get(&(EntityKind::Typedef, n.clone()))
                .copied()
                .unwrap_or(usize::MAX)
        };
        let start = members
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| order(n))
            .map_or(0, |(i, _)| i);
        members[start..].iter().chain(&members[..start]).cloned().collect()
    }
}

fn named_refs<'t>(ty: &'t Type, out: &mut Vec<&'t str>) {
    match ty {
        Type::Named(n) => {
            if !out.contains(&n.as_str()) {
                out.push(n);
            }
        }
        Type::Pointer(inner) | Type::Array(inner, _) => named_refs(inner, out),
        Type::Func { ret, params, .. } => {
            named_refs(ret, out);
            for p in params {
                named_refs(p, out);
            }
        }
        _ => {}
    }
}

/// `int a[]` is compatible with `int a[10]`.
fn compatible(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Array(x, ex), Type::Array(y, ey)) => {
            (ex == ey || *ex == ArrayExtent::Unsized || *ey == ArrayExtent::Unsized) && compatible(x, y)
        }
        (Type::Pointer(x), Type::Pointer(y)) => compatible(x, y),
        _ => a == b,
    }
}

/// How two declarations of one entity disagree, if they do. An empty
/// parameter list is unspecified and matches any.
fn shape_conflict(old: &Declaration, new: &Declaration) -> Option<String> {
    let name = &new.name;
    match (&old.kind, &new.kind) {
        (
            DeclKind::Function { ret: r1, params: p1, variadic: v1, .. },
            DeclKind::Function { ret: r2, params: p2, variadic: v2, .. },
        ) => {
            let params_differ = !p1.is_empty()
                && !p2.is_empty()
                && (p1.len() != p2.len()
                    || v1 != v2
                    || p1.iter().zip(p2).any(|(a, b)| !compatible(&a.ty, &b.ty)));
            if *r1 == *r2 && !params_differ {
                return None;
            }
            let spell = |ret: &Type, params: &[parse::Param], variadic: bool| {
                Type::Func {
                    ret: Box::new(ret.clone()),
                    params: params.iter().map(|p| p.ty.clone()).collect(),
                    variadic,
                }
                .declare(name)
            };
            Some(format!("`{}` vs `{}`", spell(r1, p1, *v1), spell(r2, p2, *v2)))
        }
        (DeclKind::Variable { ty: a, .. }, DeclKind::Variable { ty: b, .. })
        | (DeclKind::Typedef { target: a }, DeclKind::Typedef { target: b }) => {
            (!compatible(a, b)).then(|| format!("`{}` vs `{}`", a.declare(name), b.declare(name)))
        }
        (DeclKind::Struct { fields: Some(a) }, DeclKind::Struct { fields: Some(b) })
        | (DeclKind::Union { fields: Some(a) }, DeclKind::Union { fields: Some(b) }) => {
            (a != b).then(|| "different members".to_string())
        }
        (DeclKind::Enum { constants: Some(a) }, DeclKind::Enum { constants: Some(b) }) => {
            let same = a.len() == b.len()
                && a.iter().zip(b).all(|(x, y)| x.name == y.name && x.value == y.value);
            (!same).then(|| "different constants".to_string())
        }
        (DeclKind::EnumConstant { value: a, .. }, DeclKind::EnumConstant { value: b, .. }) => {
            (a != b).then(|| format!("value {:?} vs {:?}", a, b))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lex::FileId;

    fn graph(src: &str) -> EntityGraph {
        let tu = parse::parse_translation_unit(src, FileId::new("g.c"));
        assert!(tu.diagnostics.is_empty(), "{:?}", tu.diagnostics);
        EntityGraph::build(tu.declarations, MacroTable::new())
    }

    #[test]
    fn compatible_arrays() {
        let a = Type::Array(Box::new(Type::int()), ArrayExtent::Unsized);
        let b = Type::Array(Box::new(Type::int()), ArrayExtent::Fixed(10));
        assert!(compatible(&a, &b));
        assert!(!compatible(&b, &Type::Array(Box::new(Type::int()), ArrayExtent::Fixed(11))));
    }

    #[test]
    fn resolve_through_pointer_and_function() {
        let g = graph("typedef int I;\ntypedef I *IP;\ntypedef IP (*F)(I, char);\n");
        let f = g.resolve(&Type::Named("F".into()));
        assert_eq!(f.to_string(), "int *(*)(int, char)");
        assert!(f.is_resolved());
    }

    #[test]
    fn chain_limit_yields_unresolved() {
        let mut src = String::from("typedef int T0;\n");
        for i in 1..=10 {
            src.push_str(&format!("typedef T{} T{};\n", i - 1, i));
        }
        let tu = parse::parse_translation_unit(&src, FileId::new("g.c"));
        let g = EntityGraph::build(tu.declarations, MacroTable::new()).with_chain_limit(4);
        assert_eq!(g.resolve(&Type::Named("T3".into())), Type::int());
        assert!(!g.resolve(&Type::Named("T10".into())).is_resolved());
    }
}
