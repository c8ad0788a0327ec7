use graph::EntityGraph;
use lex::{DiagnosticKind, FileId};
use parse::{parse_translation_unit, DeclKind, EntityKind, Type};
use pp::MacroTable;

fn graph(src: &str) -> EntityGraph {
    let tu = parse_translation_unit(src, FileId::new("reg.c"));
    assert!(tu.diagnostics.is_empty(), "{:?}", tu.diagnostics);
    EntityGraph::build(tu.declarations, MacroTable::new())
}

#[test]
fn prototype_then_definition_is_one_entity() {
    let g = graph("/** Next day. */\nint next(int day);\nint next(int d) {\n  return d + 1;\n}\n");
    assert_eq!(g.len(), 1);
    let e = g.get(EntityKind::Function, "next").unwrap();
    assert_eq!(e.forward_span.as_ref().map(|s| s.line), Some(2));
    assert_eq!(e.definition_span.as_ref().map(|s| s.line), Some(3));
    let DeclKind::Function { params, has_body, .. } = &e.decl.kind else { unreachable!() };
    assert!(*has_body);
    assert_eq!(params[0].name.as_deref(), Some("d"));
    assert_eq!(e.decl.doc.as_deref(), Some("/** Next day. */"));
    assert!(g.diagnostics().is_empty());
}

#[test]
fn later_prototype_keeps_the_definition() {
    let g = graph("int f(int x) { return x; }\nint f(int x);\n");
    let e = g.get(EntityKind::Function, "f").unwrap();
    assert!(matches!(e.decl.kind, DeclKind::Function { has_body: true, .. }));
    assert_eq!(e.definition_span.as_ref().map(|s| s.line), Some(1));
    assert_eq!(e.forward_span, None);
    assert!(g.diagnostics().is_empty());
}

#[test]
fn struct_definition_refines_forward_reference() {
    let g = graph("struct list;\nstruct list *head;\nstruct list { int v; struct list *next; };\nstruct list;\n");
    let e = g.get(EntityKind::Struct, "list").unwrap();
    assert!(e.is_defined());
    assert_eq!(e.forward_span.as_ref().map(|s| s.line), Some(1));
    assert!(matches!(&e.decl.kind, DeclKind::Struct { fields: Some(f) } if f.len() == 2));
    let kinds: Vec<EntityKind> = g.entities().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, [EntityKind::Struct, EntityKind::Variable]);
}

#[test]
fn conflicting_prototypes_warn_and_latest_wins() {
    let g = graph("int area(int w, int h);\nlong area(int w, int h);\n");
    assert_eq!(g.diagnostics().len(), 1);
    let d = &g.diagnostics()[0];
    assert_eq!(d.kind, DiagnosticKind::SemanticWarning);
    assert!(!d.fatal);
    assert_eq!(d.line, 2);
    assert!(d.message.contains("`int area(int, int)` vs `long area(int, int)`"), "{}", d.message);
    let e = g.get(EntityKind::Function, "area").unwrap();
    assert!(matches!(&e.decl.kind, DeclKind::Function { ret, .. } if *ret == Type::Primitive("long".into())));
}

#[test]
fn unspecified_parameter_list_is_compatible() {
    let g = graph("int old();\nint old(int a, char *b);\nextern int table[];\nint table[16];\n");
    assert!(g.diagnostics().is_empty(), "{:?}", g.diagnostics());
    assert!(g.get(EntityKind::Variable, "table").unwrap().is_defined());
}

#[test]
fn second_function_body_warns() {
    let g = graph("int twice(void) { return 1; }\nint twice(void) { return 2; }\n");
    assert_eq!(g.len(), 1);
    assert_eq!(g.diagnostics().len(), 1);
    assert!(g.diagnostics()[0].message.starts_with("redefinition of function `twice`"));
    let e = g.get(EntityKind::Function, "twice").unwrap();
    assert_eq!(e.definition_span.as_ref().map(|s| s.line), Some(2));
}

#[test]
fn conflicting_struct_definitions_warn() {
    let mut g = graph("struct p { int x; };\nstruct p { int x; int y; };\nstruct p { int x; int y; };\n");
    let diags = g.take_diagnostics();
    assert_eq!(diags.len(), 1);
    assert!(diags[0].message.contains("different members"));
    assert!(g.diagnostics().is_empty());
}

#[test]
fn same_name_in_different_kinds_is_distinct() {
    let g = graph("struct stat { int size; };\nint stat(const char *path, struct stat *buf);\n");
    assert!(g.get(EntityKind::Struct, "stat").is_some());
    assert!(g.get(EntityKind::Function, "stat").is_some());
    assert!(g.diagnostics().is_empty());
}

#[test]
fn macro_table_is_owned_by_the_graph() {
    let mut p = pp::Preprocessor::new(FileId::new("m.c"));
    p.define_text("LIMIT", "10").unwrap();
    let g = EntityGraph::build(Vec::new(), p.macros().clone());
    assert!(g.macro_table().contains("LIMIT"));
    assert!(g.is_empty());
}
