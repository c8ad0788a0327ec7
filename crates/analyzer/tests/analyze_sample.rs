use analyzer::{analyze, AnalysisResult, PredefinedMacros, TestCandidate};
use lex::{DiagnosticKind, FileId};
use parse::{ArrayExtent, DeclKind, EntityKind, Type};

const SAMPLE: &str = include_str!("fixtures/sample.c");

fn run(predefined: &PredefinedMacros) -> AnalysisResult {
    analyze(SAMPLE, FileId::new("sample.c"), predefined)
}

#[test]
fn sample_analyzes_cleanly() {
    let r = run(&PredefinedMacros::new());
    assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
    assert!(!r.halted);
    assert!(!r.cancelled);
    let includes: Vec<&str> = r.includes.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(includes, ["stdio.h", "student.h"]);
}

#[test]
fn student_struct_and_day_enum() {
    let r = run(&PredefinedMacros::new());
    let g = &r.graph;

    let student = g.get(EntityKind::Typedef, "Student").unwrap();
    let DeclKind::Typedef { target } = &student.decl.kind else { unreachable!() };
    let Type::Struct(tag) = target else { panic!("unexpected {:?}", target) };
    let s = g.get(EntityKind::Struct, tag).unwrap();
    let DeclKind::Struct { fields: Some(fields) } = &s.decl.kind else { unreachable!() };
    assert_eq!(fields[1].ty, Type::Array(Box::new(Type::Primitive("char".into())), ArrayExtent::Fixed(50)));
    assert_eq!(fields[2].ty, Type::Primitive("float".into()));

    let consts: Vec<(&str, Option<i64>)> = g
        .of_kind(EntityKind::EnumConstant)
        .map(|e| match &e.decl.kind {
            DeclKind::EnumConstant { value, .. } => (e.name(), *value),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(consts.len(), 7);
    assert_eq!(consts[0], ("SUNDAY", Some(0)));
    assert_eq!(consts[6], ("SATURDAY", Some(6)));
}

#[test]
fn prototype_and_definition_merge() {
    let r = run(&PredefinedMacros::new());
    let f = r.graph.get(EntityKind::Function, "getNextDay").unwrap();
    assert!(f.is_defined());
    assert!(f.forward_span.is_some());
    let DeclKind::Function { params, .. } = &f.decl.kind else { unreachable!() };
    let resolved = r.graph.resolve(&params[0].ty);
    assert!(matches!(resolved, Type::Enum(_)), "{:?}", resolved);
    assert!(f.decl.doc.as_deref().unwrap_or("").contains("wrapping after Saturday"));
}

#[test]
fn ifdef_selects_one_branch() {
    let release = run(&PredefinedMacros::new());
    assert!(release.graph.get(EntityKind::Variable, "release_mode").is_some());
    assert!(release.graph.get(EntityKind::Variable, "debug_level").is_none());
    assert!(release.inactive.iter().any(|t| t.token.text == "debug_level"));

    let debug = run(&PredefinedMacros::from_defines(["DEBUG"]).unwrap());
    assert!(debug.graph.get(EntityKind::Variable, "debug_level").is_some());
    assert!(debug.graph.get(EntityKind::Variable, "release_mode").is_none());
    assert!(debug.inactive.iter().any(|t| t.token.text == "release_mode"));
    assert!(debug.branches[0].taken);
    assert!(!debug.branches[1].taken);
}

#[test]
fn candidates_in_source_order() {
    let r = run(&PredefinedMacros::from_defines(["DEBUG"]).unwrap());
    let names: Vec<&str> = r.candidates.iter().map(|c| c.name()).collect();
    assert_eq!(
        names,
        ["MAX_STUDENTS", "PASS_MARK", "PI", "MAX", "getNextDay", "isPassing", "best_of", "report"]
    );
    assert!(!names.contains(&"DEBUG"));
    assert!(!names.contains(&"LOG"));
    assert!(!names.contains(&"count_students"));

    let report = r
        .candidates
        .iter()
        .find_map(|c| match c {
            TestCandidate::Function(f) if f.name == "report" => Some(f),
            _ => None,
        })
        .unwrap();
    assert_eq!(report.signature, "void report(const Student *s)");
    assert_eq!(report.calls, ["printf", "isPassing"]);
}

#[test]
fn macro_table_is_reachable_from_the_result() {
    let r = run(&PredefinedMacros::from_defines(["DEBUG=1"]).unwrap());
    let table = r.macro_table();
    assert!(table.get("DEBUG").unwrap().predefined);
    assert_eq!(table.get("MAX_STUDENTS").unwrap().body_text(), "100");
    assert_eq!(table.get("MAX").unwrap().params(), ["a", "b"]);
}

#[test]
fn result_serializes_with_spans() {
    let r = run(&PredefinedMacros::new());
    let json = serde_json::to_value(&r).unwrap();
    assert_eq!(json["file"], "sample.c");
    assert_eq!(json["halted"], false);
    let entities = json["graph"]["entities"].as_array().unwrap();
    assert_eq!(entities.len(), r.graph.len());
    let first = &entities[0]["decl"];
    assert_eq!(first["span"]["line"], 10);
    assert!(json["candidates"].as_array().unwrap().iter().any(|c| c["kind"] == "function"));
    assert!(json["diagnostics"].as_array().unwrap().is_empty());
}

#[test]
fn redefined_predefined_macro_is_a_macro_error() {
    let src = "#define LEVEL 2\nint x = LEVEL;\n";
    let r = analyze(src, FileId::new("redef.c"), &PredefinedMacros::from_defines(["LEVEL=1"]).unwrap());
    assert_eq!(r.diagnostics.len(), 1);
    assert_eq!(r.diagnostics[0].kind, DiagnosticKind::MacroError);
    assert_eq!(r.macro_table().get("LEVEL").unwrap().body_text(), "2");
    let x = r.graph.get(EntityKind::Variable, "x").unwrap();
    assert!(matches!(&x.decl.kind, DeclKind::Variable { init: Some(i), .. } if i == "2"));
}
