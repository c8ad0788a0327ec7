use lex::FileId;
use parse::{parse_translation_unit, ArrayExtent, DeclKind, EntityKind, TranslationUnit, Type};

fn parse(src: &str) -> TranslationUnit {
    parse_translation_unit(src, FileId::new("types.c"))
}

#[test]
fn anonymous_struct_behind_typedef() {
    let tu = parse("typedef struct { int id; char name[50]; float score; } Student;\n");
    assert!(tu.diagnostics.is_empty(), "{:?}", tu.diagnostics);
    assert_eq!(tu.declarations.len(), 2);

    let s = &tu.declarations[0];
    assert_eq!(s.entity_kind(), EntityKind::Struct);
    assert_eq!(s.name, "struct@1:9");
    assert!(!s.has_explicit_name);
    let DeclKind::Struct { fields: Some(fields) } = &s.kind else {
        panic!("expected a struct definition, got {:?}", s.kind);
    };
    let shape: Vec<(Option<&str>, &Type)> = fields.iter().map(|f| (f.name.as_deref(), &f.ty)).collect();
    assert_eq!(
        shape,
        [
            (Some("id"), &Type::int()),
            (
                Some("name"),
                &Type::Array(Box::new(Type::Primitive("char".into())), ArrayExtent::Fixed(50))
            ),
            (Some("score"), &Type::Primitive("float".into())),
        ]
    );

    let t = tu.find(EntityKind::Typedef, "Student").unwrap();
    assert_eq!(t.kind, DeclKind::Typedef { target: Type::Struct("struct@1:9".into()) });
}

#[test]
fn anonymous_enum_constants_count_up() {
    let src = "typedef enum {\n  SUNDAY = 0, MONDAY, TUESDAY, WEDNESDAY, THURSDAY, FRIDAY, SATURDAY\n} DayOfWeek;\n";
    let tu = parse(src);
    assert!(tu.diagnostics.is_empty(), "{:?}", tu.diagnostics);

    let e = &tu.declarations[0];
    assert_eq!(e.name, "enum@1:9");
    let DeclKind::Enum { constants: Some(constants) } = &e.kind else {
        panic!("expected an enum definition, got {:?}", e.kind);
    };
    let values: Vec<(&str, Option<i64>)> = constants.iter().map(|c| (c.name.as_str(), c.value)).collect();
    assert_eq!(
        values,
        [
            ("SUNDAY", Some(0)),
            ("MONDAY", Some(1)),
            ("TUESDAY", Some(2)),
            ("WEDNESDAY", Some(3)),
            ("THURSDAY", Some(4)),
            ("FRIDAY", Some(5)),
            ("SATURDAY", Some(6)),
        ]
    );
    assert_eq!(constants[0].explicit.as_deref(), Some("0"));
    assert!(constants[1].explicit.is_none());

    let saturday = tu.find(EntityKind::EnumConstant, "SATURDAY").unwrap();
    assert_eq!(
        saturday.kind,
        DeclKind::EnumConstant { enum_name: "enum@1:9".into(), value: Some(6) }
    );
    assert_eq!(saturday.span.line, 2);

    let t = tu.find(EntityKind::Typedef, "DayOfWeek").unwrap();
    assert_eq!(t.kind, DeclKind::Typedef { target: Type::Enum("enum@1:9".into()) });
}

#[test]
fn enum_values_use_earlier_constants_and_give_up_on_unknowns() {
    let tu = parse("enum flags { A = 1 << 2, B, C = A | B, D = UNKNOWN + 1, E, F = 'x' };\n");
    let DeclKind::Enum { constants: Some(c) } = &tu.find(EntityKind::Enum, "flags").unwrap().kind else {
        panic!("expected a definition");
    };
    let values: Vec<Option<i64>> = c.iter().map(|c| c.value).collect();
    assert_eq!(values, [Some(4), Some(5), Some(5), None, None, Some(120)]);
    assert_eq!(c[3].explicit.as_deref(), Some("UNKNOWN + 1"));
}

#[test]
fn macro_values_are_expanded_before_evaluation() {
    let tu = parse("#define BASE 10\nenum { LOW = BASE, HIGH };\n");
    let high = tu.find(EntityKind::EnumConstant, "HIGH").unwrap();
    assert!(matches!(high.kind, DeclKind::EnumConstant { value: Some(11), .. }));
}

#[test]
fn forward_declaration_then_definition() {
    let tu = parse("struct node;\nstruct node { int v; struct node *next; };\n");
    assert_eq!(tu.declarations.len(), 2);
    assert_eq!(tu.declarations[0].kind, DeclKind::Struct { fields: None });
    assert!(!tu.declarations[0].is_definition());
    assert!(tu.declarations[1].is_definition());
    let DeclKind::Struct { fields: Some(f) } = &tu.declarations[1].kind else {
        panic!("expected a definition");
    };
    assert_eq!(f[1].ty, Type::Pointer(Box::new(Type::Struct("node".into()))));
}

#[test]
fn struct_reference_in_a_declaration_is_not_a_forward_declaration() {
    let tu = parse("struct point *origin;\n");
    assert_eq!(tu.declarations.len(), 1);
    assert_eq!(tu.declarations[0].entity_kind(), EntityKind::Variable);
}

#[test]
fn bit_fields_keep_width_text() {
    let tu = parse("struct flags { unsigned ready : 1; unsigned : 3; unsigned mode : 1 + 1; };\n");
    let DeclKind::Struct { fields: Some(f) } = &tu.declarations[0].kind else {
        panic!("expected a definition");
    };
    let widths: Vec<(Option<&str>, Option<&str>)> =
        f.iter().map(|f| (f.name.as_deref(), f.bit_width.as_deref())).collect();
    assert_eq!(widths, [(Some("ready"), Some("1")), (None, Some("3")), (Some("mode"), Some("1 + 1"))]);
    assert!(f.iter().all(|f| f.ty == Type::Primitive("unsigned int".into())));
}

#[test]
fn nested_anonymous_union_is_its_own_entity() {
    let src = "struct tagged {\n  int kind;\n  union { int i; float f; } as;\n};\n";
    let tu = parse(src);
    let kinds: Vec<(EntityKind, &str)> = tu.declarations.iter().map(|d| (d.entity_kind(), d.name.as_str())).collect();
    assert_eq!(kinds, [(EntityKind::Union, "union@3:3"), (EntityKind::Struct, "tagged")]);
    let DeclKind::Struct { fields: Some(f) } = &tu.declarations[1].kind else {
        panic!("expected a definition");
    };
    assert_eq!(f[1].ty, Type::Union("union@3:3".into()));
}

#[test]
fn non_literal_extents_are_kept_as_text() {
    let tu = parse("int grid[ROWS * 2][4];\nchar tail[];\n");
    let ty = |name: &str| match &tu.find(EntityKind::Variable, name).unwrap().kind {
        DeclKind::Variable { ty, .. } => ty.clone(),
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(ty("grid").declare("grid"), "int grid[ROWS * 2][4]");
    assert_eq!(
        ty("tail"),
        Type::Array(Box::new(Type::Primitive("char".into())), ArrayExtent::Unsized)
    );
}
