use lex::{tokenize, DiagnosticKind, FileId, IntBase, Lexer, LiteralKind, TokenKind as K};

fn first(src: &str) -> lex::Token {
    tokenize(src, FileId::new("lit.c")).next().expect("token")
}

#[test]
fn lex_string_basic_and_escape() {
    let tok = first("\"hello\\n\";");
    match tok.kind {
        K::Literal(LiteralKind::String) => {
            assert!(tok.text.starts_with('"') && tok.text.ends_with('"'));
            assert!(tok.text.contains("\\n"));
        }
        other => panic!("expected string literal, got: {:?}", other),
    }
}

#[test]
fn lex_char_basic_and_escapes() {
    assert_eq!(first("'A';").text, "'A'");
    for s in ["'\\n';", "'\\x41';", "'\\101';", "'\\'';"] {
        let tok = first(s);
        assert!(
            matches!(tok.kind, K::Literal(LiteralKind::Char)),
            "not a char literal for {}",
            s
        );
    }
}

#[test]
fn prefixed_literals() {
    assert!(matches!(first("L\"wide\"").kind, K::Literal(LiteralKind::String)));
    assert!(matches!(first("u8\"utf\"").kind, K::Literal(LiteralKind::String)));
    assert!(matches!(first("U'x'").kind, K::Literal(LiteralKind::Char)));
    // a plain identifier named L is still an identifier
    assert!(matches!(first("L + 1").kind, K::Identifier(ref s) if s == "L"));
}

#[test]
fn numeric_literals_with_suffixes() {
    let cases = [
        ("42", LiteralKind::Int { base: IntBase::Dec }),
        ("42UL", LiteralKind::Int { base: IntBase::Dec }),
        ("0x1fULL", LiteralKind::Int { base: IntBase::Hex }),
        ("0755", LiteralKind::Int { base: IntBase::Oct }),
        ("0b1010", LiteralKind::Int { base: IntBase::Bin }),
        ("3.14159", LiteralKind::Float),
        ("2.5f", LiteralKind::Float),
        ("1e-9", LiteralKind::Float),
        (".5", LiteralKind::Float),
        ("0x1.8p+3", LiteralKind::Float),
    ];
    for (src, want) in cases {
        let tok = first(src);
        assert_eq!(tok.kind, K::Literal(want), "kind for {}", src);
        assert_eq!(tok.text, src, "text for {}", src);
    }
}

#[test]
fn unterminated_string_closes_at_end_of_line() {
    let mut lx = Lexer::new("char *s = \"oops;\nint y;", FileId::new("lit.c"));
    let toks: Vec<_> = lx.by_ref().collect();
    let lit = toks
        .iter()
        .find(|t| matches!(t.kind, K::Literal(LiteralKind::String)))
        .expect("string token");
    assert_eq!(lit.text, "\"oops;");
    // lexing continues on the next line
    assert!(toks.iter().any(|t| t.ident() == Some("y")));
    let diags = lx.take_diagnostics();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].kind, DiagnosticKind::LexicalError);
    assert_eq!(diags[0].line, 1);
    assert!(diags[0].message.contains("unterminated string"));
}
