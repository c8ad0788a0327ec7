use lex::{tokenize, FileId, Keyword, LiteralKind, Punctuator, Token, TokenKind};

fn lex_all(src: &str) -> Vec<Token> {
    tokenize(src, FileId::new("basic.c")).collect()
}

#[test]
fn basic_c_tokens_sequence() {
    let src = r#"
        int main(void) {
            int y = 3 + 4;
            if (y >= 7) return y; else return 0;
        }
    "#;
    let toks = lex_all(src);

    use Punctuator as P;
    use TokenKind as K;

    assert!(matches!(toks[0].kind, K::Keyword(Keyword::Int)));
    assert!(matches!(toks[1].kind, K::Identifier(ref s) if s == "main"));
    assert!(matches!(toks[2].kind, K::Punct(P::LParen)));
    assert!(matches!(toks[3].kind, K::Keyword(Keyword::Void)));
    assert!(matches!(toks[4].kind, K::Punct(P::RParen)));
    assert!(matches!(toks[5].kind, K::Punct(P::LBrace)));

    // y = 3 + 4 ;
    let i = toks
        .iter()
        .position(|t| t.ident() == Some("y"))
        .expect("y present");
    assert!(matches!(toks[i + 1].kind, K::Punct(P::Assign)));
    assert!(matches!(toks[i + 2].kind, K::Literal(LiteralKind::Int { .. })));
    assert!(matches!(toks[i + 3].kind, K::Punct(P::Plus)));
    assert!(matches!(toks[i + 4].kind, K::Literal(LiteralKind::Int { .. })));
    assert!(matches!(toks[i + 5].kind, K::Punct(P::Semicolon)));

    let j = toks
        .iter()
        .position(|t| t.is_keyword(Keyword::If))
        .expect("if present");
    assert!(matches!(toks[j + 1].kind, K::Punct(P::LParen)));
    assert!(matches!(toks[j + 3].kind, K::Punct(P::Ge)));
}

#[test]
fn raw_text_is_preserved() {
    let toks = lex_all("unsigned long x = 0x1Fu; char *s = \"a\\\"b\";");
    let texts: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["unsigned", "long", "x", "=", "0x1Fu", ";", "char", "*", "s", "=", "\"a\\\"b\"", ";"]
    );
}

#[test]
fn keyword_aliases_map_to_canonical_keyword() {
    let toks = lex_all("__inline__ static _Bool f;");
    assert!(toks[0].is_keyword(Keyword::Inline));
    assert_eq!(toks[0].text, "__inline__");
    assert!(toks[2].is_keyword(Keyword::Bool));
}

#[test]
fn lexer_is_restartable_by_reinvocation() {
    let src = "int a = 1;";
    let first: Vec<Token> = lex_all(src);
    let second: Vec<Token> = lex_all(src);
    assert_eq!(first, second);
}
