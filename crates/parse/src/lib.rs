pub mod ast;
mod parser;

pub use ast::*;
pub use parser::Parser;

use lex::{FileId, Token};

/// Parse preprocessed tokens. `docs` are the doc comments forwarded by the
/// preprocessor; each attaches to the declaration that follows it.
pub fn parse_declarations(tokens: &[Token], docs: &[Token]) -> TranslationUnit {
    Parser::new(tokens).with_doc_comments(docs).parse()
}

/// Preprocess and parse `src` with an empty macro table. Preprocessor
/// diagnostics come first in the result.
pub fn parse_translation_unit(src: &str, file: FileId) -> TranslationUnit {
    let unit = pp::Preprocessor::new(file).run(src);
    let mut tu = parse_declarations(&unit.tokens, &unit.doc_comments);
    let mut diagnostics = unit.diagnostics;
    diagnostics.append(&mut tu.diagnostics);
    tu.diagnostics = diagnostics;
    tu
}
