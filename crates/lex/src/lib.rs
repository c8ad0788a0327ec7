pub mod diagnostic;
pub mod keywords;
mod lexer;
pub mod token;

pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use lexer::{tokenize, Lexer};
pub use token::{
    render_tokens, FileId, IntBase, Keyword, LiteralKind, Punctuator, Span, Token, TokenKind,
};
