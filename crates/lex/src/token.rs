use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Name of the translation unit a span belongs to. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FileId(Arc<str>);

impl FileId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Byte range in a file plus the 1-based line/column of its first byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub file: FileId,
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Span from the start of `self` to the end of `other`.
    pub fn to(&self, other: &Span) -> Span {
        Span {
            file: self.file.clone(),
            start: self.start,
            end: self.end.max(other.end),
            line: self.line,
            column: self.column,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntBase {
    Dec,
    Oct,
    Hex,
    Bin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Keyword {
    Auto,
    Break,
    Case,
    Char,
    Const,
    Continue,
    Default,
    Do,
    Double,
    Else,
    Enum,
    Extern,
    Float,
    For,
    Goto,
    If,
    Inline,
    Int,
    Long,
    Register,
    Restrict,
    Return,
    Short,
    Signed,
    Sizeof,
    Static,
    Struct,
    Switch,
    Typedef,
    Union,
    Unsigned,
    Void,
    Volatile,
    While,
    Alignas,
    Alignof,
    Atomic,
    Bool,
    Complex,
    Generic,
    Imaginary,
    Noreturn,
    StaticAssert,
    ThreadLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Punctuator {
    LParen, RParen,
    LBrace, RBrace,
    LBracket, RBracket,
    Semicolon, Comma, Dot, Ellipsis,
    Arrow,
    Plus, Minus, Star, Slash, Percent,
    Inc, Dec,
    Amp, Pipe, Caret, Tilde, Bang,
    Question, Colon,
    Assign,
    PlusAssign, MinusAssign, StarAssign, SlashAssign, PercentAssign,
    Shl, Shr,
    ShlAssign, ShrAssign,
    Lt, Gt, Le, Ge, Eq, Ne,
    AndAnd, OrOr,
    AndAssign, OrAssign, XorAssign,
    Hash, HashHash,
}

impl Punctuator {
    pub fn as_str(self) -> &'static str {
        use Punctuator::*;
        match self {
            LParen => "(",
            RParen => ")",
            LBrace => "{",
            RBrace => "}",
            LBracket => "[",
            RBracket => "]",
            Semicolon => ";",
            Comma => ",",
            Dot => ".",
            Ellipsis => "...",
            Arrow => "->",
            Plus => "+",
            Minus => "-",
            Star => "*",
            Slash => "/",
            Percent => "%",
            Inc => "++",
            Dec => "--",
            Amp => "&",
            Pipe => "|",
            Caret => "^",
            Tilde => "~",
            Bang => "!",
            Question => "?",
            Colon => ":",
            Assign => "=",
            PlusAssign => "+=",
            MinusAssign => "-=",
            StarAssign => "*=",
            SlashAssign => "/=",
            PercentAssign => "%=",
            Shl => "<<",
            Shr => ">>",
            ShlAssign => "<<=",
            ShrAssign => ">>=",
            Lt => "<",
            Gt => ">",
            Le => "<=",
            Ge => ">=",
            Eq => "==",
            Ne => "!=",
            AndAnd => "&&",
            OrOr => "||",
            AndAssign => "&=",
            OrAssign => "|=",
            XorAssign => "^=",
            Hash => "#",
            HashHash => "##",
        }
    }

    /// `=` and every compound assignment.
    pub fn is_assignment(self) -> bool {
        use Punctuator::*;
        matches!(
            self,
            Assign
                | PlusAssign
                | MinusAssign
                | StarAssign
                | SlashAssign
                | PercentAssign
                | ShlAssign
                | ShrAssign
                | AndAssign
                | OrAssign
                | XorAssign
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LiteralKind {
    Int { base: IntBase },
    Float,
    Char,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Identifier(String),
    Keyword(Keyword),
    Literal(LiteralKind),
    Punct(Punctuator),
    Comment,
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text of the token (literals keep quotes, prefixes and suffixes).
    pub text: String,
    pub span: Span,
    /// First token on its logical line (comments do not count).
    pub at_line_start: bool,
    /// Preceded by whitespace or a comment.
    pub leading_space: bool,
    /// Left unexpanded because it named a macro that was already being expanded.
    #[serde(skip_serializing_if = "is_false")]
    pub no_expand: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Token {
    pub fn is_punct(&self, p: Punctuator) -> bool {
        matches!(self.kind, TokenKind::Punct(q) if q == p)
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(self.kind, TokenKind::Keyword(k) if k == kw)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(s) => Some(s),
            _ => None,
        }
    }

    /// Identifiers and keywords; both may name a macro.
    pub fn macro_name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(s) => Some(s),
            TokenKind::Keyword(_) => Some(&self.text),
            _ => None,
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.kind, TokenKind::Comment)
    }

    /// `/** */`, `/*! */`, `///` and `//!` comments.
    pub fn is_doc_comment(&self) -> bool {
        if !self.is_comment() {
            return false;
        }
        let t = self.text.as_str();
        (t.starts_with("/**") && !t.starts_with("/**/"))
            || t.starts_with("/*!")
            || (t.starts_with("///") && !t.starts_with("////"))
            || t.starts_with("//!")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Render tokens back to text, keeping a single space wherever the source had
/// whitespace between two tokens.
pub fn render_tokens<'a, I>(tokens: I) -> String
where
    I: IntoIterator<Item = &'a Token>,
{
    let mut out = String::new();
    for t in tokens {
        if t.leading_space && !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&t.text);
    }
    out
}
