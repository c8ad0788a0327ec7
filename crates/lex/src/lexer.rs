use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::keywords::to_keyword;
use crate::token::{FileId, IntBase, LiteralKind, Punctuator as P, Span, Token, TokenKind as K};

// Longest match first.
const PUNCTS: &[(&str, P)] = &[
    ("...", P::Ellipsis),
    ("<<=", P::ShlAssign),
    (">>=", P::ShrAssign),
    ("->", P::Arrow),
    ("++", P::Inc),
    ("--", P::Dec),
    ("<=", P::Le),
    (">=", P::Ge),
    ("==", P::Eq),
    ("!=", P::Ne),
    ("&&", P::AndAnd),
    ("||", P::OrOr),
    ("+=", P::PlusAssign),
    ("-=", P::MinusAssign),
    ("*=", P::StarAssign),
    ("/=", P::SlashAssign),
    ("%=", P::PercentAssign),
    ("<<", P::Shl),
    (">>", P::Shr),
    ("&=", P::AndAssign),
    ("|=", P::OrAssign),
    ("^=", P::XorAssign),
    ("##", P::HashHash),
    ("(", P::LParen),
    (")", P::RParen),
    ("{", P::LBrace),
    ("}", P::RBrace),
    ("[", P::LBracket),
    ("]", P::RBracket),
    (";", P::Semicolon),
    (",", P::Comma),
    (".", P::Dot),
    ("+", P::Plus),
    ("-", P::Minus),
    ("*", P::Star),
    ("/", P::Slash),
    ("%", P::Percent),
    ("&", P::Amp),
    ("|", P::Pipe),
    ("^", P::Caret),
    ("~", P::Tilde),
    ("!", P::Bang),
    ("?", P::Question),
    (":", P::Colon),
    ("=", P::Assign),
    ("<", P::Lt),
    (">", P::Gt),
    ("#", P::Hash),
];

/// Lazy C tokenizer. Never fails: malformed input yields diagnostics (drained
/// with [`Lexer::take_diagnostics`]) or `Unrecognized` tokens.
pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    len: usize,
    pos: usize,
    file: FileId,
    // line bookkeeping, advanced monotonically by `locate`
    line: u32,
    line_start: usize,
    scanned: usize,
    at_line_start: bool,
    after_comment: bool,
    diagnostics: Vec<Diagnostic>,
}

pub fn tokenize(src: &str, file: FileId) -> Lexer<'_> {
    Lexer::new(src, file)
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file: FileId) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            len: src.len(),
            pos: 0,
            file,
            line: 1,
            line_start: 0,
            scanned: 0,
            at_line_start: true,
            after_comment: false,
            diagnostics: Vec::new(),
        }
    }

    /// Diagnostics produced since the last call.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }
    fn peek_at(&self, n: usize) -> Option<u8> {
        self.bytes.get(self.pos + n).copied()
    }
    fn starts_with(&self, s: &str) -> bool {
        self.bytes
            .get(self.pos..)
            .is_some_and(|rest| rest.starts_with(s.as_bytes()))
    }

    fn is_ident_start(c: u8) -> bool {
        (c == b'_') || c.is_ascii_alphabetic()
    }
    fn is_ident_continue(c: u8) -> bool {
        (c == b'_') || c.is_ascii_alphanumeric()
    }

    fn locate(&mut self, offset: usize) -> (u32, u32) {
        while self.scanned < offset {
            if self.bytes[self.scanned] == b'\n' {
                self.line += 1;
                self.line_start = self.scanned + 1;
            }
            self.scanned += 1;
        }
        (self.line, (offset - self.line_start) as u32 + 1)
    }

    fn make_span(&mut self, start: usize) -> Span {
        let (line, column) = self.locate(start);
        Span {
            file: self.file.clone(),
            start,
            end: self.pos,
            line,
            column,
        }
    }

    fn report(&mut self, span: &Span, message: &str) {
        self.diagnostics
            .push(Diagnostic::new(DiagnosticKind::LexicalError, span, message).fatal());
    }

    /// Skips whitespace and line splices. Returns whether anything was skipped.
    fn skip_ws(&mut self) -> bool {
        let begin = self.pos;
        loop {
            match self.peek() {
                Some(b'\n') => {
                    self.pos += 1;
                    self.at_line_start = true;
                }
                Some(b' ' | b'\t' | b'\r' | 0x0B | 0x0C) => self.pos += 1,
                Some(b'\\') if self.starts_with("\\\n") => self.pos += 2,
                Some(b'\\') if self.starts_with("\\\r\n") => self.pos += 3,
                _ => break,
            }
        }
        self.pos != begin
    }

    fn lex_line_comment(&mut self) {
        self.pos += 2;
        while let Some(c) = self.peek() {
            if c == b'\n' {
                // a spliced newline continues the comment
                if self.pos > 0 && self.bytes[self.pos - 1] == b'\\' {
                    self.pos += 1;
                    continue;
                }
                break;
            }
            self.pos += 1;
        }
    }

    fn lex_block_comment(&mut self, start: usize) {
        self.pos += 2;
        while self.pos < self.len && !self.starts_with("*/") {
            self.pos += 1;
        }
        if self.starts_with("*/") {
            self.pos += 2;
        } else {
            let span = self.make_span(start);
            self.report(&span, "unterminated block comment");
        }
    }

    // pp-number: digits, letters, '.', '_' and signed exponents.
    fn lex_number(&mut self, start: usize) -> LiteralKind {
        let hex = self.starts_with("0x") || self.starts_with("0X");
        let bin = self.starts_with("0b") || self.starts_with("0B");
        if hex || bin {
            self.pos += 2;
        }
        while let Some(c) = self.peek() {
            let exp = if hex { b"pP" } else { b"eE" };
            if exp.contains(&c) && matches!(self.peek_at(1), Some(b'+' | b'-')) {
                self.pos += 2;
            } else if c.is_ascii_alphanumeric() || c == b'.' || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        if hex {
            if text.contains(['.', 'p', 'P']) {
                return LiteralKind::Float;
            }
            return LiteralKind::Int { base: IntBase::Hex };
        }
        if bin {
            return LiteralKind::Int { base: IntBase::Bin };
        }
        if text.contains(['.', 'e', 'E']) {
            return LiteralKind::Float;
        }
        if text.len() > 1 && text.starts_with('0') {
            LiteralKind::Int { base: IntBase::Oct }
        } else {
            LiteralKind::Int { base: IntBase::Dec }
        }
    }

    // Called with `pos` on the opening quote. Unterminated literals close at
    // end of line.
    fn lex_quoted(&mut self, start: usize, quote: u8) {
        self.pos += 1;
        let mut closed = false;
        while let Some(c) = self.peek() {
            match c {
                b'\\' => {
                    self.pos += 1;
                    if self.peek().is_some() {
                        self.pos += 1;
                    }
                }
                b'\n' => break,
                _ if c == quote => {
                    self.pos += 1;
                    closed = true;
                    break;
                }
                _ => self.pos += 1,
            }
        }
        if !closed {
            let span = self.make_span(start);
            let what = if quote == b'"' { "string" } else { "character" };
            self.report(&span, &format!("unterminated {} literal", what));
        }
    }

    fn finish(&mut self, kind: K, start: usize, leading_space: bool) -> Token {
        let span = self.make_span(start);
        let at_line_start = self.at_line_start;
        self.after_comment = matches!(kind, K::Comment);
        if !self.after_comment {
            self.at_line_start = false;
        }
        Token {
            kind,
            text: self.src[start..self.pos].to_string(),
            span,
            at_line_start,
            leading_space,
            no_expand: false,
        }
    }

    pub fn next_token(&mut self) -> Option<Token> {
        // a comment directly before this token counts as whitespace
        let leading_space = self.skip_ws() || self.after_comment;
        let start = self.pos;
        let c = self.peek()?;

        if self.starts_with("//") {
            self.lex_line_comment();
            return Some(self.finish(K::Comment, start, leading_space));
        }
        if self.starts_with("/*") {
            self.lex_block_comment(start);
            return Some(self.finish(K::Comment, start, leading_space));
        }

        // Identifier, keyword, or prefixed literal (L"", u8"", U'')
        if Self::is_ident_start(c) {
            self.pos += 1;
            while let Some(c2) = self.peek() {
                if Self::is_ident_continue(c2) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let lex = &self.src[start..self.pos];
            if matches!(lex, "L" | "u" | "U" | "u8") {
                if let Some(q @ (b'"' | b'\'')) = self.peek() {
                    self.lex_quoted(start, q);
                    let lit = if q == b'"' { LiteralKind::String } else { LiteralKind::Char };
                    return Some(self.finish(K::Literal(lit), start, leading_space));
                }
            }
            let kind = match to_keyword(lex) {
                Some(kw) => K::Keyword(kw),
                None => K::Identifier(lex.to_string()),
            };
            return Some(self.finish(kind, start, leading_space));
        }

        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            let lit = self.lex_number(start);
            return Some(self.finish(K::Literal(lit), start, leading_space));
        }

        if c == b'"' || c == b'\'' {
            self.lex_quoted(start, c);
            let lit = if c == b'"' { LiteralKind::String } else { LiteralKind::Char };
            return Some(self.finish(K::Literal(lit), start, leading_space));
        }

        for (text, p) in PUNCTS {
            if self.starts_with(text) {
                self.pos += text.len();
                return Some(self.finish(K::Punct(*p), start, leading_space));
            }
        }

        // Anything else, one UTF-8 character at a time.
        let ch_len = self.src[start..].chars().next().map_or(1, char::len_utf8);
        self.pos += ch_len;
        Some(self.finish(K::Unrecognized, start, leading_space))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.next_token()
    }
}
