//! Integer constant expressions: `#if` conditions and enum values.
//!
//! Values are computed while parsing. An operand skipped by `&&`, `||` or
//! `?:` is still parsed but cannot fail: `0 && 1 / 0` is fine, `1 / 0` is an
//! error.

use anyhow::{anyhow, bail, Result};
use lex::{LiteralKind, Punctuator as P, Token, TokenKind as K};

/// Parentheses, unary operators and `?:` arms nested deeper than this make
/// the expression invalid.
pub const MAX_NESTING: usize = 128;

/// Evaluate `tokens` as a C integer constant expression with wrapping i64
/// arithmetic. `ident` supplies the value of an identifier; `None` makes the
/// expression invalid.
pub fn evaluate<F>(tokens: &[Token], ident: F) -> Result<i64>
where
    F: Fn(&str) -> Option<i64>,
{
    let mut p = ExprParser { toks: tokens, i: 0, ident: &ident, nesting: 0 };
    if tokens.is_empty() {
        bail!("empty expression");
    }
    let v = p.parse_cond(true)?;
    if let Some(t) = p.toks.get(p.i) {
        bail!("unexpected `{}` in constant expression", t.text);
    }
    Ok(v)
}

/// Value of an integer literal, ignoring `u`/`l` suffixes.
pub fn parse_int_literal(text: &str) -> Option<i64> {
    let t = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let (digits, radix) = if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        (h, 16)
    } else if let Some(b) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        (b, 2)
    } else if t.len() > 1 && t.starts_with('0') {
        (&t[1..], 8)
    } else {
        (t, 10)
    };
    u64::from_str_radix(digits, radix).ok().map(|v| v as i64)
}

/// Value of a character literal (`'a'`, `'\n'`, `'\x41'`, `'\101'`, `L'x'`).
pub fn parse_char_literal(text: &str) -> Option<i64> {
    let open = text.find('\'')?;
    let inner = text[open + 1..].strip_suffix('\'')?;
    let bytes = inner.as_bytes();
    let mut value: i64 = 0;
    let mut i = 0;
    let mut count = 0;
    while i < bytes.len() {
        let c = if bytes[i] == b'\\' {
            i += 1;
            let e = *bytes.get(i)?;
            i += 1;
            match e {
                b'n' => 10,
                b't' => 9,
                b'r' => 13,
                b'0'..=b'7' => {
                    let mut v = (e - b'0') as i64;
                    let mut n = 1;
                    while n < 3 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                        v = v * 8 + (bytes[i] - b'0') as i64;
                        i += 1;
                        n += 1;
                    }
                    v
                }
                b'x' => {
                    let start = i;
                    while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                        i += 1;
                    }
                    i64::from_str_radix(&inner[start..i], 16).ok()?
                }
                b'a' => 7,
                b'b' => 8,
                b'f' => 12,
                b'v' => 11,
                other => other as i64,
            }
        } else {
            let ch = inner[i..].chars().next()?;
            i += ch.len_utf8();
            ch as i64
        };
        value = (value << 8) | (c & 0xff);
        count += 1;
    }
    if count == 0 {
        return None;
    }
    if count == 1 {
        // plain char is signed on the usual targets
        return Some(value as u8 as i8 as i64);
    }
    Some(value)
}

struct ExprParser<'a, F> {
    toks: &'a [Token],
    i: usize,
    ident: &'a F,
    nesting: usize,
}

impl<'a, F> ExprParser<'a, F>
where
    F: Fn(&str) -> Option<i64>,
{
    fn peek_punct(&self) -> Option<P> {
        match self.toks.get(self.i).map(|t| &t.kind) {
            Some(K::Punct(p)) => Some(*p),
            _ => None,
        }
    }

    fn eat(&mut self, p: P) -> bool {
        if self.peek_punct() == Some(p) {
            self.i += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: P) -> Result<()> {
        if self.eat(p) {
            Ok(())
        } else {
            match self.toks.get(self.i) {
                Some(t) => bail!("expected `{}`, found `{}`", p.as_str(), t.text),
                None => bail!("expected `{}` at end of expression", p.as_str()),
            }
        }
    }

    fn nest(&mut self) -> Result<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            bail!("expression nested more than {} levels deep", MAX_NESTING);
        }
        Ok(())
    }

    // `live` is false inside an operand that short-circuiting skips.
    fn parse_cond(&mut self, live: bool) -> Result<i64> {
        let c = self.parse_binary(0, live)?;
        if !self.eat(P::Question) {
            return Ok(c);
        }
        self.nest()?;
        let t = self.parse_cond(live && c != 0)?;
        self.expect(P::Colon)?;
        let e = self.parse_cond(live && c == 0)?;
        self.nesting -= 1;
        Ok(if c != 0 { t } else { e })
    }

    // Precedence climbing over the binary operators, lowest level first.
    fn parse_binary(&mut self, level: usize, live: bool) -> Result<i64> {
        const LEVELS: &[&[P]] = &[
            &[P::OrOr],
            &[P::AndAnd],
            &[P::Pipe],
            &[P::Caret],
            &[P::Amp],
            &[P::Eq, P::Ne],
            &[P::Lt, P::Gt, P::Le, P::Ge],
            &[P::Shl, P::Shr],
            &[P::Plus, P::Minus],
            &[P::Star, P::Slash, P::Percent],
        ];
        if level == LEVELS.len() {
            return self.parse_unary(live);
        }
        let mut lhs = self.parse_binary(level + 1, live)?;
        while let Some(op) = self.peek_punct().filter(|p| LEVELS[level].contains(p)) {
            self.i += 1;
            let rhs_live = match op {
                P::AndAnd => live && lhs != 0,
                P::OrOr => live && lhs == 0,
                _ => live,
            };
            let rhs = self.parse_binary(level + 1, rhs_live)?;
            lhs = binary(op, lhs, rhs, rhs_live)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, live: bool) -> Result<i64> {
        if let Some(op @ (P::Bang | P::Minus | P::Plus | P::Tilde)) = self.peek_punct() {
            self.i += 1;
            self.nest()?;
            let v = self.parse_unary(live)?;
            self.nesting -= 1;
            return Ok(match op {
                P::Bang => (v == 0) as i64,
                P::Minus => v.wrapping_neg(),
                P::Tilde => !v,
                _ => v,
            });
        }
        self.parse_primary(live)
    }

    fn parse_primary(&mut self, live: bool) -> Result<i64> {
        let tok = self
            .toks
            .get(self.i)
            .ok_or_else(|| anyhow!("unexpected end of expression"))?;
        self.i += 1;
        match &tok.kind {
            K::Punct(P::LParen) => {
                self.nest()?;
                let v = self.parse_cond(live)?;
                self.expect(P::RParen)?;
                self.nesting -= 1;
                Ok(v)
            }
            K::Literal(LiteralKind::Int { base }) => parse_int_literal(&tok.text)
                .ok_or_else(|| anyhow!("invalid {:?} integer literal `{}`", base, tok.text)),
            K::Literal(LiteralKind::Char) => parse_char_literal(&tok.text)
                .ok_or_else(|| anyhow!("invalid character literal {}", tok.text)),
            K::Literal(LiteralKind::Float) => {
                bail!("floating constant `{}` in integer expression", tok.text)
            }
            K::Identifier(name) => {
                (self.ident)(name).ok_or_else(|| anyhow!("`{}` is not an integer constant", name))
            }
            _ => bail!("unexpected `{}` in constant expression", tok.text),
        }
    }
}

// `live` is false when the right operand is skipped.
fn binary(op: P, a: i64, b: i64, live: bool) -> Result<i64> {
    Ok(match op {
        P::AndAnd => (a != 0 && b != 0) as i64,
        P::OrOr => (a != 0 || b != 0) as i64,
        P::Plus => a.wrapping_add(b),
        P::Minus => a.wrapping_sub(b),
        P::Star => a.wrapping_mul(b),
        P::Slash | P::Percent if b == 0 => {
            if live {
                bail!("division by zero");
            }
            0
        }
        P::Slash => a.wrapping_div(b),
        P::Percent => a.wrapping_rem(b),
        P::Shl => a.wrapping_shl((b & 63) as u32),
        P::Shr => a.wrapping_shr((b & 63) as u32),
        P::Lt => (a < b) as i64,
        P::Gt => (a > b) as i64,
        P::Le => (a <= b) as i64,
        P::Ge => (a >= b) as i64,
        P::Eq => (a == b) as i64,
        P::Ne => (a != b) as i64,
        P::Amp => a & b,
        P::Pipe => a | b,
        P::Caret => a ^ b,
        other => bail!("unsupported operator `{}`", other.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lex::{tokenize, FileId};

    fn eval_str(s: &str) -> Result<i64> {
        let toks: Vec<Token> = tokenize(s, FileId::new("expr")).collect();
        evaluate(&toks, |_| Some(0))
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval_str("1 + 2 * 3").unwrap(), 7);
        assert_eq!(eval_str("(1 + 2) * 3").unwrap(), 9);
        assert_eq!(eval_str("10 - 4 - 3").unwrap(), 3);
        assert_eq!(eval_str("1 << 4 | 1").unwrap(), 17);
        assert_eq!(eval_str("2 > 1 == 1").unwrap(), 1);
        assert_eq!(eval_str("-3 + ~0").unwrap(), -4);
        assert_eq!(eval_str("!0 && !5").unwrap(), 0);
    }

    #[test]
    fn ternary_is_right_associative() {
        assert_eq!(eval_str("0 ? 1 : 0 ? 2 : 3").unwrap(), 3);
        assert_eq!(eval_str("1 ? 0 ? 7 : 8 : 9").unwrap(), 8);
    }

    #[test]
    fn short_circuit_skips_division_by_zero() {
        assert_eq!(eval_str("0 && 1 / 0").unwrap(), 0);
        assert_eq!(eval_str("1 || 1 % 0").unwrap(), 1);
        assert_eq!(eval_str("1 ? 2 : 1 / 0").unwrap(), 2);
        let err = eval_str("1 / 0").unwrap_err();
        assert!(err.to_string().contains("division by zero"), "{}", err);
    }

    #[test]
    fn literals_with_suffixes_and_chars() {
        assert_eq!(eval_str("0x10UL + 010 + 0b11").unwrap(), 16 + 8 + 3);
        assert_eq!(eval_str("'A'").unwrap(), 65);
        assert_eq!(eval_str("'\\n'").unwrap(), 10);
        assert_eq!(eval_str("'\\x41' == 'A'").unwrap(), 1);
    }

    #[test]
    fn malformed_expressions_are_errors() {
        assert!(eval_str("1 +").is_err());
        assert!(eval_str("(1").is_err());
        assert!(eval_str("1 2").is_err());
        assert!(eval_str("1.5 > 1").is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        let err = eval_str(&deep).unwrap_err();
        assert!(err.to_string().contains("nested more than"), "{}", err);
        assert!(eval_str(&format!("{}0", "!".repeat(20_000))).is_err());

        let ok = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(eval_str(&ok).unwrap(), 1);
        assert_eq!(eval_str(&format!("{}1", "!".repeat(MAX_NESTING))).unwrap(), 1);
    }

    #[test]
    fn long_flat_chains_evaluate() {
        let sum = vec!["1"; 50_000].join(" + ");
        assert_eq!(eval_str(&sum).unwrap(), 50_000);
    }

    #[test]
    fn identifier_resolution_is_caller_defined() {
        let toks: Vec<Token> = tokenize("A + B", FileId::new("expr")).collect();
        let v = evaluate(&toks, |n| match n {
            "A" => Some(40),
            "B" => Some(2),
            _ => None,
        });
        assert_eq!(v.unwrap(), 42);
        assert!(evaluate(&toks, |_| None).is_err());
    }
}
