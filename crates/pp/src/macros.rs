use anyhow::{anyhow, bail, Result};
use lex::{render_tokens, Punctuator as P, Span, Token};
use rustc_hash::FxHashMap;
use serde::ser::{Serialize, Serializer};

pub const VA_ARGS: &str = "__VA_ARGS__";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum MacroKind {
    ObjectLike,
    /// With `variadic`, the last parameter collects the trailing arguments
    /// (`__VA_ARGS__` for `...`, or the GNU `name...` spelling).
    FunctionLike { params: Vec<String>, variadic: bool },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MacroDefinition {
    pub name: String,
    pub kind: MacroKind,
    pub body: Vec<Token>,
    pub span: Span,
    /// Where the name was first defined. Differs from `span` once a
    /// definition has been replaced.
    pub first_defined: Span,
    /// Macros named in the body, in first-use order.
    pub dependencies: Vec<String>,
    /// Supplied by the caller rather than defined in the source.
    pub predefined: bool,
}

impl MacroDefinition {
    pub fn is_function_like(&self) -> bool {
        matches!(self.kind, MacroKind::FunctionLike { .. })
    }

    pub fn params(&self) -> &[String] {
        match &self.kind {
            MacroKind::FunctionLike { params, .. } => params,
            MacroKind::ObjectLike => &[],
        }
    }

    pub fn is_variadic(&self) -> bool {
        matches!(self.kind, MacroKind::FunctionLike { variadic: true, .. })
    }

    pub fn body_text(&self) -> String {
        render_tokens(&self.body)
    }

    /// Same kind, parameters and body tokens, whitespace between tokens
    /// compared only as present/absent.
    pub fn same_definition(&self, other: &MacroDefinition) -> bool {
        self.kind == other.kind
            && self.body.len() == other.body.len()
            && self
                .body
                .iter()
                .zip(&other.body)
                .enumerate()
                .all(|(i, (a, b))| a.text == b.text && (i == 0 || a.leading_space == b.leading_space))
    }
}

/// Parse the tokens following `#define` (name, optional parameter list, body).
/// `span` covers the whole directive.
pub fn parse_define(args: &[Token], span: Span) -> Result<MacroDefinition> {
    let name_tok = args.first().ok_or_else(|| anyhow!("macro name missing in #define"))?;
    let name = name_tok
        .macro_name()
        .ok_or_else(|| anyhow!("macro name must be an identifier, found `{}`", name_tok.text))?
        .to_string();
    if name == "defined" {
        bail!("`defined` cannot be used as a macro name");
    }

    let mut i = 1;
    // a function-like macro has `(` directly after the name
    let kind = if args.get(1).is_some_and(|t| t.is_punct(P::LParen) && !t.leading_space) {
        i = 2;
        let mut params: Vec<String> = Vec::new();
        let mut variadic = false;
        loop {
            let tok = args
                .get(i)
                .ok_or_else(|| anyhow!("unterminated parameter list in macro `{}`", name))?;
            i += 1;
            if tok.is_punct(P::RParen) && params.is_empty() {
                break;
            }
            if tok.is_punct(P::Ellipsis) {
                params.push(VA_ARGS.to_string());
                variadic = true;
            } else if let Some(p) = tok.macro_name() {
                if params.iter().any(|q| q == p) {
                    bail!("duplicate parameter `{}` in macro `{}`", p, name);
                }
                params.push(p.to_string());
                if args.get(i).is_some_and(|t| t.is_punct(P::Ellipsis)) {
                    variadic = true;
                    i += 1;
                }
            } else {
                bail!("expected parameter name in macro `{}`, found `{}`", name, tok.text);
            }
            match args.get(i) {
                Some(t) if t.is_punct(P::RParen) => {
                    i += 1;
                    break;
                }
                Some(t) if t.is_punct(P::Comma) && !variadic => i += 1,
                Some(t) => bail!("expected `,` or `)` in parameters of `{}`, found `{}`", name, t.text),
                None => bail!("unterminated parameter list in macro `{}`", name),
            }
        }
        MacroKind::FunctionLike { params, variadic }
    } else {
        MacroKind::ObjectLike
    };

    let mut body = args[i..].to_vec();
    if let Some(first) = body.first_mut() {
        first.leading_space = false;
    }
    if body.first().is_some_and(|t| t.is_punct(P::HashHash))
        || (body.len() > 1 && body.last().is_some_and(|t| t.is_punct(P::HashHash)))
    {
        bail!("`##` cannot appear at either end of macro `{}`", name);
    }
    if let MacroKind::FunctionLike { params, .. } = &kind {
        for (j, t) in body.iter().enumerate() {
            if !t.is_punct(P::Hash) {
                continue;
            }
            let names_param = body
                .get(j + 1)
                .and_then(Token::macro_name)
                .is_some_and(|n| params.iter().any(|p| p == n));
            if !names_param {
                bail!("`#` is not followed by a macro parameter in `{}`", name);
            }
        }
    }

    Ok(MacroDefinition {
        name,
        kind,
        body,
        first_defined: span.clone(),
        span,
        dependencies: Vec::new(),
        predefined: false,
    })
}

/// Name to definition map. At most one definition per name.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    map: FxHashMap<String, MacroDefinition>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&MacroDefinition> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the definition it replaced, if any.
    pub fn insert(&mut self, def: MacroDefinition) -> Option<MacroDefinition> {
        self.map.insert(def.name.clone(), def)
    }

    pub fn remove(&mut self, name: &str) -> Option<MacroDefinition> {
        self.map.remove(name)
    }

    /// Predefined macros first, then in order of first definition.
    pub fn definitions(&self) -> Vec<&MacroDefinition> {
        let mut defs: Vec<&MacroDefinition> = self.map.values().collect();
        defs.sort_by(|a, b| {
            (!a.predefined, a.first_defined.start, &a.name)
                .cmp(&(!b.predefined, b.first_defined.start, &b.name))
        });
        defs
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

impl Serialize for MacroTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.definitions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lex::{tokenize, FileId};

    fn define(src: &str) -> Result<MacroDefinition> {
        let toks: Vec<Token> = tokenize(src, FileId::new("m.c")).collect();
        let span = toks[0].span.to(&toks[toks.len() - 1].span);
        parse_define(&toks, span)
    }

    #[test]
    fn object_and_function_like() {
        let obj = define("PI 3.14").unwrap();
        assert!(!obj.is_function_like());
        assert_eq!(obj.body_text(), "3.14");

        // space before `(` makes it object-like
        let spaced = define("F (x) x").unwrap();
        assert!(!spaced.is_function_like());
        assert_eq!(spaced.body_text(), "(x) x");

        let f = define("MAX(a, b) ((a) > (b) ? (a) : (b))").unwrap();
        assert_eq!(f.params(), ["a", "b"]);
        assert_eq!(f.body_text(), "((a) > (b) ? (a) : (b))");
    }

    #[test]
    fn variadic_spellings() {
        let std = define("LOG(fmt, ...) printf(fmt, __VA_ARGS__)").unwrap();
        assert_eq!(std.params(), ["fmt", VA_ARGS]);
        assert!(std.is_variadic());
        let gnu = define("LOG(fmt, args...) printf(fmt, args)").unwrap();
        assert_eq!(gnu.params(), ["fmt", "args"]);
        assert!(gnu.is_variadic());
        assert!(define("BAD(..., x) x").is_err());
    }

    #[test]
    fn malformed_definitions() {
        assert!(define("F(a, a) a").is_err());
        assert!(define("F(a) ## a").is_err());
        assert!(define("F(a) #b").is_err());
        assert!(define("F(a").is_err());
        assert!(define("42 x").is_err());
    }

    #[test]
    fn redefinition_equivalence_ignores_amount_of_space() {
        let a = define("A (1 +  2)").unwrap();
        let b = define("A   (1 + 2)").unwrap();
        let c = define("A (1+2)").unwrap();
        assert!(a.same_definition(&b));
        assert!(!a.same_definition(&c));
    }
}
