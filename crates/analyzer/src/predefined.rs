use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;

/// Caller-supplied macro definitions applied before every unit. Cheap to
/// clone and share between threads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PredefinedMacros {
    defines: Arc<Vec<(String, String)>>,
}

impl PredefinedMacros {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `-D` style strings: `NAME` (defined as `1`), `NAME=VALUE`,
    /// `F(a,b)=BODY`.
    pub fn from_defines<I, S>(defines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Vec::new();
        for d in defines {
            let d = d.as_ref();
            let (name, value) = match d.split_once('=') {
                Some((name, value)) => (name.trim(), value),
                None => (d.trim(), "1"),
            };
            let ident = name.split('(').next().unwrap_or_default();
            if !is_identifier(ident) {
                bail!("invalid macro name in `-D{}`", d);
            }
            out.push((name.to_string(), value.to_string()));
        }
        Ok(Self { defines: Arc::new(out) })
    }

    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.defines).push((name.into(), value.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.defines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
