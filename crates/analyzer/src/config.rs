use anyhow::{bail, Context, Result};
use extract::ExtractOptions;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisConfig {
    pub max_expansion_depth: usize,
    pub typedef_chain_limit: usize,
    pub extract: ExtractOptions,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_expansion_depth: pp::DEFAULT_MAX_EXPANSION_DEPTH,
            typedef_chain_limit: graph::DEFAULT_TYPEDEF_CHAIN_LIMIT,
            extract: ExtractOptions::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn with_max_expansion_depth(mut self, depth: usize) -> Self {
        self.max_expansion_depth = depth;
        self
    }

    pub fn with_typedef_chain_limit(mut self, limit: usize) -> Self {
        self.typedef_chain_limit = limit;
        self
    }

    pub fn with_extract_options(mut self, opts: ExtractOptions) -> Self {
        self.extract = opts;
        self
    }

    /// Defaults overridden by `CTF_MAX_EXPANSION_DEPTH`,
    /// `CTF_TYPEDEF_CHAIN_LIMIT`, `CTF_INCLUDE_PROTOTYPES` and
    /// `CTF_EXCLUDE_STATIC`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(depth) = env_usize(&lookup, "CTF_MAX_EXPANSION_DEPTH")? {
            if depth == 0 {
                bail!("CTF_MAX_EXPANSION_DEPTH must be at least 1");
            }
            cfg.max_expansion_depth = depth;
        }
        if let Some(limit) = env_usize(&lookup, "CTF_TYPEDEF_CHAIN_LIMIT")? {
            cfg.typedef_chain_limit = limit;
        }
        if env_flag_true(&lookup, "CTF_INCLUDE_PROTOTYPES") {
            cfg.extract.include_prototypes = true;
        }
        if env_flag_true(&lookup, "CTF_EXCLUDE_STATIC") {
            cfg.extract.include_static = false;
        }
        Ok(cfg)
    }
}

fn env_usize<F>(lookup: &F, name: &str) -> Result<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(v) = lookup(name) else {
        return Ok(None);
    };
    v.trim()
        .parse::<usize>()
        .map(Some)
        .with_context(|| format!("{} must be a non-negative integer, got `{}`", name, v))
}

fn env_flag_true<F>(lookup: &F, name: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            v == "1" || v == "true" || v == "yes" || v == "on"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = AnalysisConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, AnalysisConfig::default());
        assert_eq!(cfg.max_expansion_depth, 4096);
        assert_eq!(cfg.typedef_chain_limit, 64);
        assert!(!cfg.extract.include_prototypes);
        assert!(cfg.extract.include_static);
    }

    #[test]
    fn variables_override_defaults() {
        let cfg = AnalysisConfig::from_lookup(lookup(&[
            ("CTF_MAX_EXPANSION_DEPTH", " 128 "),
            ("CTF_TYPEDEF_CHAIN_LIMIT", "8"),
            ("CTF_INCLUDE_PROTOTYPES", "Yes"),
            ("CTF_EXCLUDE_STATIC", "on"),
        ]))
        .unwrap();
        assert_eq!(cfg.max_expansion_depth, 128);
        assert_eq!(cfg.typedef_chain_limit, 8);
        assert!(cfg.extract.include_prototypes);
        assert!(!cfg.extract.include_static);
    }

    #[test]
    fn flags_other_than_true_spellings_are_off() {
        let cfg = AnalysisConfig::from_lookup(lookup(&[("CTF_INCLUDE_PROTOTYPES", "0"), ("CTF_EXCLUDE_STATIC", "nope")])).unwrap();
        assert!(!cfg.extract.include_prototypes);
        assert!(cfg.extract.include_static);
    }

    #[test]
    fn bad_numbers_are_errors() {
        let err = AnalysisConfig::from_lookup(lookup(&[("CTF_TYPEDEF_CHAIN_LIMIT", "lots")])).unwrap_err();
        assert!(err.to_string().contains("CTF_TYPEDEF_CHAIN_LIMIT"), "{:#}", err);
        assert!(AnalysisConfig::from_lookup(lookup(&[("CTF_MAX_EXPANSION_DEPTH", "0")])).is_err());
    }
}
