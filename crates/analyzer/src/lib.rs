mod config;
mod predefined;

pub use config::AnalysisConfig;
pub use extract::{ExtractOptions, TestCandidate};
pub use predefined::PredefinedMacros;

use graph::EntityGraph;
use lex::{Diagnostic, FileId};
use log::{debug, info};
use pp::{ConditionalBranch, IncludeDirective, InactiveToken, MacroTable, Preprocessor};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared with a running analysis. Checked once
/// per top-level declaration.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub file: FileId,
    pub graph: EntityGraph,
    /// Preprocessor, parser, then graph diagnostics.
    pub diagnostics: Vec<Diagnostic>,
    pub inactive: Vec<InactiveToken>,
    pub branches: Vec<ConditionalBranch>,
    pub includes: Vec<IncludeDirective>,
    pub candidates: Vec<TestCandidate>,
    /// A fatal diagnostic stopped preprocessing; everything else covers the
    /// part before it.
    pub halted: bool,
    pub cancelled: bool,
}

impl AnalysisResult {
    pub fn macro_table(&self) -> &MacroTable {
        self.graph.macro_table()
    }

    pub fn has_fatal(&self) -> bool {
        self.diagnostics.iter().any(|d| d.fatal)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: AnalysisConfig,
    cancel: Option<CancellationToken>,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config, cancel: None }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run the whole pipeline on one translation unit. Never fails: problems
    /// with the source are reported as diagnostics.
    pub fn analyze(&self, source: &str, file: FileId, predefined: &PredefinedMacros) -> AnalysisResult {
        let mut diagnostics = Vec::new();
        let mut pp = Preprocessor::new(file.clone()).with_max_depth(self.config.max_expansion_depth);
        for (name, value) in predefined.iter() {
            match pp.define_text(name, value) {
                Ok(Some(d)) | Err(d) => diagnostics.push(d),
                Ok(None) => {}
            }
        }

        let unit = pp.run(source);
        debug!(
            "{}: {} tokens after preprocessing, {} inactive",
            file,
            unit.tokens.len(),
            unit.inactive.len()
        );
        diagnostics.extend(unit.diagnostics);

        let mut parser = parse::Parser::new(&unit.tokens).with_doc_comments(&unit.doc_comments);
        if let Some(token) = &self.cancel {
            parser = parser.with_cancellation(token.0.clone());
        }
        let tu = parser.parse();
        diagnostics.extend(tu.diagnostics);

        let mut graph = EntityGraph::new().with_chain_limit(self.config.typedef_chain_limit);
        graph.set_macros(unit.macros);
        for decl in tu.declarations {
            graph.register(decl);
        }
        graph.check_typedef_cycles();
        diagnostics.extend(graph.take_diagnostics());

        let candidates = extract::extract(&graph, &self.config.extract);

        info!(
            "{}: {} entities, {} macros, {} candidates, {} diagnostics{}{}",
            file,
            graph.len(),
            graph.macro_table().len(),
            candidates.len(),
            diagnostics.len(),
            if unit.halted { " (halted)" } else { "" },
            if tu.cancelled { " (cancelled)" } else { "" },
        );

        AnalysisResult {
            file,
            graph,
            diagnostics,
            inactive: unit.inactive,
            branches: unit.branches,
            includes: unit.includes,
            candidates,
            halted: unit.halted,
            cancelled: tu.cancelled,
        }
    }
}

/// [`Analyzer::analyze`] with the default configuration.
pub fn analyze(source: &str, file: FileId, predefined: &PredefinedMacros) -> AnalysisResult {
    Analyzer::default().analyze(source, file, predefined)
}
