use crate::FnvIndexMap;
use crate::descriptor::AprioriList;
use crate::diagnostics::{Diagnostics, SourcePos};
use crate::dialect::{Dec, Dsc, Fdf, Inf};
use crate::include::IncludeCache;
use crate::macros::MacroTable;
use crate::parser::Document;
use crate::xref::CrossReferenceTables;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything the caller supplies about the build environment
#[derive(Debug, Clone, Default)]
pub struct ParseConfig {
    /// the workspace; file keys are relative to it
    pub base_dir: PathBuf,
    /// package search path prefixes, relative to `base_dir` or absolute
    pub search_paths: Vec<PathBuf>,
    /// architectures to keep; empty keeps all
    pub supported_architectures: Vec<String>,
    /// macros defined before the first file is read
    pub macro_seeds: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub files_parsed: usize,
    pub lines: usize,
    /// lines handed to the record dispatcher
    pub dispatched: usize,
}

/// Run-wide state shared by every file parse of a platform
#[derive(Debug)]
pub struct BuildContext {
    pub config: ParseConfig,
    pub macros: MacroTable,
    pub supported_architectures: Vec<String>,
    pub xref: CrossReferenceTables,
    pub diagnostics: Diagnostics,
    pub dscs: IncludeCache<Document<Dsc>>,
    pub decs: IncludeCache<Document<Dec>>,
    pub infs: IncludeCache<Document<Inf>>,
    pub fdfs: IncludeCache<Document<Fdf>>,
    /// apriori lists of all flash-layout files, by phase
    pub apriori: FnvIndexMap<String, AprioriList>,
    pub stats: ParseStats,
    /// progress messages for the user
    pub messages: Vec<String>,
    pub(crate) include_stack: Vec<String>,
    cancel: Option<Arc<AtomicBool>>,
}

impl BuildContext {
    pub fn new(config: ParseConfig) -> Self {
        let mut macros = MacroTable::new();
        let seed_pos = SourcePos::new("<environment>", 0);
        for (name, value) in &config.macro_seeds {
            macros.define(name, value, &seed_pos);
        }
        let supported_architectures = config
            .supported_architectures
            .iter()
            .map(|arch| arch.to_ascii_uppercase())
            .collect();

        Self {
            config,
            macros,
            supported_architectures,
            xref: CrossReferenceTables::default(),
            diagnostics: Diagnostics::default(),
            dscs: IncludeCache::default(),
            decs: IncludeCache::default(),
            infs: IncludeCache::default(),
            fdfs: IncludeCache::default(),
            apriori: FnvIndexMap::default(),
            stats: ParseStats::default(),
            messages: Vec::new(),
            include_stack: Vec::new(),
            cancel: None,
        }
    }

    /// Install a flag that stops parsing at the next line once it is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    pub fn message(&mut self, text: impl Into<String>) {
        self.messages.push(text.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_and_architectures() {
        let ctx = BuildContext::new(ParseConfig {
            supported_architectures: vec!["x64".to_string()],
            macro_seeds: vec![("WORKSPACE".to_string(), "/ws".to_string())],
            ..ParseConfig::default()
        });
        assert_eq!(ctx.supported_architectures, ["X64"]);
        assert_eq!(ctx.macros.get("WORKSPACE").map(|m| m.expansion.as_str()), Some("/ws"));
        assert_eq!(ctx.macros.version(), 1);
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn cancellation_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = BuildContext::new(ParseConfig::default()).with_cancel_flag(flag.clone());
        assert!(!ctx.is_cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(ctx.is_cancelled());
    }
}
