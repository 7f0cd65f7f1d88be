use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A location in one of the parsed files. Line numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourcePos {
    pub file: PathBuf,
    pub line: u32,
}

impl SourcePos {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display().to_string().replace('\\', "/"), self.line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DiagnosticKind {
    #[error("lexical")]
    Lexical,
    /// the line does not fit the schema of its section
    #[error("structure")]
    Structural,
    #[error("conditional")]
    Conditional,
    /// an include target or other referenced file could not be resolved
    #[error("reference")]
    Reference,
    #[error("nesting")]
    Nesting,
    /// a user-written `!error` directive
    #[error("error directive")]
    Directive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub pos: SourcePos,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, pos: SourcePos, message: impl Into<String>) -> Self {
        Self {
            kind,
            pos,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} error): {}", self.pos, self.kind, self.message)
    }
}

/// Collects the diagnostics of a run. Nothing in the engine aborts on a
/// diagnostic, so a single run reports as many problems as possible.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn report(&mut self, kind: DiagnosticKind, pos: &SourcePos, message: impl Into<String>) {
        let diagnostic = Diagnostic::new(kind, pos.clone(), message);
        log::debug!("{diagnostic}");
        self.items.push(diagnostic);
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        log::debug!("{diagnostic}");
        self.items.push(diagnostic);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.items.iter().filter(|d| d.kind == kind).count()
    }
}
