//! Parser for the platform (DSC), package (DEC), module (INF) and flash-layout
//! (FDF) files of an EDK II firmware build.
//!
//! All four formats run through one engine: comment stripping, versioned
//! macros, `!if` conditionals, regex schemas per section and recursive
//! includes. The results land in a [`context::BuildContext`] with the
//! cross-reference tables of the whole platform. [`platform::run`] parses a
//! platform with everything it references.

use fnv::FnvBuildHasher;
use indexmap::IndexMap;

pub mod conditional;
pub mod context;
pub mod descriptor;
pub mod diagnostics;
pub mod dialect;
pub mod expression;
pub mod include;
pub mod lexer;
pub mod macros;
pub mod parser;
pub mod platform;
pub mod schema;
pub mod section;
pub mod subelement;
pub mod xref;

pub type FnvIndexMap<K, V> = IndexMap<K, V, FnvBuildHasher>;

pub use context::{BuildContext, ParseConfig};
pub use diagnostics::{Diagnostic, DiagnosticKind, SourcePos};
pub use platform::{PlatformRun, RunSummary, run};
