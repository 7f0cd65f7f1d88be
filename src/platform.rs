//! Whole-platform runs: the platform description, then every module and
//! package it pulls in, then the flash layout.

use crate::context::{BuildContext, ParseConfig};
use crate::diagnostics::{DiagnosticKind, SourcePos};
use crate::dialect::{Dec, Dsc, Fdf, FvInf, Inf};
use crate::include::resolve;
use crate::parser::{Dialect, load};
use crate::xref::QueuedFile;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Counts of one platform run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub dscs: usize,
    pub infs: usize,
    pub decs: usize,
    pub fdfs: usize,
    pub lines: usize,
    pub diagnostics: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "   platform descriptions: {}", self.dscs)?;
        writeln!(f, "   module descriptions: {}", self.infs)?;
        writeln!(f, "   package declarations: {}", self.decs)?;
        writeln!(f, "   flash layouts: {}", self.fdfs)?;
        writeln!(f, "   lines: {}", self.lines)?;
        write!(f, "   diagnostics: {}", self.diagnostics)
    }
}

#[derive(Debug)]
pub struct PlatformRun {
    pub context: BuildContext,
    pub summary: RunSummary,
}

impl PlatformRun {
    /// FV `INF` statements of all parsed flash-layout files
    pub fn fv_infs(&self) -> impl Iterator<Item = &FvInf> {
        self.context
            .fdfs
            .iter()
            .flat_map(|(_, entry)| entry.document.data.infs.iter())
    }
}

/// Parse a platform.
///
/// `dsc` and `fdf` are located like include files. `extra_infs` are module
/// files that are parsed even though the platform does not list them.
pub fn run(
    config: ParseConfig,
    dsc: &str,
    fdf: Option<&str>,
    extra_infs: &[String],
    cancel: Option<Arc<AtomicBool>>,
) -> PlatformRun {
    let mut ctx = BuildContext::new(config);
    if let Some(flag) = cancel {
        ctx = ctx.with_cancel_flag(flag);
    }

    let command_line = SourcePos::new("<command line>", 0);
    load_top::<Dsc>(&mut ctx, dsc, &command_line);
    for inf in extra_infs {
        ctx.xref.queue_module(inf, &command_line);
    }

    // parsing a module may queue packages, and both queues grow while they
    // are processed
    let mut next_module = 0;
    while let Some(queued) = ctx.xref.module_queue.get(next_module).cloned() {
        next_module += 1;
        if ctx.is_cancelled() {
            break;
        }
        load_queued::<Inf>(&mut ctx, &queued);
    }

    let mut next_package = 0;
    while let Some(queued) = ctx.xref.package_queue.get(next_package).cloned() {
        next_package += 1;
        if ctx.is_cancelled() {
            break;
        }
        load_queued::<Dec>(&mut ctx, &queued);
    }

    if let Some(fdf) = fdf
        && !ctx.is_cancelled()
    {
        load_top::<Fdf>(&mut ctx, fdf, &command_line);
    }

    if ctx.is_cancelled() {
        ctx.message("Run cancelled");
    }
    let summary = RunSummary {
        dscs: ctx.dscs.len(),
        infs: ctx.infs.len(),
        decs: ctx.decs.len(),
        fdfs: ctx.fdfs.len(),
        lines: ctx.stats.lines,
        diagnostics: ctx.diagnostics.len(),
    };
    log::debug!(
        "run complete: {} files, {} lines, {} diagnostics",
        ctx.stats.files_parsed,
        summary.lines,
        summary.diagnostics
    );

    PlatformRun { context: ctx, summary }
}

fn load_top<D: Dialect>(ctx: &mut BuildContext, name: &str, pos: &SourcePos) {
    match resolve(ctx, name, None) {
        Ok(file) => {
            ctx.xref.add_file_reference(&file.key, pos);
            load::<D>(ctx, &file);
        }
        Err(err) => {
            let message = format!("{} file: {err}", D::NAME);
            ctx.diagnostics.report(DiagnosticKind::Reference, pos, message);
        }
    }
}

fn load_queued<D: Dialect>(ctx: &mut BuildContext, queued: &QueuedFile) {
    match resolve(ctx, &queued.path, Some(queued.referenced_at.file())) {
        Ok(file) => {
            if !load::<D>(ctx, &file) {
                log::trace!("{} already parsed", file.key);
            }
        }
        Err(err) => {
            let message = format!("{} file: {err}", D::NAME);
            ctx.diagnostics.report(DiagnosticKind::Reference, &queued.referenced_at, message);
        }
    }
}
