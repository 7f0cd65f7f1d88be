use crate::FnvIndexMap;
use crate::conditional::{ConditionalEngine, Directive, eval_defined, split_directive};
use crate::context::BuildContext;
use crate::diagnostics::{DiagnosticKind, SourcePos};
use crate::expression::eval_condition;
use crate::include::{CacheEntry, IncludeCache, ResolvedPath, check_cycle, resolve_or_report};
use crate::lexer::CommentStripper;
use crate::macros::fix_undefined;
use crate::schema::{MatchGroups, Record, RecordKind, Schema, dispatch};
use crate::section::{SectionPath, parse_header};
use crate::subelement::{Routing, SubElementTracker};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static DEFINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^DEFINE\s+([^=\s]+)\s*=\s*(.+)?$").unwrap());

/// Which `!` directives a dialect understands. In a dialect without any of
/// them, lines starting with `!` are ordinary lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub includes: bool,
    pub conditionals: bool,
    pub error_directive: bool,
}

impl Features {
    fn any(self) -> bool {
        self.includes || self.conditionals || self.error_directive
    }
}

/// A successfully dispatched line, as seen by a dialect hook
#[derive(Debug)]
pub struct Matched<'a> {
    pub groups: &'a MatchGroups,
    pub fields: &'a FnvIndexMap<&'static str, String>,
    pub section: &'a SectionPath,
    pub line: &'a str,
}

impl Matched<'_> {
    /// Capture group `index`, empty if it did not participate
    pub fn group(&self, index: usize) -> &str {
        self.groups.get(index).unwrap_or("")
    }
}

/// What a hook may touch while handling one line
pub struct Env<'a> {
    pub ctx: &'a mut BuildContext,
    pub pos: &'a SourcePos,
    pub(crate) sections: &'a mut Vec<SectionPath>,
    pub(crate) subelements: &'a mut SubElementTracker,
}

impl Env<'_> {
    pub fn report(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.ctx.diagnostics.report(kind, self.pos, message);
    }

    /// The same environment, positioned at another line
    pub(crate) fn at<'b>(&'b mut self, pos: &'b SourcePos) -> Env<'b> {
        Env {
            ctx: &mut *self.ctx,
            pos,
            sections: &mut *self.sections,
            subelements: &mut *self.subelements,
        }
    }

    pub(crate) fn enter_subelement(&mut self, owner: &SectionPath) {
        self.subelements.enter(owner, self.pos);
    }
}

/// One of the four file formats: its sections and the side effects of its lines.
///
/// The implementing type holds the per-file state of the dialect and ends up
/// in the parsed [`Document`].
pub trait Dialect: Default + fmt::Debug + Sized + 'static {
    type Hook: Copy + fmt::Debug + Send + Sync + 'static;

    const NAME: &'static str;
    const FEATURES: Features;

    fn schema() -> &'static Schema<Self::Hook>;

    /// Where parsed files of this dialect are kept
    fn cache(ctx: &mut BuildContext) -> &mut IncludeCache<Document<Self>>;

    fn on_match(&mut self, _hook: Self::Hook, _matched: &Matched, _env: &mut Env) {}

    /// `!include`, with the argument already expanded
    fn on_include(&mut self, partial: &str, env: &mut Env) {
        include_file::<Self>(partial, env);
    }

    /// A line before the first section header
    fn on_outside_line(&mut self, _line: &str, env: &mut Env) {
        env.report(DiagnosticKind::Structural, "Unsupported line discovered outside of a section");
    }

    /// A macro was (re)defined by this file
    fn on_macro(&mut self, _name: &str, _env: &mut Env) {}

    /// Called once after the last line
    fn finish(&mut self, _env: &mut Env) {}
}

/// A parsed file
#[derive(Debug)]
pub struct Document<D> {
    /// file key, relative to the workspace
    pub path: String,
    pub records: FnvIndexMap<RecordKind, Vec<Record>>,
    pub data: D,
}

impl<D> Document<D> {
    pub fn new(path: &str, data: D) -> Self {
        Self {
            path: path.to_string(),
            records: FnvIndexMap::default(),
            data,
        }
    }

    pub fn records(&self, kind: RecordKind) -> &[Record] {
        self.records.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

#[derive(Debug)]
pub struct ParseOutcome<D> {
    pub document: Document<D>,
    /// sections open at the end of the file
    pub trailing_sections: Vec<SectionPath>,
}

struct FileParser<'c, D: Dialect> {
    ctx: &'c mut BuildContext,
    document: Document<D>,
    sections: Vec<SectionPath>,
    subelements: SubElementTracker,
    conditionals: ConditionalEngine,
}

/// Parse one file with dialect `D`, starting in the given sections.
///
/// Includes are parsed recursively from within this call. Problems are
/// reported to the context; the parse itself never fails.
pub fn parse_file<D: Dialect>(
    ctx: &mut BuildContext,
    file: &ResolvedPath,
    data: D,
    sections: Vec<SectionPath>,
) -> ParseOutcome<D> {
    let text = match std::fs::read(&file.full_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            let pos = SourcePos::new(&file.key, 0);
            ctx.diagnostics.report(
                DiagnosticKind::Reference,
                &pos,
                format!("Unexpected error attempting to open file {}: {err}", file.key),
            );
            return ParseOutcome {
                document: Document::new(&file.key, data),
                trailing_sections: sections,
            };
        }
    };

    log::debug!("Processing {} file {}", D::NAME, file.key);
    ctx.message(format!("Processing {}", file.key));
    ctx.stats.files_parsed += 1;
    ctx.include_stack.push(file.key.clone());

    let mut parser = FileParser {
        ctx,
        document: Document::new(&file.key, data),
        sections,
        subelements: SubElementTracker::default(),
        conditionals: ConditionalEngine::default(),
    };
    parser.run(&text);
    let FileParser {
        ctx, document, sections, ..
    } = parser;
    ctx.include_stack.pop();

    ParseOutcome {
        document,
        trailing_sections: sections,
    }
}

impl<D: Dialect> FileParser<'_, D> {
    fn run(&mut self, text: &str) {
        let key = self.document.path.clone();
        let mut stripper = CommentStripper::new();
        let mut continued: Option<(SourcePos, String)> = None;
        let mut last_line = 0;

        for (index, raw) in text.lines().enumerate() {
            if self.ctx.is_cancelled() {
                log::debug!("{key}: parsing cancelled");
                break;
            }
            self.ctx.stats.lines += 1;
            last_line = index as u32 + 1;
            let pos = SourcePos::new(&key, last_line);

            let Some(line) = stripper.normalize(raw) else {
                log::trace!("{pos}: skipped blank or comment line");
                continue;
            };

            // a trailing backslash joins the next line
            if let Some(head) = line.strip_suffix('\\') {
                let (_, buffer) = continued.get_or_insert_with(|| (pos.clone(), String::new()));
                buffer.push_str(head.trim_end());
                buffer.push(' ');
                continue;
            }
            match continued.take() {
                Some((start, mut buffer)) => {
                    buffer.push_str(&line);
                    self.line(&start, &buffer);
                }
                None => self.line(&pos, &line),
            }
        }

        let end = SourcePos::new(&key, last_line);
        if let Some((start, buffer)) = continued.take() {
            self.line(&start, buffer.trim_end());
        }
        self.finish(&end);
    }

    fn finish(&mut self, end: &SourcePos) {
        let unterminated: Vec<SourcePos> = self.conditionals.unterminated().cloned().collect();
        for opened_at in unterminated {
            self.ctx.diagnostics.report(
                DiagnosticKind::Conditional,
                &opened_at,
                "Conditional directive is not terminated by !endif",
            );
        }
        for open in self.subelements.abandon() {
            self.ctx.diagnostics.report(
                DiagnosticKind::Nesting,
                end,
                format!("Missing closing brace for sub-element opened at {}", open.opened_at),
            );
        }
        let mut env = Env {
            ctx: &mut *self.ctx,
            pos: end,
            sections: &mut self.sections,
            subelements: &mut self.subelements,
        };
        self.document.data.finish(&mut env);
    }

    fn line(&mut self, pos: &SourcePos, line: &str) {
        if D::FEATURES.any()
            && let Some((directive, argument)) = split_directive(line)
        {
            self.directive(pos, directive, argument);
            return;
        }

        if !self.conditionals.is_active() {
            log::trace!("{pos}: skipped conditionally");
            return;
        }

        let line = self.ctx.macros.expand(line);

        if let Some(caps) = DEFINE.captures(&line) {
            let name = &caps[1];
            let value = caps.get(2).map_or("", |value| value.as_str());
            self.ctx.macros.define(name, value, pos);
            let mut env = Env {
                ctx: &mut *self.ctx,
                pos,
                sections: &mut self.sections,
                subelements: &mut self.subelements,
            };
            self.document.data.on_macro(name, &mut env);
            return;
        }

        if let Some(sections) = parse_header(&line) {
            self.new_sections(pos, sections);
            return;
        }

        if self.subelements.is_open() {
            match self.subelements.route(&line, pos) {
                Routing::Closed | Routing::Marker => {}
                Routing::Sections(sections) => self.dispatch_sections(pos, &sections, &line, true),
            }
        } else if !self.sections.is_empty() {
            let sections = self.sections.clone();
            self.dispatch_sections(pos, &sections, &line, false);
        } else {
            let mut env = Env {
                ctx: &mut *self.ctx,
                pos,
                sections: &mut self.sections,
                subelements: &mut self.subelements,
            };
            self.document.data.on_outside_line(&line, &mut env);
        }
    }

    fn directive(&mut self, pos: &SourcePos, directive: Directive, argument: &str) {
        let features = D::FEATURES;
        log::trace!("{pos}: directive {directive:?} {argument}");
        match directive {
            Directive::Include if features.includes => {
                if !self.conditionals.is_active() {
                    log::trace!("{pos}: skipped conditionally");
                    return;
                }
                let partial = self.ctx.macros.expand(argument);
                let mut env = Env {
                    ctx: &mut *self.ctx,
                    pos,
                    sections: &mut self.sections,
                    subelements: &mut self.subelements,
                };
                self.document.data.on_include(&partial, &mut env);
            }
            Directive::If if features.conditionals => {
                let ctx = &mut *self.ctx;
                self.conditionals.begin(pos, || evaluate_if(ctx, pos, argument));
            }
            Directive::Ifdef if features.conditionals => {
                let macros = &self.ctx.macros;
                self.conditionals.begin(pos, || eval_defined(argument, macros));
            }
            Directive::Ifndef if features.conditionals => {
                let macros = &self.ctx.macros;
                self.conditionals.begin(pos, || !eval_defined(argument, macros));
            }
            Directive::Elseif if features.conditionals => {
                let ctx = &mut *self.ctx;
                let result = self.conditionals.elseif(|| evaluate_if(ctx, pos, argument));
                if let Err(err) = result {
                    self.ctx.diagnostics.report(DiagnosticKind::Conditional, pos, err.to_string());
                }
            }
            Directive::Else if features.conditionals => {
                if let Err(err) = self.conditionals.else_branch() {
                    self.ctx.diagnostics.report(DiagnosticKind::Conditional, pos, err.to_string());
                }
            }
            Directive::Endif if features.conditionals => {
                if let Err(err) = self.conditionals.endif() {
                    self.ctx.diagnostics.report(DiagnosticKind::Conditional, pos, err.to_string());
                }
            }
            Directive::Error if features.error_directive => {
                if self.conditionals.is_active() {
                    let message = fix_undefined(&self.ctx.macros.expand(argument));
                    self.ctx
                        .diagnostics
                        .report(DiagnosticKind::Directive, pos, format!("error({message})"));
                }
            }
            Directive::Unknown(_) | Directive::Include | Directive::Error if !self.conditionals.is_active() => {
                log::trace!("{pos}: skipped conditionally");
            }
            Directive::Unknown(name) => {
                self.ctx
                    .diagnostics
                    .report(DiagnosticKind::Structural, pos, format!("Unknown directive: {name}"));
            }
            other => {
                let name = format!("{other:?}").to_ascii_lowercase();
                self.ctx.diagnostics.report(
                    DiagnosticKind::Structural,
                    pos,
                    format!("Directive not supported in {} files: {name}", D::NAME),
                );
            }
        }
    }

    fn new_sections(&mut self, pos: &SourcePos, sections: Vec<SectionPath>) {
        for open in self.subelements.abandon() {
            self.ctx.diagnostics.report(
                DiagnosticKind::Nesting,
                pos,
                format!("Missing closing brace for sub-element opened at {}", open.opened_at),
            );
        }

        let schema = D::schema();
        for section in &sections {
            match schema.get(section.name()) {
                Some(known) if known.nested_only => {
                    self.ctx.diagnostics.report(
                        DiagnosticKind::Structural,
                        pos,
                        format!("section {} cannot be used outside of braces", section.name()),
                    );
                }
                Some(_) if section.is_supported(&self.ctx.supported_architectures) => {
                    log::trace!("{pos}: {section}");
                }
                Some(_) => log::trace!("{pos}: skipped unsupported section {section}"),
                None => {
                    self.ctx.diagnostics.report(
                        DiagnosticKind::Structural,
                        pos,
                        format!("Unknown section: {}", section.segments().join(".")),
                    );
                }
            }
        }
        self.sections = sections;
    }

    /// Hand a line to every eligible section it belongs to
    fn dispatch_sections(&mut self, pos: &SourcePos, sections: &[SectionPath], line: &str, in_subelement: bool) {
        let schema = D::schema();
        for section in sections {
            let Some(section_schema) = schema.get(section.name()) else {
                continue;
            };
            if section_schema.nested_only && !in_subelement {
                continue;
            }
            if !section.is_supported(&self.ctx.supported_architectures) {
                continue;
            }

            self.ctx.stats.dispatched += 1;
            let dispatched = match dispatch(section.name(), &section_schema.candidates, line) {
                Ok(dispatched) => dispatched,
                Err(err) => {
                    self.ctx
                        .diagnostics
                        .report(DiagnosticKind::Structural, pos, fix_undefined(&err.to_string()));
                    continue;
                }
            };

            if let Some(hook) = dispatched.hook {
                let matched = Matched {
                    groups: &dispatched.groups,
                    fields: &dispatched.fields,
                    section,
                    line,
                };
                let mut env = Env {
                    ctx: &mut *self.ctx,
                    pos,
                    sections: &mut self.sections,
                    subelements: &mut self.subelements,
                };
                self.document.data.on_match(hook, &matched, &mut env);
            }

            if let Some(kind) = dispatched.destination {
                log::trace!("{pos}: {section} {:?}", dispatched.fields);
                self.document.records.entry(kind).or_default().push(Record {
                    fields: dispatched.fields,
                    pos: pos.clone(),
                    section: section.clone(),
                });
            }
        }
    }
}

/// Condition of `!if` / `!elseif`, already known to be in an active scope
fn evaluate_if(ctx: &mut BuildContext, pos: &SourcePos, argument: &str) -> bool {
    let expanded = ctx.macros.expand(argument);
    match eval_condition(&expanded, &ctx.macros) {
        Ok(result) => result,
        Err(err) => {
            ctx.diagnostics.report(
                DiagnosticKind::Conditional,
                pos,
                format!("Unable to evaluate condition {}: {err}", fix_undefined(&expanded)),
            );
            false
        }
    }
}

/// `!include` of a file in the same dialect.
///
/// A file that was already parsed under the current macro version is not
/// parsed again; the including file only continues in its trailing sections.
pub fn include_file<D: Dialect>(partial: &str, env: &mut Env) {
    let Some(resolved) = resolve_or_report(env.ctx, partial, env.pos) else {
        return;
    };
    env.ctx.xref.add_file_reference(&resolved.key, env.pos);
    if let Err(err) = check_cycle(env.ctx, &resolved.key) {
        env.report(DiagnosticKind::Reference, err.to_string());
        return;
    }

    let version = env.ctx.macros.version();
    if let Some(entry) = D::cache(env.ctx).fresh(&resolved.key, version) {
        log::trace!("{}: previously loaded: {}", env.pos, resolved.key);
        *env.sections = entry.trailing_sections.clone();
        return;
    }

    log::trace!("{}: including {}", env.pos, resolved.key);
    let outcome = parse_file(env.ctx, &resolved, D::default(), env.sections.clone());
    log::trace!("{}: returning to {}", env.pos, env.pos.file().display());
    *env.sections = outcome.trailing_sections.clone();
    let macro_version = env.ctx.macros.version();
    D::cache(env.ctx).insert(
        resolved.key,
        CacheEntry {
            macro_version,
            document: outcome.document,
            trailing_sections: outcome.trailing_sections,
        },
    );
}

/// Parse a top-level file of dialect `D` unless it was parsed before.
/// Returns false if the file was already known.
pub fn load<D: Dialect>(ctx: &mut BuildContext, file: &ResolvedPath) -> bool {
    if D::cache(ctx).contains(&file.key) {
        log::trace!("previously loaded: {}", file.key);
        return false;
    }
    let outcome = parse_file(ctx, file, D::default(), Vec::new());
    let macro_version = ctx.macros.version();
    D::cache(ctx).insert(
        file.key.clone(),
        CacheEntry {
            macro_version,
            document: outcome.document,
            trailing_sections: outcome.trailing_sections,
        },
    );
    true
}
