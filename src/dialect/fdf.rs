use super::patterns::*;
use super::{Dsc, define_from_fields, strip_quotes};
use crate::context::BuildContext;
use crate::descriptor::{
    Descriptor, DescriptorBuilder, DescriptorError, DescriptorKind, FdfOption, RuleEntry, parse_options,
};
use crate::diagnostics::{DiagnosticKind, SourcePos};
use crate::include::{CacheEntry, IncludeCache, check_cycle, resolve_or_report};
use crate::parser::{Dialect, Document, Env, Features, Matched, include_file, parse_file};
use crate::schema::{Candidate, FieldNames, RecordKind, Schema, dispatch};
use crate::section::SectionPath;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdfHook {
    Define,
    DataStart,
    DataAdd,
    EndDesc,
    Apriori,
    Inf,
    File,
    Section,
    Path,
    Rule,
    Compress,
    Guided,
    Version,
    Ext,
}

/// Statements of a firmware volume; capsules use the same set
fn volume_candidates(kind: RecordKind) -> Vec<Candidate<FdfHook>> {
    vec![
        Candidate::new(SET, " RR", Some(kind), FieldNames::Static(&["token", "value"]), None),
        Candidate::new(FIRM_EQUATE, "RR", Some(kind), FieldNames::Static(&["token", "value"]), None),
        Candidate::hook_only(APRIORI, "R", FdfHook::Apriori),
        Candidate::hook_only(INF, "   R", FdfHook::Inf),
        Candidate::hook_only(FILE, "RRO", FdfHook::File),
        Candidate::hook_only(SECTION, "R", FdfHook::Section),
        Candidate::hook_only(END_DESC, "", FdfHook::EndDesc),
        Candidate::hook_only(PATH, "R", FdfHook::Path),
    ]
}

static SCHEMA: LazyLock<Schema<FdfHook>> = LazyLock::new(|| {
    Schema::new()
        .section("capsule", volume_candidates(RecordKind::Capsules))
        .section(
            "defines",
            vec![Candidate::new(
                FIRM_EQUATE,
                "RO",
                Some(RecordKind::Defines),
                FieldNames::Static(&["macro", "value"]),
                Some(FdfHook::Define),
            )],
        )
        .section(
            "fd",
            vec![
                Candidate::hook_only(DATA_START, "", FdfHook::DataStart),
                Candidate::hook_only(DATA_ADD, "R", FdfHook::DataAdd),
                Candidate::hook_only(END_DESC, "", FdfHook::EndDesc),
                Candidate::new(
                    SET,
                    " RR",
                    Some(RecordKind::Fds),
                    FieldNames::Static(&["token", "value"]),
                    None,
                ),
                Candidate::new(
                    FIRM_EQUATE,
                    "RR",
                    Some(RecordKind::Fds),
                    FieldNames::Static(&["token", "value"]),
                    None,
                ),
                Candidate::new(
                    OFFSET_SIZE,
                    "R R",
                    Some(RecordKind::Fds),
                    FieldNames::Static(&["offset", "size"]),
                    None,
                ),
            ],
        )
        .section("fv", volume_candidates(RecordKind::Fvs))
        .section(
            "rule",
            vec![
                Candidate::hook_only(RULE, "RRO", FdfHook::Rule),
                Candidate::hook_only(COMPRESS, "O", FdfHook::Compress),
                Candidate::hook_only(GUIDED, "O", FdfHook::Guided),
                Candidate::hook_only(END_DESC, "", FdfHook::EndDesc),
                Candidate::hook_only(VERSION, "RR", FdfHook::Version),
                Candidate::hook_only(EXT, "  RR", FdfHook::Ext),
            ],
        )
});

/// Statements that may appear before the first section, e.g. in a platform
/// file included by a flash layout
static OUTSIDE: LazyLock<Vec<Candidate<FdfHook>>> = LazyLock::new(|| {
    vec![
        Candidate::hook_only(FILE, "RRO", FdfHook::File),
        Candidate::hook_only(SECTION, "R", FdfHook::Section),
        Candidate::hook_only(END_DESC, "", FdfHook::EndDesc),
        Candidate::hook_only(PATH, "R", FdfHook::Path),
    ]
});

static OUTSIDE_SECTION: LazyLock<SectionPath> = LazyLock::new(|| SectionPath::parse("fv"));

/// A module placed into a firmware volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FvInf {
    pub path: String,
    pub options: Vec<FdfOption>,
    pub pos: SourcePos,
}

/// Flash layout file
#[derive(Debug, Default)]
pub struct Fdf {
    pub descriptors: DescriptorBuilder,
    pub infs: Vec<FvInf>,
}

fn report_descriptor_error(env: &mut Env, err: DescriptorError) {
    let kind = match err {
        DescriptorError::NotAllowed(_) => DiagnosticKind::Structural,
        DescriptorError::AlreadyOpen(_) | DescriptorError::UnmatchedClose => DiagnosticKind::Nesting,
    };
    env.report(kind, err.to_string());
}

fn options(text: &str, allow_singles: bool, env: &mut Env) -> Vec<FdfOption> {
    parse_options(text, allow_singles).unwrap_or_else(|err| {
        env.report(DiagnosticKind::Structural, err.to_string());
        Vec::new()
    })
}

/// Split off the first word; a quoted string counts as one word
fn first_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    let end = match text.strip_prefix('"') {
        Some(rest) => rest.find('"').map_or(text.len(), |close| close + 2),
        None => text.find(char::is_whitespace).unwrap_or(text.len()),
    };
    (&text[..end], text[end..].trim())
}

/// The first word, unless it is already an option
fn leading_value(text: &str) -> (Option<String>, &str) {
    let (word, rest) = first_word(text);
    if word.is_empty() || word.contains('=') {
        (None, text.trim())
    } else {
        (Some(word.to_string()), rest)
    }
}

impl Fdf {
    /// `SECTION type = value [options]`, `SECTION GUIDED [guid] [options]` or
    /// `SECTION COMPRESS [type]`, either as a leaf or opening a block
    fn section_statement(&mut self, text: &str, block: bool, env: &mut Env) {
        let text = text.trim();
        let type_end = text
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(text.len());
        let section_type = text[..type_end].to_ascii_uppercase();
        let rest = text[type_end..].trim_start();

        let (kind, option_text) = match section_type.as_str() {
            "GUIDED" => {
                let (guid, option_text) = leading_value(rest);
                // still opened, so that its closing brace matches
                if guid.is_none() {
                    env.report(DiagnosticKind::Structural, "SECTION GUIDED encountered with no GUID");
                }
                (DescriptorKind::Guided { guid }, option_text)
            }
            "COMPRESS" => {
                let (compress_type, option_text) = leading_value(rest);
                (DescriptorKind::Compress { compress_type }, option_text)
            }
            _ => {
                let value = rest.strip_prefix('=').map(first_word);
                match value {
                    Some((value, option_text)) if !value.is_empty() => (
                        DescriptorKind::Section {
                            section_type: section_type.clone(),
                            value: value.to_string(),
                        },
                        option_text,
                    ),
                    _ => {
                        env.report(
                            DiagnosticKind::Structural,
                            format!("Invalid SECTION {section_type} encountered"),
                        );
                        return;
                    }
                }
            }
        };

        let descriptor = Descriptor::new(kind, env.pos, options(option_text, true, env));
        let result = if block {
            self.descriptors.open_section_block(descriptor)
        } else {
            self.descriptors.add_section(descriptor)
        };
        if let Err(err) = result {
            report_descriptor_error(env, err);
        }
    }

    /// `INF [options] path` in a volume or apriori list
    fn inf_statement(&mut self, matched: &Matched, env: &mut Env) {
        let path = matched.group(4).trim();
        env.ctx.xref.add_file_reference(path, env.pos);
        if self.descriptors.add_apriori_module(path) {
            return;
        }
        let whole = matched.groups.whole();
        let option_text = whole
            .len()
            .checked_sub(matched.group(4).len())
            .and_then(|end| whole.get(3..end))
            .unwrap_or("");
        let options = options(option_text, false, env);
        self.infs.push(FvInf {
            path: path.to_string(),
            options,
            pos: env.pos.clone(),
        });
    }

    /// `kind [subtype] [options] path.ext` inside a rule
    fn rule_entry(&mut self, matched: &Matched, env: &mut Env) {
        let whole = matched.groups.whole();
        let (path, ext) = (matched.group(3), matched.group(4));
        let prefix = whole
            .len()
            .checked_sub(path.len() + 1 + ext.len())
            .and_then(|end| whole.get(..end))
            .unwrap_or("");
        let info: Vec<&str> = prefix.split_whitespace().collect();
        let kind = info.first().map(|kind| kind.to_ascii_uppercase()).unwrap_or_default();
        let (subtype, option_text) = match info.as_slice() {
            [_, subtype, rest @ ..] if !rest.is_empty() => (subtype.to_string(), rest.join(" ")),
            [_, single] if single.contains('=') || single.eq_ignore_ascii_case("optional") => {
                (String::new(), single.to_string())
            }
            [_, subtype] => (subtype.to_string(), String::new()),
            _ => (String::new(), String::new()),
        };
        let entry = RuleEntry {
            kind,
            subtype,
            file: format!("{path}.{ext}"),
            options: options(&option_text, true, env),
            pos: env.pos.clone(),
        };
        if let Err(err) = self.descriptors.add_rule_entry(entry) {
            report_descriptor_error(env, err);
        }
    }

    fn close(&mut self, env: &mut Env) {
        match self.descriptors.close(env.pos) {
            Ok(Some(list)) => {
                log::debug!("{}: apriori {} with {} modules", env.pos, list.phase, list.modules.len());
                env.ctx.apriori.insert(list.phase.clone(), list);
            }
            Ok(None) => {}
            Err(err) => report_descriptor_error(env, err),
        }
    }
}

impl Dialect for Fdf {
    type Hook = FdfHook;

    const NAME: &'static str = "FDF";
    const FEATURES: Features = Features {
        includes: true,
        conditionals: true,
        error_directive: false,
    };

    fn schema() -> &'static Schema<FdfHook> {
        &SCHEMA
    }

    fn cache(ctx: &mut BuildContext) -> &mut IncludeCache<Document<Self>> {
        &mut ctx.fdfs
    }

    fn on_match(&mut self, hook: FdfHook, matched: &Matched, env: &mut Env) {
        let pos = env.pos;
        let result = match hook {
            FdfHook::Define => {
                define_from_fields(matched, env);
                Ok(())
            }
            FdfHook::DataStart => self
                .descriptors
                .open(Descriptor::new(DescriptorKind::DataBlock, pos, Vec::new())),
            FdfHook::DataAdd => {
                let bytes = matched
                    .line
                    .split(',')
                    .map(str::trim)
                    .filter(|byte| !byte.is_empty())
                    .map(str::to_string);
                self.descriptors.add_data(bytes)
            }
            FdfHook::EndDesc => {
                self.close(env);
                Ok(())
            }
            FdfHook::Apriori => {
                let phase = matched.group(1).to_ascii_uppercase();
                self.descriptors
                    .open(Descriptor::new(DescriptorKind::Apriori { phase }, pos, Vec::new()))
            }
            FdfHook::Inf => {
                self.inf_statement(matched, env);
                Ok(())
            }
            FdfHook::File => {
                let kind = DescriptorKind::File {
                    file_type: matched.group(1).to_ascii_uppercase(),
                    guid: matched.group(2).to_string(),
                    path: None,
                };
                let options = options(matched.group(3), true, env);
                self.descriptors.open(Descriptor::new(kind, pos, options))
            }
            FdfHook::Section => {
                self.section_statement(matched.group(1), matched.groups.get(2).is_some(), env);
                Ok(())
            }
            FdfHook::Path => self.descriptors.set_payload(&strip_quotes(matched.group(1))),
            FdfHook::Rule => {
                let kind = DescriptorKind::Rule {
                    file_type: matched.group(1).to_ascii_uppercase(),
                    name: matched.group(2).to_string(),
                };
                let rule = Descriptor::new(kind, pos, options(matched.group(3), true, env));
                if matched.groups.get(4).is_some() {
                    self.descriptors.open(rule)
                } else {
                    self.descriptors.add_rule(rule)
                }
            }
            FdfHook::Compress => {
                let compress_type = matched.groups.get(1).map(str::to_string);
                self.descriptors.open_rule_block(Descriptor::new(
                    DescriptorKind::Compress { compress_type },
                    pos,
                    Vec::new(),
                ))
            }
            FdfHook::Guided => {
                let guid = matched.groups.get(1).map(str::to_string);
                self.descriptors
                    .open_rule_block(Descriptor::new(DescriptorKind::Guided { guid }, pos, Vec::new()))
            }
            FdfHook::Version => {
                let entry = RuleEntry {
                    kind: matched.group(1).to_ascii_uppercase(),
                    subtype: String::new(),
                    file: String::new(),
                    options: options(matched.group(2), true, env),
                    pos: pos.clone(),
                };
                self.descriptors.add_rule_entry(entry)
            }
            FdfHook::Ext => {
                self.rule_entry(matched, env);
                Ok(())
            }
        };
        if let Err(err) = result {
            report_descriptor_error(env, err);
        }
    }

    /// A platform file included by a flash layout is parsed as a platform
    /// file; its lines before the first section are flash-layout statements.
    fn on_include(&mut self, partial: &str, env: &mut Env) {
        if !strip_quotes(partial).to_ascii_lowercase().ends_with(".dsc") {
            include_file::<Fdf>(partial, env);
            return;
        }
        let Some(resolved) = resolve_or_report(env.ctx, partial, env.pos) else {
            return;
        };
        env.ctx.xref.add_file_reference(&resolved.key, env.pos);
        if env.ctx.dscs.contains(&resolved.key) {
            log::trace!("{}: previously loaded: {}", env.pos, resolved.key);
            return;
        }
        if let Err(err) = check_cycle(env.ctx, &resolved.key) {
            env.report(DiagnosticKind::Reference, err.to_string());
            return;
        }

        let mut outcome = parse_file(env.ctx, &resolved, Dsc::collecting_outside_lines(), Vec::new());
        let lines = outcome.document.data.take_outside_lines();
        let macro_version = env.ctx.macros.version();
        env.ctx.dscs.insert(
            resolved.key,
            CacheEntry {
                macro_version,
                document: outcome.document,
                trailing_sections: outcome.trailing_sections,
            },
        );
        for (pos, line) in lines {
            self.on_outside_line(&line, &mut env.at(&pos));
        }
    }

    fn on_outside_line(&mut self, line: &str, env: &mut Env) {
        match dispatch("outside", OUTSIDE.as_slice(), line) {
            Ok(dispatched) => {
                if let Some(hook) = dispatched.hook {
                    let matched = Matched {
                        groups: &dispatched.groups,
                        fields: &dispatched.fields,
                        section: &*OUTSIDE_SECTION,
                        line,
                    };
                    self.on_match(hook, &matched, env);
                }
            }
            Err(_) => env.report(DiagnosticKind::Structural, "Unsupported line discovered outside of a section"),
        }
    }

    fn finish(&mut self, env: &mut Env) {
        for open in self.descriptors.abandon() {
            env.report(
                DiagnosticKind::Nesting,
                format!("Missing closing brace for {} opened at {}", open.tag().label(), open.pos),
            );
        }
    }
}
