use crate::FnvIndexMap;
use crate::diagnostics::SourcePos;
use crate::section::SectionPath;
use regex::{Captures, Regex};
use std::fmt;
use thiserror::Error;

/// How one capture group of a pattern is used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUsage {
    /// must be present and non-empty
    Required,
    /// may be empty; an absent group becomes an empty string
    Optional,
    /// must be empty or absent
    Forbidden,
    /// not part of the record
    Skip,
}

/// Usage of capture groups 1..n, written as a string with one character per
/// group: `R`equired, `O`ptional, `X` (forbidden) or a space (skipped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldContract(Vec<FieldUsage>);

impl FieldContract {
    pub fn parse(text: &str) -> Self {
        let usages = text
            .chars()
            .map(|c| match c {
                'R' => FieldUsage::Required,
                'O' => FieldUsage::Optional,
                'X' => FieldUsage::Forbidden,
                _ => FieldUsage::Skip,
            })
            .collect();
        Self(usages)
    }

    pub fn usages(&self) -> &[FieldUsage] {
        &self.0
    }

    /// Check the groups of a match and return the values of all non-skipped groups
    fn extract(&self, groups: &MatchGroups) -> Result<Vec<String>, (usize, FieldUsage)> {
        let mut values = Vec::with_capacity(self.0.len());
        for (index, usage) in self.0.iter().enumerate() {
            let group = index + 1;
            let value = groups.get(group).unwrap_or("");
            match usage {
                FieldUsage::Skip => continue,
                FieldUsage::Required if value.is_empty() => return Err((group, *usage)),
                FieldUsage::Forbidden if !value.is_empty() => return Err((group, *usage)),
                _ => values.push(value.to_string()),
            }
        }
        Ok(values)
    }
}

/// Names for the extracted values. A resolver picks the names from the match
/// when one pattern serves several layouts.
#[derive(Clone, Copy)]
pub enum FieldNames {
    Static(&'static [&'static str]),
    Resolver(fn(&MatchGroups) -> &'static [&'static str]),
}

impl FieldNames {
    fn resolve(&self, groups: &MatchGroups) -> &'static [&'static str] {
        match self {
            FieldNames::Static(names) => *names,
            FieldNames::Resolver(resolver) => resolver(groups),
        }
    }
}

impl fmt::Debug for FieldNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldNames::Static(names) => f.debug_tuple("Static").field(names).finish(),
            FieldNames::Resolver(_) => f.write_str("Resolver"),
        }
    }
}

/// The list a record is appended to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Binaries,
    BuildOptions,
    Capsules,
    Components,
    DefaultStores,
    Defines,
    Depex,
    Fds,
    Fvs,
    Guids,
    HeaderFiles,
    Includes,
    LibraryClasses,
    Packages,
    Pcds,
    Ppis,
    Protocols,
    SkuIds,
    Sources,
    UserExtensions,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Binaries => "Binaries",
            RecordKind::BuildOptions => "BuildOptions",
            RecordKind::Capsules => "Capsules",
            RecordKind::Components => "Components",
            RecordKind::DefaultStores => "DefaultStores",
            RecordKind::Defines => "Defines",
            RecordKind::Depex => "DepEx",
            RecordKind::Fds => "FDs",
            RecordKind::Fvs => "FVs",
            RecordKind::Guids => "GUIDs",
            RecordKind::HeaderFiles => "HeaderFiles",
            RecordKind::Includes => "Includes",
            RecordKind::LibraryClasses => "LibraryClasses",
            RecordKind::Packages => "Packages",
            RecordKind::Pcds => "Pcds",
            RecordKind::Ppis => "PPIs",
            RecordKind::Protocols => "Protocols",
            RecordKind::SkuIds => "SkuIds",
            RecordKind::Sources => "Sources",
            RecordKind::UserExtensions => "UserExtensions",
        };
        f.write_str(name)
    }
}

/// One record extracted from a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub fields: FnvIndexMap<&'static str, String>,
    pub pos: SourcePos,
    pub section: SectionPath,
}

impl Record {
    /// Value of a field; absent fields read as empty
    pub fn get(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }
}

/// Owned copy of the capture groups of a match, indexed like regex groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchGroups(Vec<Option<String>>);

impl MatchGroups {
    fn from_captures(caps: &Captures) -> Self {
        Self(caps.iter().map(|group| group.map(|m| m.as_str().to_string())).collect())
    }

    /// Group `index`, `None` if it did not participate or is empty
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0
            .get(index)
            .and_then(|group| group.as_deref())
            .filter(|value| !value.is_empty())
    }

    /// The complete matched text
    pub fn whole(&self) -> &str {
        self.0.first().and_then(|group| group.as_deref()).unwrap_or("")
    }
}

/// One way a line of a section may look
#[derive(Debug)]
pub struct Candidate<H> {
    pattern: Regex,
    contract: FieldContract,
    destination: Option<RecordKind>,
    names: FieldNames,
    hook: Option<H>,
}

impl<H: Copy> Candidate<H> {
    /// Patterns are matched case-insensitively and anchored at the start of the line
    pub fn new(
        pattern: &str,
        contract: &str,
        destination: Option<RecordKind>,
        names: FieldNames,
        hook: Option<H>,
    ) -> Self {
        let anchored = if pattern.starts_with('^') {
            format!("(?i){pattern}")
        } else {
            format!("(?i)^{pattern}")
        };
        Self {
            pattern: Regex::new(&anchored).unwrap(),
            contract: FieldContract::parse(contract),
            destination,
            names,
            hook,
        }
    }

    /// A candidate that only triggers a hook and produces no record
    pub fn hook_only(pattern: &str, contract: &str, hook: H) -> Self {
        Self::new(pattern, contract, None, FieldNames::Static(&[]), Some(hook))
    }
}

#[derive(Debug)]
pub struct SectionSchema<H> {
    pub candidates: Vec<Candidate<H>>,
    /// the section may only appear as a `<Name>` marker inside braces
    pub nested_only: bool,
}

/// The sections a dialect knows and how their lines look
#[derive(Debug)]
pub struct Schema<H> {
    sections: FnvIndexMap<&'static str, SectionSchema<H>>,
}

impl<H> Default for Schema<H> {
    fn default() -> Self {
        Self {
            sections: FnvIndexMap::default(),
        }
    }
}

impl<H: Copy> Schema<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, name: &'static str, candidates: Vec<Candidate<H>>) -> Self {
        self.sections.insert(
            name,
            SectionSchema {
                candidates,
                nested_only: false,
            },
        );
        self
    }

    pub fn nested_section(mut self, name: &'static str, candidates: Vec<Candidate<H>>) -> Self {
        self.sections.insert(
            name,
            SectionSchema {
                candidates,
                nested_only: true,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&SectionSchema<H>> {
        self.sections.get(name)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &&'static str> {
        self.sections.keys()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Invalid {section} format: {line}")]
    NoMatch { section: String, line: String },
    #[error("Invalid {section} format ({usage} field {group} {problem}): {line}")]
    Contract {
        section: String,
        line: String,
        group: usize,
        usage: &'static str,
        problem: &'static str,
    },
}

/// Result of a successful dispatch
#[derive(Debug, Clone)]
pub struct Dispatched<H> {
    pub hook: Option<H>,
    pub destination: Option<RecordKind>,
    pub fields: FnvIndexMap<&'static str, String>,
    pub groups: MatchGroups,
}

/// Match a line against the candidates of a section. The first candidate whose
/// pattern matches decides; its contract must then hold.
pub fn dispatch<H: Copy>(section: &str, candidates: &[Candidate<H>], line: &str) -> Result<Dispatched<H>, SchemaError> {
    let Some((candidate, caps)) = candidates
        .iter()
        .find_map(|candidate| candidate.pattern.captures(line).map(|caps| (candidate, caps)))
    else {
        return Err(SchemaError::NoMatch {
            section: section.to_string(),
            line: line.to_string(),
        });
    };

    let groups = MatchGroups::from_captures(&caps);
    let values = candidate.contract.extract(&groups).map_err(|(group, usage)| {
        let (usage, problem) = if usage == FieldUsage::Required {
            ("required", "is missing")
        } else {
            ("forbidden", "is present")
        };
        SchemaError::Contract {
            section: section.to_string(),
            line: line.to_string(),
            group,
            usage,
            problem,
        }
    })?;

    let names = candidate.names.resolve(&groups);
    let fields = names.iter().copied().zip(values).collect();
    Ok(Dispatched {
        hook: candidate.hook,
        destination: candidate.destination,
        fields,
        groups,
    })
}
