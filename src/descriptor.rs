use crate::FnvIndexMap;
use crate::diagnostics::SourcePos;
use thiserror::Error;

/// One `NAME=VALUE` option of a flash-layout statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdfOption {
    pub name: String,
    pub value: String,
}

impl FdfOption {
    fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionError {
    #[error("Invalid option combination encountered: {0}")]
    InvalidCombination(String),
    #[error("Missing value for option: {0}")]
    MissingValue(String),
}

/// Parse `Align=Auto Optional CHECKSUM = TRUE` into ordered options.
///
/// With `allow_singles`, a word that is not followed by `=` becomes an
/// option with the value `TRUE`.
pub fn parse_options(text: &str, allow_singles: bool) -> Result<Vec<FdfOption>, OptionError> {
    enum Expect {
        Name,
        Equals,
        Value,
    }

    let spaced = text.replace('=', " = ");
    let mut options = Vec::new();
    let mut expect = Expect::Name;
    let mut name = "";
    for token in spaced.split_whitespace() {
        match expect {
            Expect::Name => {
                name = token;
                expect = Expect::Equals;
            }
            Expect::Equals if token == "=" => expect = Expect::Value,
            Expect::Equals if allow_singles => {
                options.push(FdfOption::new(name, "TRUE"));
                name = token;
            }
            Expect::Equals => return Err(OptionError::InvalidCombination(text.trim().to_string())),
            Expect::Value => {
                options.push(FdfOption::new(name, token));
                expect = Expect::Name;
            }
        }
    }
    match expect {
        Expect::Name => Ok(options),
        Expect::Equals if allow_singles => {
            options.push(FdfOption::new(name, "TRUE"));
            Ok(options)
        }
        _ => Err(OptionError::MissingValue(name.to_string())),
    }
}

/// Render options the way they are written in the file
pub fn options_string(options: &[FdfOption]) -> String {
    options
        .iter()
        .map(|option| format!("{}={}", option.name, option.value))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorKind {
    /// `DATA = { ... }` in an FD region
    DataBlock,
    /// `APRIORI PEI|DXE { ... }`
    Apriori { phase: String },
    /// `FILE type = guid options { ... }` in an FV
    File {
        file_type: String,
        guid: String,
        /// payload of a RAW file
        path: Option<String>,
    },
    /// `SECTION type = value options`
    Section { section_type: String, value: String },
    /// `GUIDED guid { ... }` in a rule or `SECTION GUIDED guid { ... }` in a file
    Guided { guid: Option<String> },
    /// `COMPRESS type { ... }` in a rule or `SECTION COMPRESS type { ... }` in a file
    Compress { compress_type: Option<String> },
    /// `FILE type = name options { ... }` in a `[Rule]` section
    Rule { file_type: String, name: String },
}

/// Kind identity without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorTag {
    DataBlock,
    Apriori,
    File,
    Section,
    Guided,
    Compress,
    Rule,
}

impl DescriptorTag {
    pub fn label(self) -> &'static str {
        match self {
            DescriptorTag::DataBlock => "data list",
            DescriptorTag::Apriori => "apriori list",
            DescriptorTag::File => "file descriptor",
            DescriptorTag::Section => "section descriptor",
            DescriptorTag::Guided => "guided descriptor",
            DescriptorTag::Compress => "compressed descriptor",
            DescriptorTag::Rule => "rule descriptor",
        }
    }
}

impl DescriptorKind {
    pub fn tag(&self) -> DescriptorTag {
        match self {
            DescriptorKind::DataBlock => DescriptorTag::DataBlock,
            DescriptorKind::Apriori { .. } => DescriptorTag::Apriori,
            DescriptorKind::File { .. } => DescriptorTag::File,
            DescriptorKind::Section { .. } => DescriptorTag::Section,
            DescriptorKind::Guided { .. } => DescriptorTag::Guided,
            DescriptorKind::Compress { .. } => DescriptorTag::Compress,
            DescriptorKind::Rule { .. } => DescriptorTag::Rule,
        }
    }
}

/// A line inside a rule: `PE32 PE32 Align=Auto |.efi`, `UI STRING="$(MODULE_NAME)"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub kind: String,
    pub subtype: String,
    pub file: String,
    pub options: Vec<FdfOption>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub kind: DescriptorKind,
    pub pos: SourcePos,
    pub options: Vec<FdfOption>,
    pub entries: Vec<RuleEntry>,
    /// data bytes of a data block or modules of an apriori list
    pub items: Vec<String>,
    pub children: Vec<Descriptor>,
}

impl Descriptor {
    pub fn new(kind: DescriptorKind, pos: &SourcePos, options: Vec<FdfOption>) -> Self {
        Self {
            kind,
            pos: pos.clone(),
            options,
            entries: Vec::new(),
            items: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn tag(&self) -> DescriptorTag {
        self.kind.tag()
    }

    /// Number of descriptors in this subtree, including this one
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Descriptor::node_count).sum::<usize>()
    }
}

/// Modules that are loaded before all others in one phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AprioriList {
    pub phase: String,
    pub pos: SourcePos,
    pub modules: Vec<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Previous {} not terminated", .0.label())]
    AlreadyOpen(DescriptorTag),
    #[error("End brace found without matching start brace")]
    UnmatchedClose,
    #[error("{0}")]
    NotAllowed(&'static str),
}

/// Builds the descriptor trees of one flash-layout file.
///
/// Open descriptors live on a stack. A closing brace pops the innermost one
/// and attaches it to the descriptor below it, or to the matching top-level
/// list of the file if nothing is open below it.
#[derive(Debug, Default)]
pub struct DescriptorBuilder {
    stack: Vec<Descriptor>,
    pub files: Vec<Descriptor>,
    pub rules: Vec<Descriptor>,
    pub data_blocks: Vec<Descriptor>,
    pub apriori: FnvIndexMap<String, AprioriList>,
}

impl DescriptorBuilder {
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_open(&self, tag: DescriptorTag) -> bool {
        self.stack.iter().any(|open| open.tag() == tag)
    }

    pub fn top(&self) -> Option<&Descriptor> {
        self.stack.last()
    }

    fn top_tag(&self) -> Option<DescriptorTag> {
        self.stack.last().map(Descriptor::tag)
    }

    /// Start a new descriptor; only one descriptor of each kind may be open
    pub fn open(&mut self, descriptor: Descriptor) -> Result<(), DescriptorError> {
        let tag = descriptor.tag();
        if self.is_open(tag) {
            return Err(DescriptorError::AlreadyOpen(tag));
        }
        log::trace!("{}: entering {}", descriptor.pos, tag.label());
        self.stack.push(descriptor);
        Ok(())
    }

    /// `SECTION GUIDED` or `SECTION COMPRESS` with a block, or a plain section
    /// leaf; all of them belong to a file, guided or compressed descriptor
    fn require_section_parent(&self) -> Result<(), DescriptorError> {
        match self.top_tag() {
            Some(DescriptorTag::File | DescriptorTag::Guided | DescriptorTag::Compress) => Ok(()),
            _ => Err(DescriptorError::NotAllowed(
                "SECTION not allowed outside of file description",
            )),
        }
    }

    pub fn open_section_block(&mut self, descriptor: Descriptor) -> Result<(), DescriptorError> {
        self.require_section_parent()?;
        self.open(descriptor)
    }

    pub fn add_section(&mut self, section: Descriptor) -> Result<(), DescriptorError> {
        self.require_section_parent()?;
        if let Some(top) = self.stack.last_mut() {
            top.children.push(section);
        }
        Ok(())
    }

    /// `GUIDED` and `COMPRESS` blocks in a rule
    pub fn open_rule_block(&mut self, descriptor: Descriptor) -> Result<(), DescriptorError> {
        if !self.is_open(DescriptorTag::Rule) {
            return Err(DescriptorError::NotAllowed("RULE must start with FILE description"));
        }
        self.open(descriptor)
    }

    /// A rule without a block is complete as soon as it is read
    pub fn add_rule(&mut self, rule: Descriptor) -> Result<(), DescriptorError> {
        if self.is_open(DescriptorTag::Rule) {
            return Err(DescriptorError::AlreadyOpen(DescriptorTag::Rule));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn add_rule_entry(&mut self, entry: RuleEntry) -> Result<(), DescriptorError> {
        if !self.is_open(DescriptorTag::Rule) {
            return Err(DescriptorError::NotAllowed("RULE must start with FILE description"));
        }
        match self.stack.last_mut() {
            Some(top) if matches!(top.tag(), DescriptorTag::Rule | DescriptorTag::Guided | DescriptorTag::Compress) => {
                top.entries.push(entry);
                Ok(())
            }
            _ => Err(DescriptorError::NotAllowed("Rule entry not allowed here")),
        }
    }

    pub fn add_data(&mut self, bytes: impl IntoIterator<Item = String>) -> Result<(), DescriptorError> {
        match self.stack.last_mut() {
            Some(top) if top.tag() == DescriptorTag::DataBlock => {
                top.items.extend(bytes);
                Ok(())
            }
            _ => Err(DescriptorError::NotAllowed("Data list not allowed here")),
        }
    }

    /// Add a module to the open apriori list. Returns false if no list is open.
    pub fn add_apriori_module(&mut self, module: &str) -> bool {
        match self.stack.iter_mut().rev().find(|open| open.tag() == DescriptorTag::Apriori) {
            Some(list) => {
                list.items.push(module.to_string());
                true
            }
            None => false,
        }
    }

    /// Payload path line inside a `FILE RAW` block
    pub fn set_payload(&mut self, payload: &str) -> Result<(), DescriptorError> {
        let Some(top) = self.stack.last_mut() else {
            return Err(DescriptorError::NotAllowed("FV path not allowed outside of file description"));
        };
        match &mut top.kind {
            DescriptorKind::File { file_type, path, .. } => {
                if !file_type.eq_ignore_ascii_case("RAW") {
                    return Err(DescriptorError::NotAllowed("FV path only allowed with RAW file types"));
                }
                *path = Some(payload.to_string());
                Ok(())
            }
            _ => Err(DescriptorError::NotAllowed("FV path not allowed outside of file description")),
        }
    }

    /// Close the innermost open descriptor. A closed apriori list is returned
    /// so the caller can publish it run-wide.
    pub fn close(&mut self, pos: &SourcePos) -> Result<Option<AprioriList>, DescriptorError> {
        let closed = self.stack.pop().ok_or(DescriptorError::UnmatchedClose)?;
        log::trace!("{pos}: exiting {}", closed.tag().label());

        if let DescriptorKind::Apriori { phase } = &closed.kind {
            let list = AprioriList {
                phase: phase.clone(),
                pos: closed.pos.clone(),
                modules: closed.items.clone(),
            };
            self.apriori.insert(phase.clone(), list.clone());
            return Ok(Some(list));
        }

        match self.stack.last_mut() {
            Some(parent) => parent.children.push(closed),
            None => match closed.tag() {
                DescriptorTag::Rule => self.rules.push(closed),
                DescriptorTag::DataBlock => self.data_blocks.push(closed),
                // sections, guided and compressed blocks always open inside a
                // file or rule, so only files reach this point
                _ => self.files.push(closed),
            },
        }
        Ok(None)
    }

    /// Drop everything that is still open, innermost first
    pub fn abandon(&mut self) -> Vec<Descriptor> {
        let mut open = std::mem::take(&mut self.stack);
        open.reverse();
        open
    }
}
