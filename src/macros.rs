use crate::FnvIndexMap;
use crate::diagnostics::SourcePos;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static MACRO_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\(([^)]+)\)").unwrap());
static UNDEFINED_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__([A-Za-z0-9_]+)__UNDEFINED__").unwrap());

/// Marker that ends the placeholder an undefined macro expands to
pub(crate) const UNDEFINED_SUFFIX: &str = "__UNDEFINED__";

/// The interpreted value of a macro
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroValue {
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl MacroValue {
    /// Interpret the right hand side of a macro definition.
    ///
    /// Decimal and `0x` hex integers become `Integer`, `TRUE` / `FALSE` in any case
    /// become `Boolean`. A string enclosed in double quotes loses its quotes,
    /// everything else is kept as opaque text.
    pub fn interpret(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(value) = parse_integer(raw) {
            return MacroValue::Integer(value);
        }
        if raw.eq_ignore_ascii_case("TRUE") {
            return MacroValue::Boolean(true);
        }
        if raw.eq_ignore_ascii_case("FALSE") {
            return MacroValue::Boolean(false);
        }
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            return MacroValue::Text(raw[1..raw.len() - 1].to_string());
        }
        MacroValue::Text(raw.to_string())
    }
}

impl fmt::Display for MacroValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroValue::Integer(value) => write!(f, "{value}"),
            MacroValue::Boolean(true) => write!(f, "TRUE"),
            MacroValue::Boolean(false) => write!(f, "FALSE"),
            MacroValue::Text(text) => write!(f, "{text}"),
        }
    }
}

/// Parse a decimal or hex integer literal, with an optional leading minus
pub(crate) fn parse_integer(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hexchars) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        // values with the sign bit set are accepted and wrap around
        u64::from_str_radix(hexchars, 16).ok()? as i64
    } else if !digits.is_empty() && digits.bytes().all(|c| c.is_ascii_digit()) {
        digits.parse::<i64>().ok()?
    } else {
        return None;
    };
    Some(if negative { value.wrapping_neg() } else { value })
}

#[derive(Debug, Clone)]
pub struct Macro {
    pub value: MacroValue,
    /// the text that replaces `$(NAME)`
    pub expansion: String,
    pub defined_at: SourcePos,
}

/// Versioned macro table shared by every file of a run.
///
/// The version only moves when a definition changes the interpreted value of
/// a macro, so redefining a macro with the same value keeps cached parses
/// valid, whatever notation the value is written in.
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: FnvIndexMap<String, Macro>,
    version: u64,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Define or redefine a macro and return the stored definition
    pub fn define(&mut self, name: &str, raw_value: &str, pos: &SourcePos) -> &Macro {
        let value = MacroValue::interpret(raw_value);
        let expansion = match &value {
            // keep integers in the notation they were written in
            MacroValue::Integer(_) => raw_value.trim().to_string(),
            other => other.to_string(),
        };

        let changed = self
            .macros
            .get(name)
            .is_none_or(|existing| existing.value.to_string() != value.to_string());
        if changed {
            self.version += 1;
            log::trace!("{pos}: v{}: {name} = {expansion}", self.version);
        }

        let entry = Macro {
            value,
            expansion,
            defined_at: pos.clone(),
        };
        let (index, _) = self.macros.insert_full(name.to_string(), entry);
        &self.macros[index]
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// All macros in definition order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Macro)> {
        self.macros.iter()
    }

    /// All macros sorted by name
    pub fn sorted(&self) -> Vec<(&String, &Macro)> {
        let mut entries: Vec<_> = self.macros.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Replace every `$(NAME)` in a line.
    ///
    /// Undefined macros become `__NAME__UNDEFINED__`, a macro with an empty
    /// value becomes `""`.
    pub fn expand(&self, line: &str) -> String {
        if !line.contains("$(") {
            return line.to_string();
        }
        MACRO_REF
            .replace_all(line, |caps: &regex::Captures| {
                let name = &caps[1];
                match self.macros.get(name) {
                    Some(mac) if mac.expansion.is_empty() => "\"\"".to_string(),
                    Some(mac) => mac.expansion.clone(),
                    None => undefined_placeholder(name),
                }
            })
            .into_owned()
    }
}

pub(crate) fn undefined_placeholder(name: &str) -> String {
    format!("__{name}{UNDEFINED_SUFFIX}")
}

pub(crate) fn has_undefined(text: &str) -> bool {
    text.contains(UNDEFINED_SUFFIX)
}

/// Turn undefined-macro placeholders back into `$(NAME)` for display
pub fn fix_undefined(text: &str) -> String {
    UNDEFINED_REF.replace_all(text, "$$($1)").into_owned()
}
