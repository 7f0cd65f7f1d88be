use crate::diagnostics::SourcePos;
use crate::expression::{ExprError, evaluate, parse_expression};
use crate::macros::{MacroTable, has_undefined};
use thiserror::Error;

/// A `!` directive recognized at the start of a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Directive {
    Include,
    If,
    Ifdef,
    Ifndef,
    Elseif,
    Else,
    Endif,
    Error,
    Unknown(String),
}

/// Split a directive line into the directive and its argument text.
/// Returns `None` if the line is not a directive.
pub(crate) fn split_directive(line: &str) -> Option<(Directive, &str)> {
    let rest = line.strip_prefix('!')?;
    let (name, arg) = match rest.find(char::is_whitespace) {
        Some(split) => (&rest[..split], rest[split..].trim()),
        None => (rest, ""),
    };

    let directive = match name.to_ascii_lowercase().as_str() {
        "include" => Directive::Include,
        "if" => Directive::If,
        "ifdef" => Directive::Ifdef,
        "ifndef" => Directive::Ifndef,
        "elseif" | "elif" => Directive::Elseif,
        "else" => {
            // "!else if" is another spelling of "!elseif"
            let mut words = arg.splitn(2, char::is_whitespace);
            if words.next().is_some_and(|word| word.eq_ignore_ascii_case("if")) {
                return Some((Directive::Elseif, words.next().unwrap_or("").trim()));
            }
            Directive::Else
        }
        "endif" => Directive::Endif,
        "error" => Directive::Error,
        other => Directive::Unknown(other.to_string()),
    };
    Some((directive, arg))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConditionalError {
    #[error("Unexpected {0} directive encountered.")]
    Unexpected(&'static str),
    #[error("Unexpected {0} directive encountered after else.")]
    AfterElse(&'static str),
}

#[derive(Debug, Clone)]
struct Frame {
    /// whether the lines around the conditional were being processed
    enclosing_active: bool,
    /// an earlier branch at this level was taken
    handled: bool,
    else_seen: bool,
    opened_at: SourcePos,
}

/// Tracks `!if` nesting and decides whether the current line is processed.
///
/// Errors are returned after the state has been updated as far as possible,
/// so the caller only needs to report them.
#[derive(Debug, Clone)]
pub(crate) struct ConditionalEngine {
    active: bool,
    frames: Vec<Frame>,
}

impl Default for ConditionalEngine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConditionalEngine {
    pub(crate) fn new(active: bool) -> Self {
        Self {
            active,
            frames: Vec::new(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    /// `!if`, `!ifdef` and `!ifndef`. The condition is only evaluated if the
    /// enclosing scope is active.
    pub(crate) fn begin(&mut self, pos: &SourcePos, condition: impl FnOnce() -> bool) {
        let mut frame = Frame {
            enclosing_active: self.active,
            handled: false,
            else_seen: false,
            opened_at: pos.clone(),
        };
        if self.active {
            self.active = condition();
            frame.handled = self.active;
        }
        self.frames.push(frame);
        log::trace!("{pos}: conditional level {}, active: {}", self.frames.len(), self.active);
    }

    pub(crate) fn elseif(&mut self, condition: impl FnOnce() -> bool) -> Result<(), ConditionalError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(ConditionalError::Unexpected("elseif"));
        };
        if frame.enclosing_active && !frame.handled {
            self.active = condition();
            frame.handled = self.active;
        } else {
            self.active = false;
        }
        if frame.else_seen {
            return Err(ConditionalError::AfterElse("elseif"));
        }
        Ok(())
    }

    pub(crate) fn else_branch(&mut self) -> Result<(), ConditionalError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(ConditionalError::Unexpected("else"));
        };
        self.active = frame.enclosing_active && !frame.handled;
        frame.handled |= self.active;
        if frame.else_seen {
            return Err(ConditionalError::AfterElse("else"));
        }
        frame.else_seen = true;
        Ok(())
    }

    pub(crate) fn endif(&mut self) -> Result<(), ConditionalError> {
        let frame = self.frames.pop().ok_or(ConditionalError::Unexpected("endif"))?;
        self.active = frame.enclosing_active;
        Ok(())
    }

    /// Positions of the conditionals that are still open, innermost last
    pub(crate) fn unterminated(&self) -> impl Iterator<Item = &SourcePos> {
        self.frames.iter().map(|frame| &frame.opened_at)
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Condition of `!ifdef`, applied to the unexpanded argument.
///
/// `NAME` and `$(NAME)` test the macro table directly. Anything else is
/// expanded and evaluated, and counts as undefined only if the evaluation
/// fails because of an undefined macro.
pub(crate) fn eval_defined(raw_arg: &str, macros: &MacroTable) -> bool {
    let arg = raw_arg.trim();
    let name = arg
        .strip_prefix("$(")
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(arg);
    if is_identifier(name) {
        return macros.contains(name);
    }

    let expanded = macros.expand(arg);
    match parse_expression(&expanded).and_then(|expr| evaluate(&expr, macros)) {
        Ok(_) => true,
        Err(ExprError::UndefinedMacro(_)) => false,
        Err(_) => !has_undefined(&expanded),
    }
}
