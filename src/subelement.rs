use crate::diagnostics::SourcePos;
use crate::section::{SectionPath, parse_marker};

#[derive(Debug, Clone)]
pub(crate) struct SubElement {
    /// section of the record that opened the block
    pub(crate) owner: SectionPath,
    /// sections selected by the last `<Name>` marker
    pub(crate) nested: Option<Vec<SectionPath>>,
    pub(crate) opened_at: SourcePos,
}

/// What to do with a line while a brace block is open
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Routing {
    /// the block was closed by this line
    Closed,
    /// a `<Name>` marker switched the nested section
    Marker,
    /// dispatch the line to these sections
    Sections(Vec<SectionPath>),
}

/// Tracks `{ ... }` blocks that follow a record, e.g. a component with
/// module-scoped library classes and PCDs.
#[derive(Debug, Default)]
pub(crate) struct SubElementTracker {
    stack: Vec<SubElement>,
}

fn closes_block(line: &str) -> bool {
    line == "}" || (line.ends_with('}') && !line.contains('{'))
}

impl SubElementTracker {
    /// Open a block. A line listed under several sections opens one block only.
    pub(crate) fn enter(&mut self, owner: &SectionPath, pos: &SourcePos) {
        if self.stack.last().is_some_and(|top| top.opened_at == *pos) {
            return;
        }
        log::trace!("{pos}: entering sub-element of {owner}");
        self.stack.push(SubElement {
            owner: owner.clone(),
            nested: None,
            opened_at: pos.clone(),
        });
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.stack.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Decide where a line inside an open block goes
    pub(crate) fn route(&mut self, line: &str, pos: &SourcePos) -> Routing {
        if closes_block(line) {
            if let Some(closed) = self.stack.pop() {
                log::trace!("{pos}: exiting sub-element of {}", closed.owner);
            }
            return Routing::Closed;
        }

        let Some(top) = self.stack.last_mut() else {
            return Routing::Sections(Vec::new());
        };
        if line.starts_with('<')
            && let Some(sections) = parse_marker(line)
        {
            log::trace!("{pos}: sub-element section {line}");
            top.nested = Some(sections);
            return Routing::Marker;
        }

        match &top.nested {
            Some(nested) => Routing::Sections(nested.clone()),
            None => Routing::Sections(vec![top.owner.clone()]),
        }
    }

    /// Drop all open blocks, innermost first
    pub(crate) fn abandon(&mut self) -> Vec<SubElement> {
        let mut open = std::mem::take(&mut self.stack);
        open.reverse();
        open
    }
}
