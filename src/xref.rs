use crate::FnvIndexMap;
use crate::diagnostics::SourcePos;

/// Where a named item is defined, overridden and used
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XrefEntry {
    pub defined_at: Option<SourcePos>,
    pub value: Option<String>,
    pub override_at: Option<SourcePos>,
    pub override_value: Option<String>,
    pub references: Vec<SourcePos>,
}

/// Cross reference table for one kind of named item (GUIDs, PCDs, ...).
/// Entries are created on first use and never removed.
#[derive(Debug, Clone, Default)]
pub struct XrefTable {
    entries: FnvIndexMap<String, XrefEntry>,
}

impl XrefTable {
    /// Record a definition; a later definition replaces an earlier one
    pub fn define(&mut self, name: &str, value: &str, pos: &SourcePos) {
        let entry = self.entries.entry(name.to_string()).or_default();
        entry.defined_at = Some(pos.clone());
        entry.value = Some(value.to_string());
    }

    pub fn override_value(&mut self, name: &str, value: &str, pos: &SourcePos) {
        let entry = self.entries.entry(name.to_string()).or_default();
        entry.override_at = Some(pos.clone());
        entry.override_value = Some(value.to_string());
    }

    pub fn reference(&mut self, name: &str, pos: &SourcePos) {
        let entry = self.entries.entry(name.to_string()).or_default();
        entry.references.push(pos.clone());
    }

    pub fn get(&self, name: &str) -> Option<&XrefEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sorted(&self) -> Vec<(&String, &XrefEntry)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Names that are referenced somewhere but never defined
    pub fn undefined(&self) -> impl Iterator<Item = (&String, &XrefEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.defined_at.is_none() && !entry.references.is_empty())
    }
}

/// A file that still has to be parsed, with the line that asked for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFile {
    pub path: String,
    pub referenced_at: SourcePos,
}

/// Run-wide tables filled while the files of a platform are parsed
#[derive(Debug, Default)]
pub struct CrossReferenceTables {
    pub guids: XrefTable,
    pub ppis: XrefTable,
    pub protocols: XrefTable,
    pub pcds: XrefTable,
    pub library_classes: XrefTable,
    /// referenced file -> lines that reference it
    pub files: FnvIndexMap<String, Vec<SourcePos>>,
    /// module source file -> modules listing it
    pub sources: FnvIndexMap<String, Vec<SourcePos>>,
    pub module_queue: Vec<QueuedFile>,
    pub package_queue: Vec<QueuedFile>,
}

impl CrossReferenceTables {
    pub fn add_file_reference(&mut self, path: &str, pos: &SourcePos) {
        self.files.entry(path.to_string()).or_default().push(pos.clone());
    }

    pub fn add_source(&mut self, path: &str, pos: &SourcePos) {
        self.sources.entry(path.to_string()).or_default().push(pos.clone());
    }

    pub fn queue_module(&mut self, path: &str, pos: &SourcePos) {
        self.add_file_reference(path, pos);
        self.module_queue.push(QueuedFile {
            path: path.to_string(),
            referenced_at: pos.clone(),
        });
    }

    pub fn queue_package(&mut self, path: &str, pos: &SourcePos) {
        self.add_file_reference(path, pos);
        self.package_queue.push(QueuedFile {
            path: path.to_string(),
            referenced_at: pos.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_override_reference() {
        let dec = SourcePos::new("MdePkg/MdePkg.dec", 10);
        let dsc = SourcePos::new("Platform.dsc", 20);
        let inf = SourcePos::new("Driver.inf", 30);

        let mut pcds = XrefTable::default();
        pcds.reference("gPkg.PcdDebug", &inf);
        pcds.define("gPkg.PcdDebug", "0x0|UINT32|0x1", &dec);
        pcds.override_value("gPkg.PcdDebug", "0x2F", &dsc);

        let entry = pcds.get("gPkg.PcdDebug").unwrap();
        assert_eq!(entry.defined_at, Some(dec));
        assert_eq!(entry.value.as_deref(), Some("0x0|UINT32|0x1"));
        assert_eq!(entry.override_value.as_deref(), Some("0x2F"));
        assert_eq!(entry.references, vec![inf]);
        assert_eq!(pcds.undefined().count(), 0);
    }

    #[test]
    fn undefined_references_and_sorting() {
        let pos = SourcePos::new("Driver.inf", 1);
        let mut protocols = XrefTable::default();
        protocols.reference("gZProtocolGuid", &pos);
        protocols.define("gAProtocolGuid", "{...}", &pos);
        let names: Vec<_> = protocols.sorted().into_iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["gAProtocolGuid", "gZProtocolGuid"]);
        let undefined: Vec<_> = protocols.undefined().map(|(name, _)| name.as_str()).collect();
        assert_eq!(undefined, ["gZProtocolGuid"]);
    }

    #[test]
    fn queues_record_file_references() {
        let mut tables = CrossReferenceTables::default();
        let pos = SourcePos::new("Platform.dsc", 5);
        tables.queue_module("Pkg/Driver/Driver.inf", &pos);
        tables.queue_module("Pkg/Driver/Driver.inf", &pos);
        tables.queue_package("MdePkg/MdePkg.dec", &pos);
        assert_eq!(tables.module_queue.len(), 2);
        assert_eq!(tables.files["Pkg/Driver/Driver.inf"].len(), 2);
        assert_eq!(tables.files.len(), 2);
    }
}
