use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[([^\[\]]+)\]").unwrap());

/// Architectures that section tags are checked against. Any other tag
/// (COMMON, a module type, ...) does not restrict the section.
pub const ALL_ARCHITECTURES: [&str; 5] = ["AARCH32", "AARCH64", "IA32", "RISCV64", "X64"];

const ALL_TOOLING: [&str; 2] = ["EDK", "EDKII"];

/// `name[.arch[.tooling]]`, stored lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectionPath {
    segments: Vec<String>,
}

impl SectionPath {
    pub fn parse(text: &str) -> Self {
        let segments = text
            .trim()
            .to_ascii_lowercase()
            .split('.')
            .map(|segment| segment.trim().to_string())
            .collect();
        Self { segments }
    }

    pub fn name(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or("")
    }

    pub fn arch(&self) -> Option<&str> {
        self.segments.get(1).map(String::as_str)
    }

    pub fn tooling(&self) -> Option<&str> {
        self.segments.get(2).map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Decide whether lines in this section apply to the supported architectures.
    ///
    /// An empty `supported` list places no restriction on architectures.
    pub fn is_supported(&self, supported: &[String]) -> bool {
        let Some(arch) = self.arch() else {
            return true;
        };
        let arch = match arch.to_ascii_uppercase().as_str() {
            "PEIM" => "IA32".to_string(),
            "ARM" => "AARCH64".to_string(),
            "IPF" => "X64".to_string(),
            other => other.to_string(),
        };
        if !ALL_ARCHITECTURES.contains(&arch.as_str()) {
            return true;
        }
        if !supported.is_empty() && !supported.iter().any(|s| s.eq_ignore_ascii_case(&arch)) {
            return false;
        }
        match self.tooling() {
            None => true,
            Some(tooling) => {
                let tooling = tooling.to_ascii_uppercase();
                // only the old EDK tooling is excluded
                !ALL_TOOLING.contains(&tooling.as_str()) || tooling == "EDKII"
            }
        }
    }
}

impl fmt::Display for SectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.segments.join("."))
    }
}

/// Parse a `[a, b.X64, ...]` header line. Returns `None` if the line is not a header.
pub fn parse_header(line: &str) -> Option<Vec<SectionPath>> {
    let caps = SECTION_HEADER.captures(line)?;
    Some(caps[1].split(',').map(SectionPath::parse).collect())
}

/// Parse a `<Name>` sub-element marker into a section header
pub(crate) fn parse_marker(line: &str) -> Option<Vec<SectionPath>> {
    let inner = line.trim().strip_prefix('<')?;
    let end = inner.find('>')?;
    Some(inner[..end].split(',').map(SectionPath::parse).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supported(archs: &[&str]) -> Vec<String> {
        archs.iter().map(|arch| arch.to_string()).collect()
    }

    #[test]
    fn header_parsing() {
        let sections = parse_header("[Components.X64, LibraryClasses.common.PEIM]").unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].name(), "components");
        assert_eq!(sections[0].arch(), Some("x64"));
        assert_eq!(sections[1].tooling(), Some("peim"));
        assert_eq!(sections[1].to_string(), "[libraryclasses.common.peim]");
        assert!(parse_header("FOO = [1]").is_none());
        assert!(parse_header("[]").is_none());
    }

    #[test]
    fn marker_parsing() {
        let sections = parse_marker("<LibraryClasses>").unwrap();
        assert_eq!(sections[0].name(), "libraryclasses");
        assert!(parse_marker("gPkg.Pcd|1").is_none());
    }

    #[test]
    fn architecture_filter() {
        let x64 = supported(&["X64"]);
        assert!(SectionPath::parse("Defines").is_supported(&x64));
        assert!(SectionPath::parse("Components.X64").is_supported(&x64));
        assert!(!SectionPath::parse("Components.IA32").is_supported(&x64));
        assert!(SectionPath::parse("Components.common").is_supported(&x64));
        assert!(SectionPath::parse("LibraryClasses.common.PEIM").is_supported(&x64));
        assert!(SectionPath::parse("Components.IPF").is_supported(&x64));
        assert!(!SectionPath::parse("Components.PEIM").is_supported(&x64));
        // no restriction configured
        assert!(SectionPath::parse("Components.IA32").is_supported(&[]));
    }

    #[test]
    fn tooling_filter() {
        let x64 = supported(&["X64"]);
        assert!(SectionPath::parse("BuildOptions.X64.EDKII").is_supported(&x64));
        assert!(!SectionPath::parse("BuildOptions.X64.EDK").is_supported(&x64));
        assert!(SectionPath::parse("LibraryClasses.X64.DXE_DRIVER").is_supported(&x64));
        assert!(!SectionPath::parse("BuildOptions.IA32.EDKII").is_supported(&x64));
    }
}
