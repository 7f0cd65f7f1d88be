//! Line patterns shared by the dialect schemas. Every pattern is compiled
//! case-insensitive and anchored at the start of the line by the schema.

/// `name = value`, the value may be empty
pub(crate) const FIRM_EQUATE: &str = r"^([^=\s]+)\s*=\s*(.+)?$";

/// `name [= value]`, value in group 3
pub(crate) const SOFT_EQUATE: &str = r"^([^=\s]+)\s*(=\s*(.+))?$";

/// `first[|rest]`, rest in group 3
pub(crate) const ONE_BAR: &str = r"^([^\s|]+)(\s*\|\s*(.+))?$";

/// `first|second[|rest]`, rest in group 4
pub(crate) const ONE_OR_TWO_BARS: &str = r"^([^\s|]+)\s*\|\s*([^\s|]+)(\s*\|\s*(.+))?$";

/// `kind|path[|tag]...` with up to four tags in groups 4, 6, 8 and 10
pub(crate) const ONE_TO_FIVE_BARS: &str = r"^([^\s|]+)\s*\|\s*([^\s|]+)(\s*\|\s*([^\s|]*))?(\s*\|\s*([^\s|]*))?(\s*\|\s*([^\s|]*))?(\s*\|\s*([^\s|]*))?\s*$";

/// up to eight whitespace separated items
pub(crate) const ONE_TO_EIGHT_ITEMS: &str = r"^(\S+)\s*(\S+)?\s*(\S+)?\s*(\S+)?\s*(\S+)?\s*(\S+)?\s*(\S+)?\s*(\S+)?$";

pub(crate) const TO_EOL: &str = r"^(.+)$";

/// `[family:]option = [value]`; a trailing backslash is kept in group 5
pub(crate) const BUILD_OPTIONS: &str = r"^(([^:=\s]+):)?\s*([^\s=]+)\s*=\s*([^\\]+)?(\\)?$";

/// `path/Module.inf [{]`, brace in group 3
pub(crate) const COMPONENTS: &str = r"^([^\s{]+)(\s*(\{)?)?$";

pub(crate) const EDK_GLOBAL: &str = r"^(EDK_GLOBAL)\s+([^=\s]+)\s*=\s*(.+)?$";

/// `space.name|item|item|item|item|item [{]`.
///
/// The token space is group 1, the PCD name group 2, the items are groups
/// 4, 6, 8, 10 and 12 and an opening brace is group 13. An item is a quoted
/// (optionally wide) string, a brace-enclosed byte array or a plain word.
pub(crate) const PCDS: &str = concat!(
    r"^([^.\s|]+)\.([^\s|{]+)",
    r"(\s*\|\s*(L?'[^']*'|L?\x22[^\x22]*\x22|\{[^}]*\}|[^\s|{}]+)",
    r"(\s*\|\s*(L?'[^']*'|L?\x22[^\x22]*\x22|\{[^}]*\}|[^\s|{}]+)",
    r"(\s*\|\s*(L?'[^']*'|L?\x22[^\x22]*\x22|\{[^}]*\}|[^\s|{}]+)",
    r"(\s*\|\s*(L?'[^']*'|L?\x22[^\x22]*\x22|\{[^}]*\}|[^\s|{}]+)",
    r"(\s*\|\s*(L?'[^']*'|L?\x22[^\x22]*\x22|\{[^}]*\}|[^\s|{}]+)",
    r")?)?)?)?)?\s*(\{)?$"
);

/// PCD use in a module: `space.name[|value[|expression]]`
pub(crate) const PCD_USE: &str = r"^([^.\s|]+)\.([^\s|]+)(\s*\|\s*([^|]*[^|\s]))?(\s*\|\s*(.+))?$";

/// `protocol [| [NOT] space.pcd]`
pub(crate) const PROTOCOLS_BAR: &str = r"^([^\s|]+)(\s*\|\s*((NOT)\s+)?(([^.]+)\.)?(.+))?$";

/// `protocol = value`
pub(crate) const PROTOCOLS_EQU: &str = r"^([^=\s]+)\s*(=\s*(.+))$";

pub(crate) const APRIORI: &str = r"^APRIORI\s+(PEI|DXE)\s*(\{)$";
pub(crate) const COMPRESS: &str = r"^COMPRESS\s+([^\s{]+)?\s*\{$";
pub(crate) const DATA_START: &str = r"^DATA\s*=\s*\{$";
/// a line of comma separated bytes, a trailing comma is optional
pub(crate) const DATA_ADD: &str = r"^(0x[0-9A-F]{1,2}(\s*,\s*0x[0-9A-F]{1,2})*\s*,?)$";
pub(crate) const END_DESC: &str = r"^\}";

/// rule entry: `[kind [subtype] [options]] path.ext`, path in group 3 and extension in group 4
pub(crate) const EXT: &str = r"^(([^\s]+)\s+)*([^.]+)\.(.+)$";

/// `FILE type = guid [options] {`
pub(crate) const FILE: &str = r"^FILE\s+([^=\s]+)\s*=\s*([^\s{]+)\s*([^{]+)?\{$";
pub(crate) const GUIDED: &str = r"^GUIDED\s+([^\s{]+)?\s*\{$";

/// `INF [option = value ...] path`, path in group 4
pub(crate) const INF: &str = r#"^INF\s+(([^\s=]+)\s*=\s*("[^"]+"|[^\s]+)\s+)*(.+)$"#;

pub(crate) const OFFSET_SIZE: &str = ONE_BAR;
pub(crate) const PATH: &str = r"^([^{]+)(\{)?$";

/// `FILE type = name [options] [{]` in a rule section
pub(crate) const RULE: &str = r"^FILE\s+([^\s=]+)\s*=\s*([^\s{]+)\s*([^{]*)(\{)?$";
pub(crate) const SECTION: &str = r"^SECTION\s+([^{]+)(\{)?$";
pub(crate) const SET: &str = r"^(SET)\s+([^=\s]+)\s*=\s*(.+)?$";
pub(crate) const VERSION: &str = r"^(VERSION|UI)\s+(.+)$";

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn captures(pattern: &str, line: &str) -> Vec<Option<String>> {
        let regex = Regex::new(&format!("(?i){pattern}")).unwrap();
        let caps = regex.captures(line).unwrap();
        caps.iter().map(|group| group.map(|m| m.as_str().to_string())).collect()
    }

    fn group(caps: &[Option<String>], index: usize) -> Option<&str> {
        caps[index].as_deref()
    }

    #[test]
    fn pcd_items() {
        let caps = captures(PCDS, r#"gTokenSpace.PcdName|L"Wide|Text"|VOID*|{0x1, 0x2}"#);
        assert_eq!(group(&caps, 1), Some("gTokenSpace"));
        assert_eq!(group(&caps, 2), Some("PcdName"));
        assert_eq!(group(&caps, 4), Some(r#"L"Wide|Text""#));
        assert_eq!(group(&caps, 6), Some("VOID*"));
        assert_eq!(group(&caps, 8), Some("{0x1, 0x2}"));
        assert_eq!(group(&caps, 10), None);
        assert_eq!(group(&caps, 13), None);

        let caps = captures(PCDS, "gPkg.PcdTable|{0x0}|VOID*|0x10 {");
        assert_eq!(group(&caps, 8), Some("0x10"));
        assert_eq!(group(&caps, 13), Some("{"));
    }

    #[test]
    fn build_options() {
        let caps = captures(BUILD_OPTIONS, "MSFT:*_*_*_CC_FLAGS = /D MDEPKG_NDEBUG");
        assert_eq!(group(&caps, 2), Some("MSFT"));
        assert_eq!(group(&caps, 3), Some("*_*_*_CC_FLAGS"));
        assert_eq!(group(&caps, 4), Some("/D MDEPKG_NDEBUG"));
        let caps = captures(BUILD_OPTIONS, "*_*_*_CC_FLAGS =");
        assert_eq!(group(&caps, 2), None);
        assert_eq!(group(&caps, 4), None);
    }

    #[test]
    fn flash_layout_statements() {
        let caps = captures(FILE, "FILE FREEFORM = 7E374E25-8E01-4FEE-87F2-390C23C606CD Align=4K {");
        assert_eq!(group(&caps, 1), Some("FREEFORM"));
        assert_eq!(group(&caps, 2), Some("7E374E25-8E01-4FEE-87F2-390C23C606CD"));
        assert_eq!(group(&caps, 3), Some("Align=4K "));

        let caps = captures(INF, "INF  RuleOverride = UI USE = X64 MdeModulePkg/Core/Dxe/DxeMain.inf");
        assert_eq!(group(&caps, 4), Some("MdeModulePkg/Core/Dxe/DxeMain.inf"));

        let caps = captures(RULE, "FILE DRIVER = $(NAMED_GUID) Checksum {");
        assert_eq!(group(&caps, 3), Some("Checksum "));
        assert_eq!(group(&caps, 4), Some("{"));
        let caps = captures(RULE, "FILE DRIVER = $(NAMED_GUID)");
        assert_eq!(group(&caps, 4), None);

        let caps = captures(EXT, "PE32 PE32 Align=Auto |.efi");
        assert_eq!(group(&caps, 3), Some("|"));
        assert_eq!(group(&caps, 4), Some("efi"));

        let data = Regex::new(&format!("(?i){DATA_ADD}")).unwrap();
        assert!(data.is_match("0x01, 0x02, 0xFF"));
        assert!(data.is_match("0x01, 0x02,"));
        assert!(data.is_match("0xff"));
        assert!(!data.is_match("0x0|0x1000"));
    }
}
