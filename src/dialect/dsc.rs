use super::patterns::*;
use super::{define_from_fields, pcd_name, strip_quotes};
use crate::context::BuildContext;
use crate::diagnostics::{DiagnosticKind, SourcePos};
use crate::include::IncludeCache;
use crate::parser::{Dialect, Document, Env, Features, Matched};
use crate::schema::{Candidate, FieldNames, MatchGroups, RecordKind, Schema};
use std::sync::LazyLock;

const PCD_NAMES: &[&str] = &["pcdtokenspaceguidname", "pcdname", "value", "datumtype", "maximumdatumsize"];
const HII_NAMES: &[&str] = &[
    "pcdtokenspaceguidname",
    "pcdname",
    "variablename",
    "variableguid",
    "variableoffset",
    "hiidefaultvalue",
    "hiiattribute",
];

/// VPD PCDs are `offset|value` or `offset|size|value`
fn vpd_names(groups: &MatchGroups) -> &'static [&'static str] {
    if groups.get(8).is_some() {
        &["pcdtokenspaceguidname", "pcdname", "vpdoffset", "maximumdatumsize", "value"]
    } else {
        &["pcdtokenspaceguidname", "pcdname", "vpdoffset", "value"]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DscHook {
    Define,
    Component,
    LibraryClass,
    Pcd,
}

fn pcd_section(contract: &str, names: FieldNames) -> Vec<Candidate<DscHook>> {
    vec![Candidate::new(PCDS, contract, Some(RecordKind::Pcds), names, Some(DscHook::Pcd))]
}

static SCHEMA: LazyLock<Schema<DscHook>> = LazyLock::new(|| {
    use FieldNames::{Resolver, Static};
    Schema::new()
        .section(
            "buildoptions",
            vec![Candidate::new(
                BUILD_OPTIONS,
                " ORO",
                Some(RecordKind::BuildOptions),
                Static(&["tag", "option", "value"]),
                None,
            )],
        )
        .section(
            "components",
            vec![Candidate::new(
                COMPONENTS,
                "R",
                Some(RecordKind::Components),
                Static(&["inf"]),
                Some(DscHook::Component),
            )],
        )
        .section(
            "defaultstores",
            vec![Candidate::new(
                ONE_BAR,
                "R R",
                Some(RecordKind::DefaultStores),
                Static(&["value", "name"]),
                None,
            )],
        )
        .section(
            "defines",
            vec![
                Candidate::new(
                    FIRM_EQUATE,
                    "RO",
                    Some(RecordKind::Defines),
                    Static(&["macro", "value"]),
                    Some(DscHook::Define),
                ),
                Candidate::new(
                    EDK_GLOBAL,
                    " RO",
                    Some(RecordKind::Defines),
                    Static(&["macro", "value"]),
                    Some(DscHook::Define),
                ),
            ],
        )
        .section(
            "libraryclasses",
            vec![Candidate::new(
                ONE_BAR,
                "R R",
                Some(RecordKind::LibraryClasses),
                Static(&["name", "path"]),
                Some(DscHook::LibraryClass),
            )],
        )
        .section("pcdsdynamic", pcd_section("RR R O O X X", Static(PCD_NAMES)))
        .section("pcdsdynamicdefault", pcd_section("RR R O O X X", Static(PCD_NAMES)))
        .section("pcdsdynamicex", pcd_section("RR R O O X X", Static(PCD_NAMES)))
        .section("pcdsdynamicexdefault", pcd_section("RR O O O X X", Static(PCD_NAMES)))
        .section("pcdsdynamicexhii", pcd_section("RR R R R O O", Static(HII_NAMES)))
        .section("pcdsdynamicexvpd", pcd_section("RR R O O X X", Resolver(vpd_names)))
        .section("pcdsdynamichii", pcd_section("RR R R R O O", Static(HII_NAMES)))
        .section("pcdsdynamicvpd", pcd_section("RR R O O X X", Resolver(vpd_names)))
        .section("pcdsfeatureflag", pcd_section("RR O X X X X", Static(PCD_NAMES)))
        .section("pcdsfixedatbuild", pcd_section("RR R O O X X", Static(PCD_NAMES)))
        .section("pcdspatchableinmodule", pcd_section("RR R O O X X", Static(PCD_NAMES)))
        .section(
            "skuids",
            vec![Candidate::new(
                ONE_OR_TWO_BARS,
                "RR O",
                Some(RecordKind::SkuIds),
                Static(&["value", "skuid", "parent"]),
                None,
            )],
        )
        .section(
            "userextensions",
            vec![Candidate::new(
                TO_EOL,
                "R",
                Some(RecordKind::UserExtensions),
                Static(&["ext"]),
                None,
            )],
        )
});

/// Platform description file.
///
/// When a flash-layout file includes a platform file, the lines before the
/// first section belong to the flash layout; they are collected instead of
/// being reported.
#[derive(Debug, Default)]
pub struct Dsc {
    outside_lines: Option<Vec<(SourcePos, String)>>,
}

impl Dsc {
    pub(crate) fn collecting_outside_lines() -> Self {
        Self {
            outside_lines: Some(Vec::new()),
        }
    }

    pub(crate) fn take_outside_lines(&mut self) -> Vec<(SourcePos, String)> {
        self.outside_lines.take().unwrap_or_default()
    }
}

impl Dialect for Dsc {
    type Hook = DscHook;

    const NAME: &'static str = "DSC";
    const FEATURES: Features = Features {
        includes: true,
        conditionals: true,
        error_directive: true,
    };

    fn schema() -> &'static Schema<DscHook> {
        &SCHEMA
    }

    fn cache(ctx: &mut BuildContext) -> &mut IncludeCache<Document<Self>> {
        &mut ctx.dscs
    }

    fn on_match(&mut self, hook: DscHook, matched: &Matched, env: &mut Env) {
        match hook {
            DscHook::Define => {
                if let Some(name) = define_from_fields(matched, env) {
                    self.on_macro(&name, env);
                }
            }
            DscHook::Component => {
                env.ctx.xref.queue_module(matched.group(1), env.pos);
                if matched.groups.get(3).is_some() {
                    env.enter_subelement(matched.section);
                }
            }
            DscHook::LibraryClass => {
                let path = strip_quotes(matched.group(3));
                env.ctx.xref.queue_module(&path, env.pos);
                let name = matched.group(1);
                if !name.eq_ignore_ascii_case("NULL") {
                    env.ctx.xref.library_classes.override_value(name, &path, env.pos);
                }
            }
            DscHook::Pcd => {
                // only plain default overrides: up to three items
                if matched.groups.get(10).is_some() || matched.groups.get(12).is_some() {
                    return;
                }
                let mut items: Vec<&str> = [4, 6, 8].iter().map(|&index| matched.group(index)).collect();
                while items.last().is_some_and(|item| item.is_empty()) {
                    items.pop();
                }
                let name = pcd_name(matched.group(1), matched.group(2));
                env.ctx.xref.pcds.override_value(&name, &items.join("|"), env.pos);
            }
        }
    }

    fn on_outside_line(&mut self, line: &str, env: &mut Env) {
        match &mut self.outside_lines {
            Some(lines) => lines.push((env.pos.clone(), line.to_string())),
            None => env.report(DiagnosticKind::Structural, "Unsupported line discovered outside of a section"),
        }
    }

    fn on_macro(&mut self, name: &str, env: &mut Env) {
        if name != "SUPPORTED_ARCHITECTURES" {
            return;
        }
        let Some(mac) = env.ctx.macros.get(name) else {
            return;
        };
        let architectures: Vec<String> = mac
            .expansion
            .split('|')
            .map(|arch| strip_quotes(arch).to_ascii_uppercase())
            .filter(|arch| !arch.is_empty())
            .collect();
        log::debug!("{}: supported architectures {}", env.pos, architectures.join(", "));
        env.ctx.supported_architectures = architectures;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::testing::{context, locate, write_tree};
    use crate::parser::parse_file;
    use tempfile::tempdir;

    fn collected(dsc: &mut Dsc) -> Vec<String> {
        dsc.take_outside_lines().into_iter().map(|(_, line)| line).collect()
    }

    #[test]
    fn ifdef_selects_first_branch() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[("p.dsc", "DEFINE X = 1\n!ifdef X\nA\n!else\nB\n!endif\n")],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        let mut outcome = parse_file(&mut ctx, &file, Dsc::collecting_outside_lines(), Vec::new());

        assert_eq!(collected(&mut outcome.document.data), ["A"]);
        let x = ctx.macros.get("X").unwrap();
        assert_eq!(x.expansion, "1");
        assert_eq!(x.defined_at, SourcePos::new("p.dsc", 1));
        assert!(ctx.diagnostics.is_empty());
    }

    #[test]
    fn ifndef_selects_branch_of_undefined_macro() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[(
                "p.dsc",
                "DEFINE X = 1\n!ifndef X\nA\n!endif\n!ifndef $(Y)\nB\n!else\nC\n!endif\n",
            )],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        let mut outcome = parse_file(&mut ctx, &file, Dsc::collecting_outside_lines(), Vec::new());

        assert_eq!(collected(&mut outcome.document.data), ["B"]);
        assert!(ctx.diagnostics.is_empty(), "{:?}", ctx.diagnostics);
    }

    #[test]
    fn elseif_chain_takes_first_true_branch() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[("p.dsc", "!if 1 > 2\nX\n!elseif 3 > 2\nY\n!else\nZ\n!endif\n")],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        let mut outcome = parse_file(&mut ctx, &file, Dsc::collecting_outside_lines(), Vec::new());

        assert_eq!(collected(&mut outcome.document.data), ["Y"]);
        assert!(ctx.diagnostics.is_empty());
    }

    #[test]
    fn missing_include_is_reported_and_parsing_continues() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[("p.dsc", "[Defines]\n!include missing.dsc\nPLATFORM_NAME = Demo\n")],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        let outcome = parse_file(&mut ctx, &file, Dsc::default(), Vec::new());

        assert_eq!(ctx.diagnostics.len(), 1);
        assert_eq!(ctx.diagnostics.count(DiagnosticKind::Reference), 1);
        let diagnostic = ctx.diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.pos, SourcePos::new("p.dsc", 2));
        assert!(diagnostic.message.contains("missing.dsc"));
        assert_eq!(outcome.document.records(RecordKind::Defines).len(), 1);
        assert_eq!(ctx.macros.get("PLATFORM_NAME").unwrap().expansion, "Demo");
    }

    #[test]
    fn directives_in_inactive_region_are_silent() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[(
                "p.dsc",
                "!if FALSE\n\
                 !include missing.dsc\n\
                 !include p.dsc\n\
                 !frobnicate\n\
                 !error never\n\
                 !endif\n\
                 A\n",
            )],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        let mut outcome = parse_file(&mut ctx, &file, Dsc::collecting_outside_lines(), Vec::new());

        assert!(ctx.diagnostics.is_empty(), "{:?}", ctx.diagnostics);
        assert_eq!(collected(&mut outcome.document.data), ["A"]);
        assert!(ctx.dscs.is_empty());
        assert!(ctx.xref.files.is_empty());
        assert_eq!(ctx.stats.files_parsed, 1);
    }

    #[test]
    fn components_and_library_classes() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[(
                "p.dsc",
                "[LibraryClasses]\n\
                 DebugLib|\"MdePkg/Library/BaseDebugLibNull/BaseDebugLibNull.inf\"\n\
                 NULL|MdePkg/Library/Null/Null.inf\n\
                 [Components.X64]\n\
                 MdeModulePkg/Core/Dxe/DxeMain.inf {\n\
                 <LibraryClasses>\n\
                 SerialPortLib|MdePkg/Library/Serial/Serial.inf\n\
                 <PcdsFixedAtBuild>\n\
                 gEfiMdePkgTokenSpaceGuid.PcdDebugPrintErrorLevel|0x80000000\n\
                 }\n\
                 [Components.IA32]\n\
                 Ia32Only/Module.inf\n",
            )],
        );
        let mut ctx = context(dir.path());
        ctx.supported_architectures = vec!["X64".to_string()];
        let file = locate(&ctx, "p.dsc");
        let outcome = parse_file(&mut ctx, &file, Dsc::default(), Vec::new());

        assert!(ctx.diagnostics.is_empty(), "{:?}", ctx.diagnostics);
        let queued: Vec<&str> = ctx.xref.module_queue.iter().map(|queued| queued.path.as_str()).collect();
        assert_eq!(
            queued,
            [
                "MdePkg/Library/BaseDebugLibNull/BaseDebugLibNull.inf",
                "MdePkg/Library/Null/Null.inf",
                "MdeModulePkg/Core/Dxe/DxeMain.inf",
                "MdePkg/Library/Serial/Serial.inf",
            ]
        );
        assert!(ctx.xref.library_classes.get("NULL").is_none());
        let debug_lib = ctx.xref.library_classes.get("DebugLib").unwrap();
        assert_eq!(
            debug_lib.override_value.as_deref(),
            Some("MdePkg/Library/BaseDebugLibNull/BaseDebugLibNull.inf")
        );
        let level = ctx
            .xref
            .pcds
            .get("gEfiMdePkgTokenSpaceGuid.PcdDebugPrintErrorLevel")
            .unwrap();
        assert_eq!(level.override_value.as_deref(), Some("0x80000000"));
        assert_eq!(level.override_at, Some(SourcePos::new("p.dsc", 9)));
        assert_eq!(outcome.document.records(RecordKind::Components).len(), 1);
        assert_eq!(outcome.document.records(RecordKind::LibraryClasses).len(), 3);
    }

    #[test]
    fn supported_architectures_restrict_sections() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[(
                "p.dsc",
                "[Defines]\n\
                 SUPPORTED_ARCHITECTURES = IA32|X64\n\
                 [Components.AARCH64]\n\
                 Arm/Module.inf\n\
                 [Components.X64]\n\
                 X64/Module.inf\n",
            )],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        parse_file(&mut ctx, &file, Dsc::default(), Vec::new());

        assert_eq!(ctx.supported_architectures, ["IA32", "X64"]);
        assert_eq!(ctx.xref.module_queue.len(), 1);
        assert_eq!(ctx.xref.module_queue[0].path, "X64/Module.inf");
    }

    #[test]
    fn pcd_sections() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[(
                "p.dsc",
                "[PcdsDynamicVpd]\n\
                 gPkg.PcdVpdA|0x10|0x4|5\n\
                 gPkg.PcdVpdB|0x20|7\n\
                 [PcdsDynamicHii]\n\
                 gPkg.PcdHii|L\"Setup\"|gSetupGuid|0x0|1\n\
                 [PcdsFeatureFlag]\n\
                 gPkg.PcdFlag|TRUE|BOOLEAN\n",
            )],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        let outcome = parse_file(&mut ctx, &file, Dsc::default(), Vec::new());

        let pcds = outcome.document.records(RecordKind::Pcds);
        assert_eq!(pcds.len(), 3);
        assert_eq!(pcds[0].get("maximumdatumsize"), "0x4");
        assert_eq!(pcds[0].get("value"), "5");
        assert_eq!(pcds[1].get("vpdoffset"), "0x20");
        assert_eq!(pcds[1].get("value"), "7");
        assert_eq!(pcds[2].get("variablename"), "L\"Setup\"");
        assert_eq!(ctx.xref.pcds.get("gPkg.PcdVpdA").unwrap().override_value.as_deref(), Some("0x10|0x4|5"));
        // a feature flag takes a single value
        assert_eq!(ctx.diagnostics.count(DiagnosticKind::Structural), 1);
    }

    #[test]
    fn error_directive_only_when_active() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[(
                "p.dsc",
                "[Defines]\n\
                 !if FALSE\n\
                 !error never\n\
                 !else\n\
                 !error Unsupported $(TARGET)\n\
                 !endif\n",
            )],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        parse_file(&mut ctx, &file, Dsc::default(), Vec::new());

        assert_eq!(ctx.diagnostics.len(), 1);
        let diagnostic = ctx.diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.kind, DiagnosticKind::Directive);
        assert_eq!(diagnostic.message, "error(Unsupported $(TARGET))");
    }

    #[test]
    fn include_cache_follows_macro_version() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[
                (
                    "p.dsc",
                    "[Components]\n\
                     !include common.dsc\n\
                     !include common.dsc\n\
                     DEFINE PKG = Other\n\
                     !include common.dsc\n",
                ),
                ("common.dsc", "$(PKG)/Module.inf\n"),
            ],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        parse_file(&mut ctx, &file, Dsc::default(), Vec::new());

        // the second include is served from the cache
        assert_eq!(ctx.stats.files_parsed, 3);
        assert_eq!(ctx.xref.module_queue.len(), 2);
        assert_eq!(ctx.xref.module_queue[0].path, "__PKG__UNDEFINED__/Module.inf");
        assert_eq!(ctx.xref.module_queue[1].path, "Other/Module.inf");
        assert_eq!(ctx.xref.files["common.dsc"].len(), 3);
        assert!(ctx.dscs.fresh("common.dsc", ctx.macros.version()).is_some());
    }

    #[test]
    fn include_cycle_is_reported() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[("a.dsc", "!include b.dsc\n"), ("b.dsc", "!include a.dsc\n")],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "a.dsc");
        parse_file(&mut ctx, &file, Dsc::default(), Vec::new());

        assert_eq!(ctx.diagnostics.count(DiagnosticKind::Reference), 1);
        let diagnostic = ctx.diagnostics.iter().next().unwrap();
        assert!(diagnostic.message.contains("a.dsc -> b.dsc -> a.dsc"), "{}", diagnostic.message);
    }

    #[test]
    fn included_file_continues_in_sections() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[
                ("p.dsc", "[Defines]\n!include libs.dsc\nMdePkg/Library/Tail.inf\n"),
                ("libs.dsc", "[Components]\nMdePkg/Library/Head.inf\n"),
            ],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        let outcome = parse_file(&mut ctx, &file, Dsc::default(), Vec::new());

        assert!(ctx.diagnostics.is_empty(), "{:?}", ctx.diagnostics);
        assert_eq!(ctx.xref.module_queue.len(), 2);
        assert_eq!(outcome.trailing_sections[0].name(), "components");
    }

    #[test]
    fn structural_problems() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[(
                "p.dsc",
                "PLATFORM_NAME = x\n\
                 [Bogus]\n\
                 [Components]\n\
                 A/A.inf {\n\
                 [Defines]\n\
                 !endif\n\
                 !frobnicate\n",
            )],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dsc");
        parse_file(&mut ctx, &file, Dsc::default(), Vec::new());

        let kinds: Vec<DiagnosticKind> = ctx.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            [
                DiagnosticKind::Structural,
                DiagnosticKind::Structural,
                DiagnosticKind::Nesting,
                DiagnosticKind::Conditional,
                DiagnosticKind::Structural,
            ]
        );
    }
}
