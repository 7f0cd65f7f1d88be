use super::patterns::*;
use super::{define_from_fields, pcd_name};
use crate::context::BuildContext;
use crate::include::IncludeCache;
use crate::parser::{Dialect, Document, Env, Features, Matched};
use crate::schema::{Candidate, FieldNames, RecordKind, Schema};
use std::sync::LazyLock;

const PCD_NAMES: &[&str] = &["pcdtokenspaceguidname", "pcdname", "value", "datumtype", "token"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecHook {
    Define,
    Guid,
    Ppi,
    Protocol,
    LibraryClass,
    Pcd,
    Package,
}

fn pcd_section() -> Vec<Candidate<DecHook>> {
    vec![Candidate::new(
        PCDS,
        "RR R O O X X",
        Some(RecordKind::Pcds),
        FieldNames::Static(PCD_NAMES),
        Some(DecHook::Pcd),
    )]
}

fn guid_section(kind: RecordKind, pattern: &str, hook: DecHook) -> Vec<Candidate<DecHook>> {
    vec![Candidate::new(
        pattern,
        "R R",
        Some(kind),
        FieldNames::Static(&["name", "value"]),
        Some(hook),
    )]
}

fn single(kind: RecordKind, name: &'static [&'static str], hook: Option<DecHook>) -> Vec<Candidate<DecHook>> {
    vec![Candidate::new(TO_EOL, "R", Some(kind), FieldNames::Static(name), hook)]
}

static SCHEMA: LazyLock<Schema<DecHook>> = LazyLock::new(|| {
    Schema::new()
        .section(
            "defines",
            vec![Candidate::new(
                FIRM_EQUATE,
                "RO",
                Some(RecordKind::Defines),
                FieldNames::Static(&["macro", "value"]),
                Some(DecHook::Define),
            )],
        )
        .section("guids", guid_section(RecordKind::Guids, SOFT_EQUATE, DecHook::Guid))
        .section("includes", single(RecordKind::Includes, &["include"], None))
        .section(
            "libraryclasses",
            vec![Candidate::new(
                ONE_BAR,
                "R R",
                Some(RecordKind::LibraryClasses),
                FieldNames::Static(&["name", "path"]),
                Some(DecHook::LibraryClass),
            )],
        )
        .section("pcdsdynamic", pcd_section())
        .section("pcdsdynamicex", pcd_section())
        .section("pcdsfeatureflag", pcd_section())
        .section("pcdsfixedatbuild", pcd_section())
        .section("pcdspatchableinmodule", pcd_section())
        .section("ppis", guid_section(RecordKind::Ppis, SOFT_EQUATE, DecHook::Ppi))
        .section("protocols", guid_section(RecordKind::Protocols, PROTOCOLS_EQU, DecHook::Protocol))
        .section("userextensions", single(RecordKind::UserExtensions, &["ext"], None))
        .nested_section("packages", single(RecordKind::Packages, &["path"], Some(DecHook::Package)))
        .nested_section("headerfiles", single(RecordKind::HeaderFiles, &["path"], None))
});

/// Package declaration file
#[derive(Debug, Default)]
pub struct Dec {}

impl Dialect for Dec {
    type Hook = DecHook;

    const NAME: &'static str = "DEC";
    const FEATURES: Features = Features {
        includes: false,
        conditionals: false,
        error_directive: false,
    };

    fn schema() -> &'static Schema<DecHook> {
        &SCHEMA
    }

    fn cache(ctx: &mut BuildContext) -> &mut IncludeCache<Document<Self>> {
        &mut ctx.decs
    }

    fn on_match(&mut self, hook: DecHook, matched: &Matched, env: &mut Env) {
        let xref = &mut env.ctx.xref;
        match hook {
            DecHook::Define => {
                define_from_fields(matched, env);
            }
            DecHook::Guid => xref.guids.define(matched.group(1), matched.group(3), env.pos),
            DecHook::Ppi => xref.ppis.define(matched.group(1), matched.group(3), env.pos),
            DecHook::Protocol => xref.protocols.define(matched.group(1), matched.group(3), env.pos),
            DecHook::LibraryClass => xref.library_classes.define(matched.group(1), matched.group(3), env.pos),
            DecHook::Package => xref.queue_package(matched.group(1), env.pos),
            DecHook::Pcd => {
                // a declaration carries value, datum type and token
                if matched.groups.get(8).is_some() {
                    let name = pcd_name(matched.group(1), matched.group(2));
                    let value = [4, 6, 8].map(|index| matched.group(index)).join("|");
                    xref.pcds.define(&name, &value, env.pos);
                }
                if matched.groups.get(13).is_some() {
                    env.enter_subelement(matched.section);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticKind, SourcePos};
    use crate::dialect::testing::{context, locate, write_tree};
    use crate::parser::parse_file;
    use tempfile::tempdir;

    const PACKAGE: &str = "\
[Defines]
  DEC_SPECIFICATION = 0x00010005
  PACKAGE_NAME = MdePkg

[Includes]
  Include

[LibraryClasses]
  DebugLib|Include/Library/DebugLib.h

[Guids]
  gEfiGlobalVariableGuid = { 0x8BE4DF61, 0x93CA, 0x11D2, { 0xAA, 0x0D, 0x00, 0xE0, 0x98, 0x03, 0x2B, 0x8C }}

[Ppis]
  gEfiPeiMemoryDiscoveredPpiGuid = {0xf894643d, 0xc449, 0x42d1, {0x8e, 0xa8, 0x85, 0xbd, 0xd8, 0xc6, 0x5b, 0xde}}

[Protocols.common]
  gEfiPciIoProtocolGuid = { 0x4CF5B200, 0x68B8, 0x4CA5, { 0x9E, 0xEC, 0xB2, 0x3E, 0x3F, 0x50, 0x02, 0x9A }}

[PcdsFixedAtBuild, PcdsPatchableInModule]
  gEfiMdePkgTokenSpaceGuid.PcdDebugPropertyMask|0x0|UINT8|0x00000005
  gEfiMdePkgTokenSpaceGuid.PcdStruct|{0x0}|TEST_STRUCT|0x00000006 {
    <HeaderFiles>
      Include/Test.h
    <Packages>
      MdeModulePkg/MdeModulePkg.dec
  }
";

    #[test]
    fn declarations_fill_tables() {
        let dir = tempdir().unwrap();
        write_tree(dir.path(), &[("MdePkg/MdePkg.dec", PACKAGE)]);
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "MdePkg/MdePkg.dec");
        let outcome = parse_file(&mut ctx, &file, Dec::default(), Vec::new());

        assert!(ctx.diagnostics.is_empty(), "{:?}", ctx.diagnostics);
        assert_eq!(ctx.macros.get("PACKAGE_NAME").unwrap().expansion, "MdePkg");

        let guid = ctx.xref.guids.get("gEfiGlobalVariableGuid").unwrap();
        assert_eq!(guid.defined_at, Some(SourcePos::new("MdePkg/MdePkg.dec", 12)));
        assert!(guid.value.as_deref().unwrap().starts_with("{ 0x8BE4DF61"));
        assert!(ctx.xref.ppis.get("gEfiPeiMemoryDiscoveredPpiGuid").is_some());
        assert!(ctx.xref.protocols.get("gEfiPciIoProtocolGuid").is_some());
        assert!(ctx.xref.library_classes.get("DebugLib").is_some());

        // listed under two section types, so declared twice
        let mask = ctx.xref.pcds.get("gEfiMdePkgTokenSpaceGuid.PcdDebugPropertyMask").unwrap();
        assert_eq!(mask.value.as_deref(), Some("0x0|UINT8|0x00000005"));
        assert_eq!(outcome.document.records(RecordKind::Pcds).len(), 4);

        // the block after a line shared by two sections is opened once
        assert_eq!(outcome.document.records(RecordKind::HeaderFiles).len(), 1);
        assert_eq!(ctx.xref.package_queue.len(), 1);
        assert_eq!(ctx.xref.package_queue[0].path, "MdeModulePkg/MdeModulePkg.dec");
        assert_eq!(outcome.document.records(RecordKind::Includes)[0].get("include"), "Include");
    }

    #[test]
    fn nested_sections_need_braces() {
        let dir = tempdir().unwrap();
        write_tree(dir.path(), &[("p.dec", "[Packages]\nMdePkg/MdePkg.dec\n")]);
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dec");
        let outcome = parse_file(&mut ctx, &file, Dec::default(), Vec::new());

        assert_eq!(ctx.diagnostics.count(DiagnosticKind::Structural), 1);
        assert!(outcome.document.records(RecordKind::Packages).is_empty());
        assert!(ctx.xref.package_queue.is_empty());
    }

    #[test]
    fn directives_are_not_recognized() {
        let dir = tempdir().unwrap();
        write_tree(dir.path(), &[("p.dec", "[Includes]\n!include other.dec\n")]);
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "p.dec");
        let outcome = parse_file(&mut ctx, &file, Dec::default(), Vec::new());

        assert!(ctx.diagnostics.is_empty());
        assert_eq!(outcome.document.records(RecordKind::Includes)[0].get("include"), "!include other.dec");
    }
}
