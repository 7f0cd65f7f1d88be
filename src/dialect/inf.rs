use super::patterns::*;
use super::pcd_name;
use crate::context::BuildContext;
use crate::include::{IncludeCache, path_key};
use crate::parser::{Dialect, Document, Env, Features, Matched};
use crate::schema::{Candidate, FieldNames, RecordKind, Schema};
use std::path::Path;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfHook {
    Guid,
    Ppi,
    Protocol,
    Pcd,
    LibraryClass,
    Package,
    Source,
}

fn pcd_section() -> Vec<Candidate<InfHook>> {
    vec![Candidate::new(
        PCD_USE,
        "RR O O",
        Some(RecordKind::Pcds),
        FieldNames::Static(&["pcdtokenspaceguidname", "pcdname", "value", "featureflagexpression"]),
        Some(InfHook::Pcd),
    )]
}

/// `name [| feature flag expression]`
fn guid_section(kind: RecordKind, hook: InfHook) -> Vec<Candidate<InfHook>> {
    vec![Candidate::new(
        ONE_BAR,
        "R O",
        Some(kind),
        FieldNames::Static(&["name", "featureflagexpression"]),
        Some(hook),
    )]
}

fn single(kind: RecordKind, name: &'static [&'static str], hook: Option<InfHook>) -> Vec<Candidate<InfHook>> {
    vec![Candidate::new(TO_EOL, "R", Some(kind), FieldNames::Static(name), hook)]
}

static SCHEMA: LazyLock<Schema<InfHook>> = LazyLock::new(|| {
    Schema::new()
        .section(
            "binaries",
            vec![Candidate::new(
                ONE_TO_FIVE_BARS,
                "RR O O O O",
                Some(RecordKind::Binaries),
                FieldNames::Static(&["kind", "path", "tag1", "tag2", "tag3", "tag4"]),
                None,
            )],
        )
        .section(
            "buildoptions",
            vec![Candidate::new(
                BUILD_OPTIONS,
                " ORO",
                Some(RecordKind::BuildOptions),
                FieldNames::Static(&["tag", "option", "value"]),
                None,
            )],
        )
        .section(
            "defines",
            vec![Candidate::new(
                FIRM_EQUATE,
                "RO",
                Some(RecordKind::Defines),
                FieldNames::Static(&["macro", "value"]),
                None,
            )],
        )
        .section("depex", single(RecordKind::Depex, &["depex"], None))
        .section("featurepcd", pcd_section())
        .section("fixedpcd", pcd_section())
        .section("guids", guid_section(RecordKind::Guids, InfHook::Guid))
        .section("includes", single(RecordKind::Includes, &["include"], None))
        .section(
            "libraryclasses",
            vec![Candidate::new(
                ONE_BAR,
                "R O",
                Some(RecordKind::LibraryClasses),
                FieldNames::Static(&["name", "path"]),
                Some(InfHook::LibraryClass),
            )],
        )
        .section("packages", single(RecordKind::Packages, &["path"], Some(InfHook::Package)))
        .section("patchpcd", pcd_section())
        .section("pcd", pcd_section())
        .section("pcdex", pcd_section())
        .section("ppis", guid_section(RecordKind::Ppis, InfHook::Ppi))
        .section(
            "protocols",
            vec![Candidate::new(
                PROTOCOLS_BAR,
                "R  O OO",
                Some(RecordKind::Protocols),
                FieldNames::Static(&["protocol", "not", "pcdtokenspaceguidname", "pcdname"]),
                Some(InfHook::Protocol),
            )],
        )
        .section(
            "sources",
            vec![Candidate::new(
                ONE_TO_EIGHT_ITEMS,
                "ROOOOOOO",
                Some(RecordKind::Sources),
                FieldNames::Static(&[
                    "source", "source2", "source3", "source4", "source5", "source6", "source7", "source8",
                ]),
                Some(InfHook::Source),
            )],
        )
        .section("userextensions", single(RecordKind::UserExtensions, &["ext"], None))
});

/// Module description file. Its `[Defines]` are recorded but do not
/// define macros: they describe the module, not the build.
#[derive(Debug, Default)]
pub struct Inf {}

impl Dialect for Inf {
    type Hook = InfHook;

    const NAME: &'static str = "INF";
    const FEATURES: Features = Features {
        includes: false,
        conditionals: false,
        error_directive: false,
    };

    fn schema() -> &'static Schema<InfHook> {
        &SCHEMA
    }

    fn cache(ctx: &mut BuildContext) -> &mut IncludeCache<Document<Self>> {
        &mut ctx.infs
    }

    fn on_match(&mut self, hook: InfHook, matched: &Matched, env: &mut Env) {
        let xref = &mut env.ctx.xref;
        let pos = env.pos;
        match hook {
            InfHook::Guid => xref.guids.reference(matched.group(1), pos),
            InfHook::Ppi => xref.ppis.reference(matched.group(1), pos),
            InfHook::Protocol => xref.protocols.reference(matched.group(1), pos),
            InfHook::LibraryClass => xref.library_classes.reference(matched.group(1), pos),
            InfHook::Pcd => xref.pcds.reference(&pcd_name(matched.group(1), matched.group(2)), pos),
            InfHook::Package => xref.queue_package(matched.group(1), pos),
            InfHook::Source => {
                let module_dir = pos.file().parent().unwrap_or(Path::new(""));
                // a bar starts the family/tag part of a single file entry
                let files: Vec<&str> = match matched.line.split_once('|') {
                    Some((file, _)) => vec![file.trim()],
                    None => matched.line.split_whitespace().collect(),
                };
                for file in files.into_iter().filter(|file| !file.is_empty()) {
                    let source = path_key(&module_dir.join(file.replace('\\', "/")));
                    xref.add_source(&source, pos);
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

    const MODULE: &str = "\
[Defines]
  INF_VERSION = 0x00010005
  BASE_NAME = DxeCore
  MODULE_TYPE = DXE_CORE

[Sources]
  DxeMain.h
  DxeMain/DxeMain.c | MSFT
  Image/Image.c Image/Image.h

[Sources.AARCH64]
  Arm/Arm.c

[Packages]
  MdePkg/MdePkg.dec

[LibraryClasses]
  BaseLib

[Guids]
  gEfiEventReadyToBootGuid  ## CONSUMES
  gEfiHobListGuid | gEfiMdePkgTokenSpaceGuid.PcdFeature

[Protocols]
  gEfiLoadedImageProtocolGuid
  gEfiDebugSupportProtocolGuid | NOT gEfiMdePkgTokenSpaceGuid.PcdNoDebug

[Pcd]
  gEfiMdePkgTokenSpaceGuid.PcdMaximumUnicodeStringLength|1000000
  gEfiMdePkgTokenSpaceGuid.PcdDebugPropertyMask

[Binaries]
  PE32|DxeCore.efi|*

[Depex]
  TRUE
";

    #[test]
    fn references_and_sources() {
        let dir = tempdir().unwrap();
        write_tree(dir.path(), &[("MdeModulePkg/Core/Dxe/DxeMain.inf", MODULE)]);
        let mut ctx = context(dir.path());
        ctx.supported_architectures = vec!["X64".to_string()];
        let file = locate(&ctx, "MdeModulePkg/Core/Dxe/DxeMain.inf");
        let outcome = parse_file(&mut ctx, &file, Inf::default(), Vec::new());

        assert!(ctx.diagnostics.is_empty(), "{:?}", ctx.diagnostics);
        // module defines are not macros
        assert!(ctx.macros.get("BASE_NAME").is_none());
        assert_eq!(outcome.document.records(RecordKind::Defines).len(), 3);

        let sources: Vec<&str> = ctx.xref.sources.keys().map(String::as_str).collect();
        assert_eq!(
            sources,
            [
                "MdeModulePkg/Core/Dxe/DxeMain.h",
                "MdeModulePkg/Core/Dxe/DxeMain/DxeMain.c",
                "MdeModulePkg/Core/Dxe/Image/Image.c",
                "MdeModulePkg/Core/Dxe/Image/Image.h",
            ]
        );

        assert_eq!(ctx.xref.package_queue.len(), 1);
        assert_eq!(ctx.xref.package_queue[0].path, "MdePkg/MdePkg.dec");

        let ready = ctx.xref.guids.get("gEfiEventReadyToBootGuid").unwrap();
        assert_eq!(ready.references, [SourcePos::new("MdeModulePkg/Core/Dxe/DxeMain.inf", 21)]);
        assert!(ctx.xref.guids.get("gEfiHobListGuid").is_some());
        assert_eq!(ctx.xref.guids.undefined().count(), 2);

        let debug = &outcome.document.records(RecordKind::Protocols)[1];
        assert_eq!(debug.get("not"), "NOT");
        assert_eq!(debug.get("pcdname"), "PcdNoDebug");
        assert!(ctx.xref.protocols.get("gEfiDebugSupportProtocolGuid").is_some());

        let length = ctx
            .xref
            .pcds
            .get("gEfiMdePkgTokenSpaceGuid.PcdMaximumUnicodeStringLength")
            .unwrap();
        assert_eq!(length.references.len(), 1);
        assert!(ctx.xref.library_classes.get("BaseLib").is_some());
        assert_eq!(outcome.document.records(RecordKind::Binaries)[0].get("tag1"), "*");
        assert_eq!(outcome.document.records(RecordKind::Depex).len(), 1);
    }

    #[test]
    fn malformed_lines() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[("m.inf", "[Pcd]\ngEfiMdePkgTokenSpaceGuid\n[Binaries]\nPE32\n")],
        );
        let mut ctx = context(dir.path());
        let file = locate(&ctx, "m.inf");
        parse_file(&mut ctx, &file, Inf::default(), Vec::new());

        assert_eq!(ctx.diagnostics.count(DiagnosticKind::Structural), 2);
        assert!(ctx.xref.pcds.is_empty());
    }
}
