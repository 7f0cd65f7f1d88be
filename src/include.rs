use crate::FnvIndexMap;
use crate::context::BuildContext;
use crate::diagnostics::{DiagnosticKind, SourcePos};
use crate::macros::{fix_undefined, has_undefined};
use crate::section::SectionPath;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IncludeError {
    #[error("Unable to locate file {0}")]
    NotFound(String),
    #[error("Unable to locate file due to undefined macro: {0}")]
    UndefinedMacro(String),
    #[error("Include cycle detected: {0}")]
    Cycle(String),
}

/// A file located by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// path relative to the base directory with forward slashes; used as the
    /// key of every table that refers to files
    pub key: String,
    pub full_path: PathBuf,
}

/// Turn a path into the forward-slash form used as file key
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn relative_key(base_dir: &Path, full: &Path) -> String {
    match full.strip_prefix(base_dir) {
        Ok(relative) => path_key(relative),
        Err(_) => path_key(full),
    }
}

/// Locate a file named in an include, component, package or INF statement.
///
/// The path is tried relative to the base directory, then below each search
/// path, and finally next to the file that references it.
pub fn resolve(ctx: &BuildContext, partial: &str, referenced_from: Option<&Path>) -> Result<ResolvedPath, IncludeError> {
    if has_undefined(partial) {
        return Err(IncludeError::UndefinedMacro(fix_undefined(partial)));
    }
    let partial = partial.replace('"', "");
    let partial = partial.trim().replace('\\', "/");
    let base_dir = &ctx.config.base_dir;

    let relative_to_file = referenced_from
        .and_then(Path::parent)
        .map(|dir| base_dir.join(dir).join(&partial));
    let candidates = std::iter::once(base_dir.join(&partial))
        .chain(ctx.config.search_paths.iter().map(|dir| base_dir.join(dir).join(&partial)))
        .chain(relative_to_file);

    for candidate in candidates {
        if candidate.is_file() {
            let key = relative_key(base_dir, &candidate);
            return Ok(ResolvedPath {
                full_path: base_dir.join(&key),
                key,
            });
        }
    }
    Err(IncludeError::NotFound(partial))
}

/// Resolve a path and report a `Reference` diagnostic if that fails
pub(crate) fn resolve_or_report(ctx: &mut BuildContext, partial: &str, pos: &SourcePos) -> Option<ResolvedPath> {
    match resolve(ctx, partial, Some(pos.file())) {
        Ok(resolved) => Some(resolved),
        Err(err) => {
            ctx.diagnostics.report(DiagnosticKind::Reference, pos, err.to_string());
            None
        }
    }
}

/// A parsed file together with the macro version it was parsed under
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub macro_version: u64,
    pub document: T,
    /// sections that were open at the end of the file; an including file
    /// continues in these sections
    pub trailing_sections: Vec<SectionPath>,
}

/// Parsed files of one dialect, keyed by file key
#[derive(Debug)]
pub struct IncludeCache<T> {
    entries: FnvIndexMap<String, CacheEntry<T>>,
}

impl<T> Default for IncludeCache<T> {
    fn default() -> Self {
        Self {
            entries: FnvIndexMap::default(),
        }
    }
}

impl<T> IncludeCache<T> {
    /// The cached entry for `key`, if it was parsed under `macro_version`
    pub fn fresh(&self, key: &str, macro_version: u64) -> Option<&CacheEntry<T>> {
        self.entries
            .get(key)
            .filter(|entry| entry.macro_version == macro_version)
    }

    pub fn insert(&mut self, key: String, entry: CacheEntry<T>) {
        self.entries.insert(key, entry);
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CacheEntry<T>)> {
        self.entries.iter()
    }
}

/// Reject a file that is already being parsed further up the include chain
pub(crate) fn check_cycle(ctx: &BuildContext, key: &str) -> Result<(), IncludeError> {
    match ctx.include_stack.iter().position(|open| open == key) {
        Some(start) => {
            let mut chain: Vec<&str> = ctx.include_stack[start..].iter().map(String::as_str).collect();
            chain.push(key);
            Err(IncludeError::Cycle(chain.join(" -> ")))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ParseConfig;
    use std::fs;

    fn context(base: &Path, search_paths: &[&str]) -> BuildContext {
        BuildContext::new(ParseConfig {
            base_dir: base.to_path_buf(),
            search_paths: search_paths.iter().map(PathBuf::from).collect(),
            ..ParseConfig::default()
        })
    }

    #[test]
    fn search_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("edk2/MdePkg")).unwrap();
        fs::create_dir_all(dir.path().join("Platform/Board")).unwrap();
        fs::write(dir.path().join("edk2/MdePkg/MdePkg.dec"), "").unwrap();
        fs::write(dir.path().join("Platform/Board/Local.dsc"), "").unwrap();
        fs::write(dir.path().join("Top.dsc"), "").unwrap();

        let ctx = context(dir.path(), &["edk2"]);
        let found = resolve(&ctx, "Top.dsc", None).unwrap();
        assert_eq!(found.key, "Top.dsc");
        assert_eq!(found.full_path, dir.path().join("Top.dsc"));

        let found = resolve(&ctx, "MdePkg/MdePkg.dec", None).unwrap();
        assert_eq!(found.key, "edk2/MdePkg/MdePkg.dec");

        let found = resolve(&ctx, "\"Local.dsc\"", Some(Path::new("Platform/Board/Board.dsc"))).unwrap();
        assert_eq!(found.key, "Platform/Board/Local.dsc");

        assert_eq!(
            resolve(&ctx, "missing.dsc", None),
            Err(IncludeError::NotFound("missing.dsc".to_string()))
        );
    }

    #[test]
    fn undefined_macro_in_path() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), &[]);
        let err = resolve(&ctx, "__PKG__UNDEFINED__/x.dsc", None).unwrap_err();
        assert_eq!(err.to_string(), "Unable to locate file due to undefined macro: $(PKG)/x.dsc");
    }

    #[test]
    fn cache_freshness() {
        let mut cache: IncludeCache<u32> = IncludeCache::default();
        cache.insert(
            "a.dsc".to_string(),
            CacheEntry {
                macro_version: 3,
                document: 7,
                trailing_sections: Vec::new(),
            },
        );
        assert!(cache.fresh("a.dsc", 3).is_some());
        assert!(cache.fresh("a.dsc", 4).is_none());
        assert!(cache.contains("a.dsc"));
        assert!(cache.fresh("b.dsc", 3).is_none());
    }

    #[test]
    fn cycle_detection() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), &[]);
        ctx.include_stack = vec!["a.dsc".to_string(), "b.dsc".to_string()];
        assert!(check_cycle(&ctx, "c.dsc").is_ok());
        assert_eq!(
            check_cycle(&ctx, "a.dsc"),
            Err(IncludeError::Cycle("a.dsc -> b.dsc -> a.dsc".to_string()))
        );
    }
}
