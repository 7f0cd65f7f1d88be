//! The four file formats of an EDK II build: platform descriptions (DSC),
//! package declarations (DEC), module descriptions (INF) and flash layouts
//! (FDF). Each is a schema plus the side effects of its lines.

mod dec;
mod dsc;
mod fdf;
mod inf;
mod patterns;

pub use dec::{Dec, DecHook};
pub use dsc::{Dsc, DscHook};
pub use fdf::{Fdf, FdfHook, FvInf};
pub use inf::{Inf, InfHook};

use crate::parser::{Env, Matched};

/// Quotes left over from macro expansion are not part of a path
pub(crate) fn strip_quotes(text: &str) -> String {
    text.replace('"', "").trim().to_string()
}

/// Key of a PCD in the cross reference table
pub(crate) fn pcd_name(token_space: &str, name: &str) -> String {
    format!("{token_space}.{name}")
}

/// `[Defines]` equates of platform, package and flash-layout files are macros
pub(crate) fn define_from_fields(matched: &Matched, env: &mut Env) -> Option<String> {
    let name = matched.fields.get("macro")?;
    let value = matched.fields.get("value").map(String::as_str).unwrap_or("");
    env.ctx.macros.define(name, value, env.pos);
    Some(name.clone())
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::context::{BuildContext, ParseConfig};
    use crate::include::{ResolvedPath, resolve};
    use std::fs;
    use std::path::Path;

    /// Write `files` below `dir`, creating directories as needed
    pub(crate) fn write_tree(dir: &Path, files: &[(&str, &str)]) {
        for (name, content) in files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
    }

    pub(crate) fn context(dir: &Path) -> BuildContext {
        BuildContext::new(ParseConfig {
            base_dir: dir.to_path_buf(),
            ..ParseConfig::default()
        })
    }

    pub(crate) fn locate(ctx: &BuildContext, name: &str) -> ResolvedPath {
        resolve(ctx, name, None).unwrap()
    }
}
