use clap::{Arg, ArgAction, ArgMatches, Command};
use edkxref::{ParseConfig, platform};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

fn main() {
    env_logger::init();
    match core() {
        Ok(_) => {}
        Err(err) => {
            println!("{err}");
            std::process::exit(1);
        }
    }
}

// The steps are always performed in this order:
//  1) build the configuration from the arguments and the environment
//  2) parse the platform with its modules, packages and flash layout
//  3) report diagnostics and the summary
fn core() -> Result<(), String> {
    let arg_matches = get_args()?;

    let strict = arg_matches.get_flag("STRICT");
    let verbose = arg_matches.get_flag("VERBOSE");
    let debugprint = arg_matches.get_flag("DEBUGPRINT");

    cond_print(verbose, &format!("\nedkxref v{}\n\n", env!("CARGO_PKG_VERSION")));

    // 1) configuration
    let config = build_config(&arg_matches)?;
    cond_print(verbose, &format!("Workspace: {}\n", config.base_dir.display()));
    for path in &config.search_paths {
        cond_print(verbose, &format!("Search path: {}\n", path.display()));
    }
    let extra_infs = match arg_matches.get_many::<String>("INF") {
        Some(patterns) => expand_inf_globs(&config.base_dir, patterns)?,
        None => Vec::new(),
    };

    // 2) parse
    let dsc = arg_matches
        .get_one::<String>("DSC")
        .ok_or_else(|| "no platform description given".to_string())?;
    let fdf = arg_matches.get_one::<String>("FDF").map(String::as_str);
    let now = Instant::now();
    let result = platform::run(config, dsc, fdf, &extra_infs, None);
    let elapsed = now.elapsed();
    for msg in &result.context.messages {
        cond_print(verbose, &format!("{msg}\n"));
    }
    if debugprint {
        // formatting the whole context takes longer than parsing, so don't use cond_print
        println!("================\n{:#?}\n================\n", result.context);
    }

    // 3) report
    for diagnostic in result.context.diagnostics.iter() {
        println!("{diagnostic}");
    }
    cond_print(verbose, &format!("\nPlatform \"{dsc}\" parsed ({elapsed:?})\nSummary:\n"));
    cond_print(verbose, &format!("{}\n", result.summary));
    cond_print(
        verbose,
        &format!(
            "   guids: {}, ppis: {}, protocols: {}, pcds: {}, library classes: {}\n",
            result.context.xref.guids.len(),
            result.context.xref.ppis.len(),
            result.context.xref.protocols.len(),
            result.context.xref.pcds.len(),
            result.context.xref.library_classes.len()
        ),
    );

    if strict && result.summary.diagnostics > 0 {
        return Err(format!(
            "Strict mode: {} diagnostics were reported",
            result.summary.diagnostics
        ));
    }

    cond_print(verbose, "\nRun complete.\n\n");

    Ok(())
}

fn build_config(arg_matches: &ArgMatches) -> Result<ParseConfig, String> {
    let base_dir = match arg_matches.get_one::<String>("WORKSPACE") {
        Some(workspace) => PathBuf::from(workspace),
        None => match std::env::var_os("WORKSPACE") {
            Some(workspace) => PathBuf::from(workspace),
            None => std::env::current_dir().map_err(|err| format!("Error: {err}"))?,
        },
    };

    let mut search_paths: Vec<PathBuf> = arg_matches
        .get_many::<String>("SEARCHPATH")
        .into_iter()
        .flatten()
        .map(PathBuf::from)
        .collect();
    if let Some(packages_path) = std::env::var_os("PACKAGES_PATH") {
        search_paths.extend(split_packages_path(&packages_path));
    }

    let supported_architectures = arg_matches
        .get_many::<String>("ARCH")
        .into_iter()
        .flatten()
        .flat_map(|arch| arch.split([',', '|']))
        .map(|arch| arch.trim().to_ascii_uppercase())
        .filter(|arch| !arch.is_empty())
        .collect();

    let mut macro_seeds = vec![("WORKSPACE".to_string(), base_dir.to_string_lossy().replace('\\', "/"))];
    for define in arg_matches.get_many::<String>("DEFINE").into_iter().flatten() {
        macro_seeds.push(parse_define(define)?);
    }

    Ok(ParseConfig {
        base_dir,
        search_paths,
        supported_architectures,
        macro_seeds,
    })
}

// PACKAGES_PATH uses the platform separator, but ';' is common in shared build scripts
fn split_packages_path(value: &OsString) -> Vec<PathBuf> {
    std::env::split_paths(value)
        .flat_map(|path| {
            path.to_string_lossy()
                .split(';')
                .filter(|part| !part.trim().is_empty())
                .map(|part| PathBuf::from(part.trim()))
                .collect::<Vec<_>>()
        })
        .collect()
}

// -D NAME=VALUE; a bare NAME is defined as TRUE
fn parse_define(text: &str) -> Result<(String, String), String> {
    let (name, value) = match text.split_once('=') {
        Some((name, value)) => (name.trim(), value.trim()),
        None => (text.trim(), "TRUE"),
    };
    if name.is_empty() {
        return Err(format!("Error: invalid macro definition \"{text}\""));
    }
    Ok((name.to_string(), value.to_string()))
}

fn expand_inf_globs<'a>(workspace: &Path, patterns: impl Iterator<Item = &'a String>) -> Result<Vec<String>, String> {
    let mut infs = Vec::new();
    for pattern in patterns {
        let full_pattern = workspace.join(pattern);
        let paths = glob::glob(&full_pattern.to_string_lossy())
            .map_err(|err| format!("Error: invalid pattern \"{pattern}\": {err}"))?;
        let mut found = false;
        for path in paths.flatten() {
            let relative = path.strip_prefix(workspace).unwrap_or(&path);
            infs.push(relative.to_string_lossy().replace('\\', "/"));
            found = true;
        }
        if !found {
            return Err(format!("Error: no INF file matches \"{pattern}\""));
        }
    }
    Ok(infs)
}

// set up the entire command line handling.
// response files given as @file are expanded before clap sees the arguments
fn get_args() -> Result<ArgMatches, String> {
    let args = argfile::expand_args_from(std::env::args_os(), argfile::parse_response, argfile::PREFIX)
        .map_err(|err| format!("Error: could not read response file: {err}"))?;

    Ok(Command::new("edkxref")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Parse an EDK II platform and build cross-reference tables of its macros, GUIDs, PCDs, protocols and library classes")
        .arg(Arg::new("DSC")
            .help("Platform description (DSC) file, relative to the workspace or a search path")
            .required(true)
            .index(1)
        )
        .arg(Arg::new("FDF")
            .help("Flash layout (FDF) file of the platform")
            .long("fdf")
            .num_args(1)
            .value_name("FDF")
        )
        .arg(Arg::new("SEARCHPATH")
            .help("Additional directory to search for included, module and package files.\nDirectories from the environment variable PACKAGES_PATH are searched after these.")
            .short('I')
            .long("search-path")
            .num_args(1)
            .value_name("DIR")
            .action(ArgAction::Append)
        )
        .arg(Arg::new("ARCH")
            .help("Supported architecture, e.g. X64. Sections for other architectures are skipped.\nIf no architecture is given, all sections are processed.")
            .short('a')
            .long("arch")
            .num_args(1)
            .value_name("ARCH")
            .action(ArgAction::Append)
        )
        .arg(Arg::new("DEFINE")
            .help("Define a macro before the platform is parsed")
            .short('D')
            .long("define")
            .num_args(1)
            .value_name("NAME[=VALUE]")
            .action(ArgAction::Append)
        )
        .arg(Arg::new("WORKSPACE")
            .help("Workspace directory. Defaults to the environment variable WORKSPACE, then to the current directory.")
            .long("workspace")
            .num_args(1)
            .value_name("DIR")
        )
        .arg(Arg::new("INF")
            .help("Parse additional module (INF) files matching this glob pattern, relative to the workspace")
            .long("inf")
            .num_args(1)
            .value_name("GLOB")
            .action(ArgAction::Append)
        )
        .arg(Arg::new("STRICT")
            .help("Exit with an error if any diagnostic was reported")
            .short('s')
            .long("strict")
            .action(ArgAction::SetTrue)
        )
        .arg(Arg::new("VERBOSE")
            .help("Display additional information")
            .short('v')
            .long("verbose")
            .action(ArgAction::SetTrue)
        )
        .arg(Arg::new("DEBUGPRINT")
            .help("Display internal data for debugging")
            .long("debug-print")
            .action(ArgAction::SetTrue)
        )
        .get_matches_from(args))
}

fn cond_print(cond: bool, text: &str) {
    if cond {
        print!("{}", text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines() {
        assert_eq!(parse_define("TARGET=DEBUG").unwrap(), ("TARGET".to_string(), "DEBUG".to_string()));
        assert_eq!(parse_define("SECURE_BOOT").unwrap(), ("SECURE_BOOT".to_string(), "TRUE".to_string()));
        assert!(parse_define("=1").is_err());
    }

    #[test]
    fn packages_path() {
        let paths = split_packages_path(&OsString::from("edk2;edk2-platforms"));
        assert_eq!(paths, [PathBuf::from("edk2"), PathBuf::from("edk2-platforms")]);
    }

    #[test]
    fn inf_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Pkg/A")).unwrap();
        std::fs::write(dir.path().join("Pkg/A/A.inf"), "").unwrap();
        std::fs::write(dir.path().join("Pkg/A/B.inf"), "").unwrap();
        let patterns = vec!["Pkg/*/*.inf".to_string()];
        let infs = expand_inf_globs(dir.path(), patterns.iter()).unwrap();
        assert_eq!(infs, ["Pkg/A/A.inf", "Pkg/A/B.inf"]);

        let patterns = vec!["Other/*.inf".to_string()];
        assert!(expand_inf_globs(dir.path(), patterns.iter()).is_err());
    }
}
