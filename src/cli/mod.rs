// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! CLI definitions for the nwsc command line.
//!
//! The flag surface is single-letter and fixed by years of existing build
//! scripts, so everything is a short option (including `-h` for the home
//! directory, which is why the auto help flag is long-only). Response-file
//! expansion (`@file`) happens before clap ever sees the arguments; see
//! [`nwsc::compiler::expand_response_files`].

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use nwsc::compiler::DriverOptions;

#[derive(Parser, Debug)]
#[command(
    name = "nwsc",
    about = "NWScript compiler",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Compile the scripts (default; overridden by -d)
    #[arg(short = 'c', overrides_with = "disassemble")]
    pub compile: bool,

    /// Disassemble compiled scripts (overrides -c)
    #[arg(short = 'd', overrides_with = "compile")]
    pub disassemble: bool,

    /// Optimize the compiled script
    #[arg(short = 'o')]
    pub optimize: bool,

    /// Suppress generation of the .ndb debug symbols file
    #[arg(short = 'g')]
    pub no_debug: bool,

    /// Enable non-canonical language extensions
    #[arg(short = 'e')]
    pub extensions: bool,

    /// Analyze generated code and verify that it is consistent
    #[arg(short = 'a')]
    pub analyze: bool,

    /// Silence most messages
    #[arg(short = 'q')]
    pub quiet: bool,

    /// Assume 16-byte-resref modules and KEY/BIF resources
    #[arg(short = '1')]
    pub erf16: bool,

    /// Load base game resources even without a module (slow)
    #[arg(short = 'l')]
    pub load_base: bool,

    /// Continue processing input files even on error
    #[arg(short = 'y')]
    pub continue_on_error: bool,

    /// Compiler version to target, e.g. -v1.69
    #[arg(short = 'v', value_name = "VERSION")]
    pub version: Option<String>,

    /// Semicolon-separated include search paths (repeatable)
    #[arg(short = 'i', value_name = "PATHS")]
    pub include_paths: Vec<String>,

    /// Per-user home directory holding modules, HAKs and overrides
    #[arg(short = 'h', value_name = "DIR")]
    pub home_dir: Option<PathBuf>,

    /// Game installation directory
    #[arg(short = 'n', value_name = "DIR")]
    pub install_dir: Option<PathBuf>,

    /// Resource name of the module to load (loading a module is slow)
    #[arg(short = 'm', value_name = "RESREF")]
    pub module_name: Option<String>,

    /// Full path to the module file or directory; overrides -m
    #[arg(short = 'r', value_name = "PATH")]
    pub module_path: Option<PathBuf>,

    /// Batch output directory; enables multiple input files
    #[arg(short = 'b', value_name = "DIR")]
    pub batch_output_dir: Option<PathBuf>,

    /// Prefix to use for compiler error diagnostics (default "Error")
    #[arg(short = 'x', value_name = "PREFIX")]
    pub error_prefix: Option<String>,

    /// Show where include files are being sourced from
    #[arg(short = 'j')]
    pub show_includes: bool,

    /// Show preprocessed source text
    #[arg(short = 'k')]
    pub show_preprocessed: bool,

    /// Dump internal pcode for compiled script contributions
    #[arg(short = 'p')]
    pub dump_pcode: bool,

    /// Input file(s), plus an optional output file in single-input mode
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    #[arg(long = "help", action = clap::ArgAction::HelpLong)]
    help: Option<bool>,
}

impl Cli {
    /// Fold the parsed flags into driver options.
    pub fn into_driver_options(self) -> Result<DriverOptions> {
        if self.files.is_empty() {
            bail!("no input files");
        }

        // -vX.XX keeps only the digits, so 1.69 and 169 mean the same.
        let target_version = match &self.version {
            Some(text) => {
                let digits: String = text.chars().filter(char::is_ascii_digit).collect();
                if digits.is_empty() {
                    bail!("bad version specification '{}'", text);
                }
                digits.parse::<u32>()?
            }
            None => 999_999,
        };

        let include_paths: Vec<PathBuf> = self
            .include_paths
            .iter()
            .flat_map(|spec| spec.split(';'))
            .filter(|part| !part.is_empty())
            .map(PathBuf::from)
            .collect();

        // Without a batch directory there is one input, optionally followed
        // by an explicit output name.
        let (inputs, output_file) = if self.batch_output_dir.is_some() {
            (self.files, None)
        } else {
            match self.files.len() {
                1 => (self.files, None),
                2 => {
                    let mut files = self.files;
                    let output = files.pop();
                    (files, output)
                }
                _ => bail!("too many file arguments; use -b for batch mode"),
            }
        };

        Ok(DriverOptions {
            compile: !self.disassemble,
            optimize: self.optimize,
            no_debug_symbols: self.no_debug,
            enable_extensions: self.extensions,
            verify: self.analyze,
            quiet: self.quiet,
            erf16: self.erf16,
            load_base_resources: self.load_base,
            continue_on_error: self.continue_on_error,
            target_version,
            include_paths,
            home_dir: self.home_dir,
            install_dir: self.install_dir,
            module_name: self.module_name,
            module_path: self.module_path,
            batch_output_dir: self.batch_output_dir,
            error_prefix: self.error_prefix,
            show_includes: self.show_includes,
            show_preprocessed: self.show_preprocessed,
            dump_pcode: self.dump_pcode,
            inputs,
            output_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("nwsc").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_compile_with_symbols() {
        let options = parse(&["input.nss"]).into_driver_options().unwrap();
        assert!(options.compile);
        assert!(!options.no_debug_symbols);
        assert!(!options.continue_on_error);
        assert_eq!(options.target_version, 999_999);
        assert_eq!(options.inputs, ["input.nss"]);
        assert_eq!(options.output_file, None);
    }

    #[test]
    fn disassemble_overrides_compile() {
        let options = parse(&["-c", "-d", "x.ncs"]).into_driver_options().unwrap();
        assert!(!options.compile);
    }

    #[test]
    fn version_keeps_digits_only() {
        let options = parse(&["-v1.69", "x.nss"]).into_driver_options().unwrap();
        assert_eq!(options.target_version, 169);
        assert!(parse(&["-vXY", "x.nss"]).into_driver_options().is_err());
    }

    #[test]
    fn include_paths_split_on_semicolons() {
        let options = parse(&["-i", "a;b;c", "-i", "d", "x.nss"])
            .into_driver_options()
            .unwrap();
        assert_eq!(
            options.include_paths,
            [PathBuf::from("a"), "b".into(), "c".into(), "d".into()]
        );
    }

    #[test]
    fn second_positional_is_the_output_file() {
        let options = parse(&["in.nss", "out.ncs"]).into_driver_options().unwrap();
        assert_eq!(options.inputs, ["in.nss"]);
        assert_eq!(options.output_file.as_deref(), Some("out.ncs"));

        assert!(parse(&["a.nss", "b.nss", "c.nss"])
            .into_driver_options()
            .is_err());
    }

    #[test]
    fn batch_mode_takes_every_positional_as_input() {
        let options = parse(&["-b", "out", "a.nss", "b.nss", "c.nss"])
            .into_driver_options()
            .unwrap();
        assert_eq!(options.inputs.len(), 3);
        assert_eq!(options.batch_output_dir.as_deref(), Some(Path::new("out")));
    }

    #[test]
    fn short_h_is_the_home_directory_not_help() {
        let options = parse(&["-h", "/home/me/nwn2", "x.nss"])
            .into_driver_options()
            .unwrap();
        assert_eq!(options.home_dir.as_deref(), Some(Path::new("/home/me/nwn2")));
    }
}
