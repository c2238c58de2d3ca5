// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! The compiler driver: one session, many inputs.
//!
//! The driver owns the orchestration the front-end never sees: response
//! files, wildcard expansion, locating each input on disk or in the
//! resource system, threading include resolution back through the resource
//! manager, writing artefacts, and the optional verification pass over
//! what was just written.
//!
//! Inputs are processed in order. A failed input either stops the batch
//! (the default) or is counted and skipped (`continue_on_error`), so a
//! hundred-file batch with one syntax error still produces the other
//! ninety-nine artefacts when asked to.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use log::debug;

use crate::diag::{SharedTextOut, TextOut};
use crate::resource::{
    ModuleLoadParams, ModuleSearchOrder, ResType, ResourceManager, ScopedDemand,
    SharedResourceManager,
};
use crate::gff::GffReader;

use super::frontend::{
    CompileFlags, CompileRequest, CompileResult, IncludeResolver, ScriptCompiler,
};
use super::verify::{verify_artifacts, BytecodeAnalyzer};

/// Key files registered for the 16-byte-resref resource layout, later
/// names less precedent.
const ERF16_KEY_FILES: [&str; 6] = ["chitin", "xp1", "xp1patch", "xp2", "xp2patch", "xp3"];

// ============================================================================
// OPTIONS
// ============================================================================

/// Everything the command line configures.
pub struct DriverOptions {
    /// Compile (`true`) or disassemble (`false`).
    pub compile: bool,
    pub optimize: bool,
    /// Suppress the `.ndb` debug-symbol artefact.
    pub no_debug_symbols: bool,
    /// Allow non-canonical language extensions.
    pub enable_extensions: bool,
    /// Verify artefacts through the analyzer after each compile.
    pub verify: bool,
    pub quiet: bool,
    /// Use the 16-byte-resref archive generation (and KEY/BIF base data).
    pub erf16: bool,
    /// Load base game resources even without a module.
    pub load_base_resources: bool,
    /// Keep going after a failed input.
    pub continue_on_error: bool,
    /// Engine-compatible compiler version; `999999` is the newest dialect.
    pub target_version: u32,
    pub include_paths: Vec<PathBuf>,
    pub home_dir: Option<PathBuf>,
    pub install_dir: Option<PathBuf>,
    /// Module resource name to load resources from.
    pub module_name: Option<String>,
    /// Explicit module path; overrides the name-based search.
    pub module_path: Option<PathBuf>,
    /// Output directory for batch mode; enables multiple inputs.
    pub batch_output_dir: Option<PathBuf>,
    /// Replacement for the conventional `Error:` diagnostic prefix.
    pub error_prefix: Option<String>,
    pub show_includes: bool,
    pub show_preprocessed: bool,
    pub dump_pcode: bool,
    /// Input paths, possibly containing wildcards.
    pub inputs: Vec<String>,
    /// Explicit output name for single-input mode.
    pub output_file: Option<String>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            compile: true,
            optimize: false,
            no_debug_symbols: false,
            enable_extensions: false,
            verify: false,
            quiet: false,
            erf16: false,
            load_base_resources: false,
            continue_on_error: false,
            target_version: 999_999,
            include_paths: Vec::new(),
            home_dir: None,
            install_dir: None,
            module_name: None,
            module_path: None,
            batch_output_dir: None,
            error_prefix: None,
            show_includes: false,
            show_preprocessed: false,
            dump_pcode: false,
            inputs: Vec::new(),
            output_file: None,
        }
    }
}

/// Per-session tallies.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub compiled: usize,
    pub include_only: usize,
    pub errors: usize,
}

enum Outcome {
    Compiled,
    IncludeOnly,
    Failed,
}

// ============================================================================
// RESPONSE FILES
// ============================================================================

/// Replace a single `@file` argument with the file's lines, one argument
/// per line. Response files do not nest.
pub fn expand_response_files(args: Vec<String>) -> Result<Vec<String>> {
    let mut expanded = Vec::with_capacity(args.len());
    for arg in args {
        let Some(file) = arg.strip_prefix('@') else {
            expanded.push(arg);
            continue;
        };
        let contents = std::fs::read_to_string(file)
            .with_context(|| format!("couldn't read response file '{}'", file))?;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('@') {
                bail!("response files do not nest ('{}' inside '{}')", line, file);
            }
            expanded.push(line.to_string());
        }
    }
    Ok(expanded)
}

// ============================================================================
// INCLUDE RESOLUTION
// ============================================================================

/// Resolver handed to the front-end: explicit include paths first, then
/// the resource system.
pub struct ManagerIncludeResolver {
    manager: SharedResourceManager,
    include_paths: Vec<PathBuf>,
    trace: bool,
    text_out: SharedTextOut,
}

impl ManagerIncludeResolver {
    pub fn new(
        manager: SharedResourceManager,
        include_paths: Vec<PathBuf>,
        trace: bool,
        text_out: SharedTextOut,
    ) -> Self {
        Self {
            manager,
            include_paths,
            trace,
            text_out,
        }
    }
}

impl IncludeResolver for ManagerIncludeResolver {
    fn load_file(&mut self, name: &str, res_type: ResType) -> Option<Vec<u8>> {
        let name = name.to_ascii_lowercase();
        let ext = res_type.extension().unwrap_or("nss");

        for dir in &self.include_paths {
            let candidate = dir.join(format!("{}.{}", name, ext));
            if let Ok(bytes) = std::fs::read(&candidate) {
                if self.trace {
                    self.text_out.borrow_mut().write_text(&format!(
                        "  Resolved include '{}' from '{}'.\n",
                        name,
                        candidate.display()
                    ));
                }
                return Some(bytes);
            }
        }

        let bytes = self.manager.borrow_mut().load_resource(&name, res_type).ok()?;
        if self.trace {
            self.text_out.borrow_mut().write_text(&format!(
                "  Resolved include '{}' from the resource system.\n",
                name
            ));
        }
        Some(bytes)
    }
}

/// Sink wrapper that rewrites the conventional `Error:` prefix when the
/// session configured a replacement.
struct PrefixedSink {
    inner: SharedTextOut,
    prefix: Option<String>,
}

impl TextOut for PrefixedSink {
    fn write_text(&mut self, text: &str) {
        let Some(prefix) = &self.prefix else {
            self.inner.borrow_mut().write_text(text);
            return;
        };
        let mut rewritten = String::with_capacity(text.len());
        for line in text.split_inclusive('\n') {
            if let Some(rest) = line.strip_prefix("Error:") {
                rewritten.push_str(prefix);
                rewritten.push(':');
                rewritten.push_str(rest);
            } else {
                rewritten.push_str(line);
            }
        }
        self.inner.borrow_mut().write_text(&rewritten);
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// One driver run: a configured resource manager plus the input loop.
pub struct DriverSession {
    options: DriverOptions,
    text_out: SharedTextOut,
    manager: SharedResourceManager,
}

impl DriverSession {
    /// Create the session and, when configured, load module or base-game
    /// resources.
    pub fn new(options: DriverOptions, text_out: SharedTextOut) -> Result<Self> {
        let manager = ResourceManager::new(text_out.clone())
            .context("failed to initialize resource manager")?;
        let mut session = Self {
            options,
            text_out,
            manager: Rc::new(RefCell::new(manager)),
        };

        let wants_module = session.options.module_name.is_some()
            || session.options.module_path.is_some();
        if wants_module || session.options.load_base_resources {
            session.load_resources(wants_module)?;
        }
        Ok(session)
    }

    /// Session with a caller-supplied manager; used by embedders and the
    /// test suites to control the provider set directly.
    pub fn with_manager(
        options: DriverOptions,
        text_out: SharedTextOut,
        manager: SharedResourceManager,
    ) -> Self {
        Self {
            options,
            text_out,
            manager,
        }
    }

    pub fn manager(&self) -> SharedResourceManager {
        self.manager.clone()
    }

    fn write_text(&self, text: &str) {
        self.text_out.borrow_mut().write_text(text);
    }

    /// Two-phase module load: a core-only pass to read the module's own
    /// manifest (HAK list, custom talk table), then the full load.
    fn load_resources(&mut self, wants_module: bool) -> Result<()> {
        let home = self.options.home_dir.clone().unwrap_or_default();
        let install = self.options.install_dir.clone().unwrap_or_default();
        let module_name = self.options.module_name.clone().unwrap_or_default();

        if !self.options.quiet {
            if wants_module {
                self.write_text(&format!(
                    "Loading resources for module '{}'...\n",
                    if module_name.is_empty() {
                        "<custom path>"
                    } else {
                        module_name.as_str()
                    }
                ));
            } else {
                self.write_text("Loading base game resources...\n");
            }
        }

        let mut haks = Vec::new();
        let mut custom_tlk: Option<String> = None;

        if wants_module {
            self.manager
                .borrow_mut()
                .load_module_resources_lite(
                    &module_name,
                    &home,
                    &install,
                    ModuleLoadParams {
                        search_order: ModuleSearchOrder::PreferDirectory,
                        require_module_ifo: true,
                        erf16: self.options.erf16,
                        custom_module_path: self.options.module_path.clone(),
                        ..Default::default()
                    },
                )
                .context("module core load failed")?;

            // The manifest guard must drop before the full load tears the
            // demand table down.
            {
                let ifo = ScopedDemand::new(self.manager.clone(), "module", ResType::IFO)
                    .context("module.ifo is not present in the module")?;
                let manifest = GffReader::from_file(ifo.path())
                    .context("module.ifo is not a valid container")?;
                let root = manifest.root();

                if let Some(tlk) = root.get_string("Mod_CustomTlk") {
                    let trimmed = match tlk.rfind('.') {
                        Some(dot) => tlk[..dot].to_string(),
                        None => tlk,
                    };
                    if !trimmed.is_empty() {
                        custom_tlk = Some(trimmed);
                    }
                }

                let hak_count = root.list_count("Mod_HakList").unwrap_or(0);
                for i in 0..hak_count {
                    let Some(entry) = root.get_list_element("Mod_HakList", i) else {
                        break;
                    };
                    match entry.get_string("Mod_Hak") {
                        Some(hak) if !hak.is_empty() => haks.push(hak),
                        _ => bail!("malformed Mod_HakList entry {}", i),
                    }
                }
                if haks.is_empty() {
                    // Pre-list modules name a single HAK in a flat field.
                    if let Some(hak) = root.get_string("Mod_Hak") {
                        if !hak.is_empty() {
                            haks.push(hak);
                        }
                    }
                }
            }
        }

        let key_files = if self.options.erf16 {
            ERF16_KEY_FILES.iter().map(|s| s.to_string()).collect()
        } else {
            Vec::new()
        };

        self.manager
            .borrow_mut()
            .load_module_resources(
                &module_name,
                custom_tlk.as_deref(),
                &home,
                &install,
                &haks,
                ModuleLoadParams {
                    search_order: ModuleSearchOrder::PreferDirectory,
                    require_module_ifo: wants_module,
                    erf16: self.options.erf16,
                    base_resources_only: !wants_module,
                    key_files,
                    custom_module_path: self.options.module_path.clone(),
                    ..Default::default()
                },
            )
            .context("module resource load failed")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // The input loop
    // ------------------------------------------------------------------

    /// Process every configured input through the front-end (and analyzer,
    /// when verification or disassembly asks for one).
    pub fn run(
        &mut self,
        compiler: &mut dyn ScriptCompiler,
        mut analyzer: Option<&mut (dyn BytecodeAnalyzer + '_)>,
    ) -> Result<SessionSummary> {
        if self.options.inputs.is_empty() {
            bail!("no input files");
        }
        if self.options.inputs.len() > 1 && self.options.batch_output_dir.is_none() {
            bail!("multiple inputs require a batch output directory");
        }

        let mut summary = SessionSummary::default();
        let inputs = self.options.inputs.clone();

        'inputs: for input in inputs {
            let expanded: Vec<PathBuf> = if input.contains(['*', '?']) {
                let matches: Vec<PathBuf> = glob::glob(&input)
                    .with_context(|| format!("bad wildcard '{}'", input))?
                    .flatten()
                    .collect();
                if matches.is_empty() {
                    self.write_text(&format!(
                        "Error: no files match wildcard '{}'.\n",
                        input
                    ));
                    summary.errors += 1;
                    if !self.options.continue_on_error {
                        break 'inputs;
                    }
                }
                matches
            } else {
                vec![PathBuf::from(&input)]
            };

            for path in expanded {
                let outcome = self.process_one(&path, compiler, analyzer.as_deref_mut());
                match outcome {
                    Ok(Outcome::Compiled) => summary.compiled += 1,
                    Ok(Outcome::IncludeOnly) => summary.include_only += 1,
                    Ok(Outcome::Failed) => {
                        summary.errors += 1;
                        if !self.options.continue_on_error {
                            break 'inputs;
                        }
                    }
                    Err(err) => {
                        self.write_text(&format!(
                            "Error: failed to process '{}': {:#}.\n",
                            path.display(),
                            err
                        ));
                        summary.errors += 1;
                        if !self.options.continue_on_error {
                            break 'inputs;
                        }
                    }
                }
            }
        }
        Ok(summary)
    }

    fn process_one(
        &mut self,
        input: &Path,
        compiler: &mut dyn ScriptCompiler,
        analyzer: Option<&mut (dyn BytecodeAnalyzer + '_)>,
    ) -> Result<Outcome> {
        let name = input
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase)
            .with_context(|| format!("input '{}' has no usable name", input.display()))?;
        let source = self.load_input(input)?;
        let output_base = self.output_base(input);

        if self.options.compile {
            self.compile_one(&name, &source, &output_base, compiler, analyzer)
        } else {
            self.disassemble_one(&name, &source, &output_base, compiler, analyzer)
        }
    }

    /// Raw filesystem first, then the resource system.
    fn load_input(&mut self, input: &Path) -> Result<Vec<u8>> {
        if input.is_file() {
            return std::fs::read(input)
                .with_context(|| format!("couldn't read '{}'", input.display()));
        }
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let res_type = input
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ResType::from_extension)
            .unwrap_or(if self.options.compile {
                ResType::NSS
            } else {
                ResType::NCS
            });
        debug!("input '{}' not on disk, trying resource system", stem);
        self.manager
            .borrow_mut()
            .load_resource(&stem, res_type)
            .with_context(|| format!("'{}' is neither a file nor a known resource", input.display()))
    }

    /// Strip the extension and pick the output directory: the batch
    /// directory when set, otherwise next to the input (or the explicit
    /// output name in single-input mode).
    fn output_base(&self, input: &Path) -> PathBuf {
        if let Some(batch_dir) = &self.options.batch_output_dir {
            let stem = input.file_stem().unwrap_or_default();
            return batch_dir.join(stem);
        }
        if let Some(explicit) = &self.options.output_file {
            return PathBuf::from(explicit).with_extension("");
        }
        input.with_extension("")
    }

    fn compile_flags(&self) -> CompileFlags {
        let mut flags = CompileFlags::empty();
        if self.options.show_includes {
            flags = flags | CompileFlags::SHOW_INCLUDES;
        }
        if self.options.show_preprocessed {
            flags = flags | CompileFlags::SHOW_PREPROCESSED;
        }
        if self.options.dump_pcode {
            flags = flags | CompileFlags::DUMP_PCODE;
        }
        flags
    }

    fn compile_one(
        &mut self,
        name: &str,
        source: &[u8],
        output_base: &Path,
        compiler: &mut dyn ScriptCompiler,
        analyzer: Option<&mut (dyn BytecodeAnalyzer + '_)>,
    ) -> Result<Outcome> {
        if !self.options.quiet {
            self.write_text(&format!("Compiling: {}.nss\n", name));
        }

        let request = CompileRequest {
            name,
            source,
            target_version: self.options.target_version,
            optimize: self.options.optimize,
            ignore_includes: false,
            generate_debug_info: !self.options.no_debug_symbols,
            enable_extensions: self.options.enable_extensions,
            flags: self.compile_flags(),
        };
        let mut resolver = ManagerIncludeResolver::new(
            self.manager.clone(),
            self.options.include_paths.clone(),
            self.options.show_includes,
            self.text_out.clone(),
        );
        let mut diagnostics = PrefixedSink {
            inner: self.text_out.clone(),
            prefix: self.options.error_prefix.clone(),
        };

        match compiler.compile(&request, &mut diagnostics, Some(&mut resolver)) {
            CompileResult::Success { bytecode, symbols } => {
                let ncs_path = output_base.with_extension("ncs");
                std::fs::write(&ncs_path, &bytecode)
                    .with_context(|| format!("couldn't write '{}'", ncs_path.display()))?;

                let mut ndb_path = None;
                if !self.options.no_debug_symbols && !symbols.is_empty() {
                    let path = output_base.with_extension("ndb");
                    std::fs::write(&path, &symbols)
                        .with_context(|| format!("couldn't write '{}'", path.display()))?;
                    ndb_path = Some(path);
                }

                if self.options.verify {
                    let Some(analyzer) = analyzer else {
                        bail!("verification requested but no analyzer is available");
                    };
                    let mut sink = PrefixedSink {
                        inner: self.text_out.clone(),
                        prefix: self.options.error_prefix.clone(),
                    };
                    let ok = verify_artifacts(
                        compiler,
                        analyzer,
                        &ncs_path,
                        ndb_path.as_deref(),
                        &mut sink,
                    );
                    if !ok {
                        return Ok(Outcome::Failed);
                    }
                }
                Ok(Outcome::Compiled)
            }
            CompileResult::IncludeOnly => {
                if !self.options.quiet {
                    self.write_text(&format!(
                        "{}.nss is an include file, no artefacts produced.\n",
                        name
                    ));
                }
                Ok(Outcome::IncludeOnly)
            }
            CompileResult::Failure => Ok(Outcome::Failed),
        }
    }

    fn disassemble_one(
        &mut self,
        name: &str,
        bytecode: &[u8],
        output_base: &Path,
        compiler: &mut dyn ScriptCompiler,
        analyzer: Option<&mut (dyn BytecodeAnalyzer + '_)>,
    ) -> Result<Outcome> {
        let Some(analyzer) = analyzer else {
            bail!("disassembly requires an analyzer");
        };
        if !self.options.quiet {
            self.write_text(&format!("Disassembling: {}.ncs\n", name));
        }
        let prototypes = super::frontend::enumerate_action_prototypes(compiler);
        match analyzer.disassemble(bytecode, &prototypes) {
            Ok(listing) => {
                let path = output_base.with_extension("pcode");
                std::fs::write(&path, listing)
                    .with_context(|| format!("couldn't write '{}'", path.display()))?;
                Ok(Outcome::Compiled)
            }
            Err(err) => {
                self.write_text(&format!("Error: disassembly of '{}' failed: {}.\n", name, err));
                Ok(Outcome::Failed)
            }
        }
    }
}
