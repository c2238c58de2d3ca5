// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! The contract between the driver and the NWScript front-end.
//!
//! The language front-end (lexer, parser, code generator) is a separate
//! component; the driver addresses it exclusively through [`ScriptCompiler`].
//! The contract is callback-shaped: the driver hands over source bytes and
//! a diagnostic sink, and optionally an include resolver so that `#include`
//! lookups flow back through the caller's resource system instead of
//! whatever the front-end would do on its own.
//!
//! The front-end also exposes the engine-intrinsic ("action") prototype
//! table, which the verification pass walks id by id.

use crate::diag::TextOut;
use crate::resource::ResType;

// ============================================================================
// COMPILE FLAGS
// ============================================================================

/// Trace switches forwarded to the front-end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileFlags(u32);

impl CompileFlags {
    /// Report where each include file was resolved from.
    pub const SHOW_INCLUDES: CompileFlags = CompileFlags(0x1);
    /// Echo the preprocessed source text.
    pub const SHOW_PREPROCESSED: CompileFlags = CompileFlags(0x2);
    /// Dump the internal pcode of compiled contributions.
    pub const DUMP_PCODE: CompileFlags = CompileFlags(0x4);

    pub fn empty() -> Self {
        CompileFlags(0)
    }

    pub fn contains(self, other: CompileFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CompileFlags {
    type Output = CompileFlags;
    fn bitor(self, rhs: CompileFlags) -> CompileFlags {
        CompileFlags(self.0 | rhs.0)
    }
}

// ============================================================================
// REQUESTS AND RESULTS
// ============================================================================

/// One compilation request.
pub struct CompileRequest<'a> {
    /// Resource name of the input (no extension).
    pub name: &'a str,
    pub source: &'a [u8],
    /// Engine-compatible compiler version number (e.g. `169`); `999999`
    /// selects the newest dialect.
    pub target_version: u32,
    pub optimize: bool,
    /// Treat the input as standalone; do not resolve includes.
    pub ignore_includes: bool,
    pub generate_debug_info: bool,
    /// Allow non-canonical language extensions.
    pub enable_extensions: bool,
    pub flags: CompileFlags,
}

/// Front-end verdict on one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    /// Artefacts are valid. `symbols` is empty when debug info was off.
    Success { bytecode: Vec<u8>, symbols: Vec<u8> },
    /// The input has no entry point: a valid include-style source that
    /// produces no artefacts. Not an error.
    IncludeOnly,
    /// Diagnostics explain what went wrong.
    Failure,
}

/// Caller-supplied include resolution.
///
/// When registered, the front-end resolves every `#include` through this
/// instead of its own lookup. Buffers are owned, so the unload half of the
/// original callback pair is simply `Drop`.
pub trait IncludeResolver {
    fn load_file(&mut self, name: &str, res_type: ResType) -> Option<Vec<u8>>;
}

// ============================================================================
// ACTION PROTOTYPES
// ============================================================================

/// Parameter and return types of engine intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Void,
    Int,
    Float,
    String,
    Object,
    Vector,
    Action,
    Effect,
    Event,
    Location,
    Talent,
    ItemProperty,
}

/// Signature metadata for one engine intrinsic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPrototype {
    pub name: String,
    pub return_type: ActionType,
    pub min_params: u32,
    pub max_params: u32,
    pub param_types: Vec<ActionType>,
}

// ============================================================================
// THE CONTRACT
// ============================================================================

/// The front-end as the driver sees it.
pub trait ScriptCompiler {
    /// Compile one source. Diagnostics stream into `diagnostics`;
    /// `resolver`, when given, owns all include lookups.
    fn compile(
        &mut self,
        request: &CompileRequest<'_>,
        diagnostics: &mut dyn TextOut,
        resolver: Option<&mut dyn IncludeResolver>,
    ) -> CompileResult;

    /// Signature of engine intrinsic `action_id`, or `None` past the end
    /// of the table.
    fn action_prototype(&self, action_id: u32) -> Option<ActionPrototype>;
}

/// Walk the intrinsic table from id 0 until the front-end reports the end.
pub fn enumerate_action_prototypes(compiler: &dyn ScriptCompiler) -> Vec<ActionPrototype> {
    let mut prototypes = Vec::new();
    let mut id = 0u32;
    while let Some(prototype) = compiler.action_prototype(id) {
        prototypes.push(prototype);
        id += 1;
    }
    prototypes
}
