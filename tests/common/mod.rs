// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Shared test fixtures: on-disk archive builders and scripted stand-ins
//! for the external front-end and analyzer.

#![allow(dead_code)]

use std::path::Path;

use nwsc::compiler::{
    ActionPrototype, ActionType, AnalyzerError, AnalyzerInput, BytecodeAnalyzer, CompileRequest,
    CompileResult, IncludeResolver, ScriptCompiler,
};
use nwsc::diag::TextOut;
use nwsc::resource::ResType;

// ============================================================================
// ARCHIVE FIXTURES
// ============================================================================

/// Serialize a 32-byte-resref ERF archive.
pub fn build_erf32(signature: &[u8; 4], entries: &[(&str, ResType, &[u8])]) -> Vec<u8> {
    const HEADER_SIZE: usize = 160;
    let key_entry_size = 32 + 8;
    let key_list_offset = HEADER_SIZE as u32;
    let resource_list_offset = key_list_offset + (entries.len() * key_entry_size) as u32;
    let data_offset = resource_list_offset + (entries.len() * 8) as u32;

    let mut out = Vec::new();
    out.extend_from_slice(signature);
    out.extend_from_slice(b"V1.1");
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
    out.extend_from_slice(&key_list_offset.to_le_bytes());
    out.extend_from_slice(&resource_list_offset.to_le_bytes());
    out.extend_from_slice(&2026u32.to_le_bytes());
    out.extend_from_slice(&100u32.to_le_bytes());
    out.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    out.resize(HEADER_SIZE, 0);

    for (i, (name, res_type, _)) in entries.iter().enumerate() {
        let mut resref = [0u8; 32];
        let bytes = name.to_ascii_lowercase().into_bytes();
        let take = bytes.len().min(32);
        resref[..take].copy_from_slice(&bytes[..take]);
        out.extend_from_slice(&resref);
        out.extend_from_slice(&(i as u32).to_le_bytes());
        out.extend_from_slice(&res_type.0.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    let mut cursor = data_offset;
    for (_, _, data) in entries {
        out.extend_from_slice(&cursor.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        cursor += data.len() as u32;
    }
    for (_, _, data) in entries {
        out.extend_from_slice(data);
    }
    out
}

/// Serialize a stored-method zip archive.
pub fn build_zip_stored(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();

    for (name, data) in entries {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(data);
        let crc = hasher.finalize();

        let local_offset = out.len() as u32;
        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // stored
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);

        central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // stored
        central.extend_from_slice(&0u32.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u32.to_le_bytes());
        central.extend_from_slice(&local_offset.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }

    let cd_offset = out.len() as u32;
    let cd_size = central.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Serialize a minimal TLK V3.0 talk table.
pub fn build_tlk(language: u32, strings: &[Option<&str>]) -> Vec<u8> {
    const HEADER_SIZE: usize = 20;
    const ENTRY_SIZE: usize = 40;

    let mut out = Vec::new();
    out.extend_from_slice(b"TLK ");
    out.extend_from_slice(b"V3.0");
    out.extend_from_slice(&language.to_le_bytes());
    out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    let string_data_offset = HEADER_SIZE as u32 + strings.len() as u32 * ENTRY_SIZE as u32;
    out.extend_from_slice(&string_data_offset.to_le_bytes());

    let mut heap: Vec<u8> = Vec::new();
    for text in strings {
        let (flags, offset, size) = match text {
            Some(text) => {
                let offset = heap.len() as u32;
                heap.extend_from_slice(text.as_bytes());
                (1u32, offset, text.len() as u32)
            }
            None => (0, 0, 0),
        };
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&0f32.to_le_bytes());
    }
    out.extend_from_slice(&heap);
    out
}

// ============================================================================
// SCRIPTED FRONT-END
// ============================================================================

/// Magic prefix the fake front-end stamps on its bytecode.
pub const FAKE_NCS_MAGIC: &[u8] = b"NCS V1.0B";

/// A scripted front-end with just enough behavior to exercise the driver:
///
/// - a line `// include-only` makes the input an include-style source,
/// - a line containing `syntax error` fails with a diagnostic,
/// - `#include "name"` resolves through the registered resolver and fails
///   when the include cannot be loaded,
/// - anything else compiles to a recognizable fake artefact.
#[derive(Default)]
pub struct FakeCompiler {
    pub compiled: Vec<String>,
}

impl ScriptCompiler for FakeCompiler {
    fn compile(
        &mut self,
        request: &CompileRequest<'_>,
        diagnostics: &mut dyn TextOut,
        mut resolver: Option<&mut dyn IncludeResolver>,
    ) -> CompileResult {
        let source = String::from_utf8_lossy(request.source).into_owned();

        if source.contains("syntax error") {
            diagnostics.write_text(&format!(
                "Error: {}.nss(1): parse failure near 'syntax error'\n",
                request.name
            ));
            return CompileResult::Failure;
        }

        let mut resolved_sources = vec![source.clone()];
        if !request.ignore_includes {
            for line in source.lines() {
                let Some(rest) = line.trim().strip_prefix("#include \"") else {
                    continue;
                };
                let Some(name) = rest.strip_suffix('"') else {
                    continue;
                };
                let loaded = resolver
                    .as_deref_mut()
                    .and_then(|r| r.load_file(name, ResType::NSS));
                match loaded {
                    Some(bytes) => {
                        resolved_sources.push(String::from_utf8_lossy(&bytes).into_owned());
                    }
                    None => {
                        diagnostics.write_text(&format!(
                            "Error: {}.nss: couldn't resolve include \"{}\"\n",
                            request.name, name
                        ));
                        return CompileResult::Failure;
                    }
                }
            }
        }

        if source.contains("// include-only") {
            return CompileResult::IncludeOnly;
        }

        self.compiled.push(request.name.to_string());
        let mut bytecode = FAKE_NCS_MAGIC.to_vec();
        bytecode.extend_from_slice(&(resolved_sources.len() as u32).to_le_bytes());
        bytecode.extend_from_slice(request.name.as_bytes());

        let symbols = if request.generate_debug_info {
            let mut symbols = b"NDB V1.0".to_vec();
            symbols.extend_from_slice(request.name.as_bytes());
            symbols
        } else {
            Vec::new()
        };
        CompileResult::Success { bytecode, symbols }
    }

    fn action_prototype(&self, action_id: u32) -> Option<ActionPrototype> {
        let name = match action_id {
            0 => "Random",
            1 => "PrintString",
            2 => "FloatToString",
            _ => return None,
        };
        Some(ActionPrototype {
            name: name.to_string(),
            return_type: ActionType::Void,
            min_params: 1,
            max_params: 1,
            param_types: vec![ActionType::Int],
        })
    }
}

/// Analyzer stand-in: accepts anything stamped with the fake magic.
#[derive(Default)]
pub struct FakeAnalyzer {
    pub analyzed: usize,
}

impl BytecodeAnalyzer for FakeAnalyzer {
    fn analyze(
        &mut self,
        input: &AnalyzerInput<'_>,
        _diagnostics: &mut dyn TextOut,
    ) -> Result<(), AnalyzerError> {
        self.analyzed += 1;
        if input.bytecode.starts_with(FAKE_NCS_MAGIC) {
            Ok(())
        } else {
            Err(AnalyzerError::Script {
                pc: 0,
                stack_index: 0,
                message: "bad program header".to_string(),
            })
        }
    }

    fn disassemble(
        &mut self,
        bytecode: &[u8],
        prototypes: &[ActionPrototype],
    ) -> Result<String, AnalyzerError> {
        if !bytecode.starts_with(FAKE_NCS_MAGIC) {
            return Err(AnalyzerError::Failed("bad program header".to_string()));
        }
        Ok(format!(
            "; {} bytes, {} intrinsics known\n",
            bytecode.len(),
            prototypes.len()
        ))
    }
}

/// Write `files` under `dir`, creating it first.
pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    std::fs::create_dir_all(dir).unwrap();
    for (name, body) in files {
        std::fs::write(dir.join(name), body).unwrap();
    }
}
