// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Driver behavior end to end: batch compilation over wildcards, error
//! handling policy, include resolution through the resource system, and
//! the verification hookup.

mod common;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use nwsc::compiler::{DriverOptions, DriverSession};
use nwsc::diag::BufferTextOut;
use nwsc::resource::{Provider, ResType, ResourceManager, Tier};
use nwsc::resource::erf::ErfProvider;

use common::{build_erf32, write_files, FakeAnalyzer, FakeCompiler};

fn bare_session(options: DriverOptions, scratch: &Path) -> (DriverSession, Rc<RefCell<BufferTextOut>>) {
    let sink = Rc::new(RefCell::new(BufferTextOut::new()));
    let manager = ResourceManager::with_temp_root(sink.clone(), scratch).unwrap();
    let session = DriverSession::with_manager(options, sink.clone(), Rc::new(RefCell::new(manager)));
    (session, sink)
}

#[test]
fn batch_compile_writes_artifacts_and_skips_includes() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    let out = scratch.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    write_files(
        &src,
        &[
            ("alpha.nss", "void main() {}"),
            ("bravo.nss", "void main() { int x = 1; }"),
            ("inc_util.nss", "// include-only\nint util() { return 3; }"),
        ],
    );

    let options = DriverOptions {
        batch_output_dir: Some(out.clone()),
        inputs: vec![format!("{}/*.nss", src.display())],
        quiet: true,
        ..Default::default()
    };
    let (mut session, _sink) = bare_session(options, scratch.path());

    let mut compiler = FakeCompiler::default();
    let summary = session.run(&mut compiler, None).unwrap();

    assert_eq!(summary.compiled, 2);
    assert_eq!(summary.include_only, 1);
    assert_eq!(summary.errors, 0);

    for name in ["alpha", "bravo"] {
        assert!(out.join(format!("{}.ncs", name)).is_file());
        assert!(out.join(format!("{}.ndb", name)).is_file());
    }
    // Include-only sources produce no artefacts at all.
    assert!(!out.join("inc_util.ncs").exists());
    assert!(!out.join("inc_util.ndb").exists());
}

#[test]
fn suppressing_symbols_drops_the_ndb() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    write_files(&src, &[("only.nss", "void main() {}")]);

    let options = DriverOptions {
        no_debug_symbols: true,
        quiet: true,
        inputs: vec![src.join("only.nss").display().to_string()],
        ..Default::default()
    };
    let (mut session, _sink) = bare_session(options, scratch.path());
    let summary = session.run(&mut FakeCompiler::default(), None).unwrap();

    assert_eq!(summary.compiled, 1);
    assert!(src.join("only.ncs").is_file());
    assert!(!src.join("only.ndb").exists());
}

#[test]
fn continue_on_error_processes_the_rest_of_the_batch() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    let out = scratch.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    write_files(
        &src,
        &[
            ("a_first.nss", "void main() {}"),
            ("m_broken.nss", "void main() { syntax error }"),
            ("z_last.nss", "void main() {}"),
        ],
    );

    let options = DriverOptions {
        continue_on_error: true,
        batch_output_dir: Some(out.clone()),
        quiet: true,
        inputs: vec![format!("{}/*.nss", src.display())],
        ..Default::default()
    };
    let (mut session, sink) = bare_session(options, scratch.path());
    let summary = session.run(&mut FakeCompiler::default(), None).unwrap();

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.compiled, 2);
    assert!(out.join("a_first.ncs").is_file());
    assert!(!out.join("m_broken.ncs").exists());
    assert!(out.join("z_last.ncs").is_file());
    assert!(sink.borrow().contents().contains("parse failure"));
}

#[test]
fn default_policy_stops_at_the_first_error() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    let out = scratch.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    write_files(
        &src,
        &[
            ("a_broken.nss", "syntax error"),
            ("b_fine.nss", "void main() {}"),
        ],
    );

    let options = DriverOptions {
        batch_output_dir: Some(out.clone()),
        quiet: true,
        inputs: vec![format!("{}/*.nss", src.display())],
        ..Default::default()
    };
    let (mut session, _sink) = bare_session(options, scratch.path());
    let summary = session.run(&mut FakeCompiler::default(), None).unwrap();

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.compiled, 0);
    assert!(!out.join("b_fine.ncs").exists());
}

#[test]
fn includes_resolve_through_the_resource_system() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    write_files(&src, &[("uses_inc.nss", "#include \"x0_i0_lib\"\nvoid main() {}")]);

    // The include lives only inside an archive the manager indexes.
    let erf = scratch.path().join("module.mod");
    std::fs::write(
        &erf,
        build_erf32(
            b"MOD ",
            &[("x0_i0_lib", ResType::NSS, b"// include-only\nint lib() { return 7; }")],
        ),
    )
    .unwrap();

    let options = DriverOptions {
        quiet: true,
        show_includes: true,
        inputs: vec![src.join("uses_inc.nss").display().to_string()],
        ..Default::default()
    };
    let sink = Rc::new(RefCell::new(BufferTextOut::new()));
    let mut manager = ResourceManager::with_temp_root(sink.clone(), scratch.path()).unwrap();
    manager.register_provider(
        Provider::Erf32(ErfProvider::open(&erf).unwrap()),
        Tier::Encapsulated32,
    );
    manager.discover_resources();
    let mut session =
        DriverSession::with_manager(options, sink.clone(), Rc::new(RefCell::new(manager)));

    let summary = session.run(&mut FakeCompiler::default(), None).unwrap();
    assert_eq!(summary.compiled, 1);
    assert_eq!(summary.errors, 0);
    assert!(sink
        .borrow()
        .contents()
        .contains("Resolved include 'x0_i0_lib' from the resource system"));
}

#[test]
fn include_paths_take_precedence_over_resources() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    let incdir = scratch.path().join("includes");
    write_files(&src, &[("top.nss", "#include \"shared_inc\"\nvoid main() {}")]);
    write_files(&incdir, &[("shared_inc.nss", "// include-only\nint on_disk() { return 1; }")]);

    let options = DriverOptions {
        quiet: true,
        show_includes: true,
        include_paths: vec![incdir.clone()],
        inputs: vec![src.join("top.nss").display().to_string()],
        ..Default::default()
    };
    let (mut session, sink) = bare_session(options, scratch.path());
    let summary = session.run(&mut FakeCompiler::default(), None).unwrap();
    assert_eq!(summary.compiled, 1);
    assert!(sink.borrow().contents().contains("shared_inc.nss"));
}

#[test]
fn missing_include_fails_the_input() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    write_files(&src, &[("orphan.nss", "#include \"nowhere\"\nvoid main() {}")]);

    let options = DriverOptions {
        quiet: true,
        inputs: vec![src.join("orphan.nss").display().to_string()],
        ..Default::default()
    };
    let (mut session, sink) = bare_session(options, scratch.path());
    let summary = session.run(&mut FakeCompiler::default(), None).unwrap();
    assert_eq!(summary.errors, 1);
    assert!(sink.borrow().contents().contains("couldn't resolve include"));
}

#[test]
fn verification_runs_over_fresh_artifacts() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    write_files(&src, &[("checked.nss", "void main() {}")]);

    let options = DriverOptions {
        verify: true,
        quiet: true,
        inputs: vec![src.join("checked.nss").display().to_string()],
        ..Default::default()
    };
    let (mut session, _sink) = bare_session(options, scratch.path());
    let mut analyzer = FakeAnalyzer::default();
    let summary = session
        .run(&mut FakeCompiler::default(), Some(&mut analyzer))
        .unwrap();

    assert_eq!(summary.compiled, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(analyzer.analyzed, 1);
}

#[test]
fn custom_error_prefix_rewrites_diagnostics() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    write_files(&src, &[("bad.nss", "syntax error")]);

    let options = DriverOptions {
        quiet: true,
        error_prefix: Some("myscript.nss".to_string()),
        inputs: vec![src.join("bad.nss").display().to_string()],
        ..Default::default()
    };
    let (mut session, sink) = bare_session(options, scratch.path());
    let summary = session.run(&mut FakeCompiler::default(), None).unwrap();

    assert_eq!(summary.errors, 1);
    let output = sink.borrow().contents().to_string();
    assert!(output.contains("myscript.nss:"));
    assert!(!output.contains("Error:"));
}

#[test]
fn disassembly_writes_a_pcode_listing() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    std::fs::create_dir_all(&src).unwrap();

    // Produce a compiled artefact first, then disassemble it.
    write_files(&src, &[("prog.nss", "void main() {}")]);
    let options = DriverOptions {
        quiet: true,
        inputs: vec![src.join("prog.nss").display().to_string()],
        ..Default::default()
    };
    let (mut session, _sink) = bare_session(options, scratch.path());
    session.run(&mut FakeCompiler::default(), None).unwrap();

    let options = DriverOptions {
        compile: false,
        quiet: true,
        inputs: vec![src.join("prog.ncs").display().to_string()],
        ..Default::default()
    };
    let (mut session, _sink) = bare_session(options, scratch.path());
    let mut analyzer = FakeAnalyzer::default();
    let summary = session
        .run(&mut FakeCompiler::default(), Some(&mut analyzer))
        .unwrap();

    assert_eq!(summary.compiled, 1);
    let listing = std::fs::read_to_string(src.join("prog.pcode")).unwrap();
    assert!(listing.contains("3 intrinsics known"));
}

#[test]
fn explicit_output_name_is_used_in_single_mode() {
    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path().join("src");
    write_files(&src, &[("in.nss", "void main() {}")]);

    let options = DriverOptions {
        quiet: true,
        inputs: vec![src.join("in.nss").display().to_string()],
        output_file: Some(src.join("renamed.ncs").display().to_string()),
        ..Default::default()
    };
    let (mut session, _sink) = bare_session(options, scratch.path());
    let summary = session.run(&mut FakeCompiler::default(), None).unwrap();
    assert_eq!(summary.compiled, 1);
    assert!(src.join("renamed.ncs").is_file());
    assert!(!src.join("in.ncs").exists());
}
