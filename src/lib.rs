// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! NWScript compiler toolchain core.
//!
//! This crate is the resource-aware half of an NWScript build pipeline: it
//! resolves symbolic resources across archive formats, reads and writes the
//! engine's hierarchical container format bit-exactly, and drives batch
//! compilation through a pluggable language front-end.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐      ┌───────────────────┐      ┌────────────────┐
//! │ cli / main   │─────▶│ compiler::driver  │─────▶│ ScriptCompiler │
//! │ (bin target) │      │ (session, batch,  │      │ (external      │
//! └──────────────┘      │  artefact writes) │      │  front-end)    │
//!                       └─────────┬─────────┘      └───────┬────────┘
//!                                 │   include resolution   │
//!                                 ▼                        ▼
//!                       ┌───────────────────┐      ┌────────────────┐
//!                       │ resource::manager │◀─────│ IncludeResolver│
//!                       │ (tiers, index,    │      └────────────────┘
//!                       │  demand/release)  │
//!                       └─────────┬─────────┘
//!                                 │ providers
//!            ┌──────────┬─────────┼──────────┬──────────┐
//!            ▼          ▼         ▼          ▼          ▼
//!        directory    erf16     erf32       zip      key/bif
//!                                 │
//!                                 ▼
//!                       ┌───────────────────┐
//!                       │ gff / tlk / twoda │  (container codecs)
//!                       └───────────────────┘
//! ```
//!
//! The language front-end and the bytecode analyzer are deliberately not
//! part of this crate; they plug in through [`compiler::ScriptCompiler`]
//! and [`compiler::BytecodeAnalyzer`].
//!
//! # Usage
//!
//! ```ignore
//! use nwsc::compiler::{DriverOptions, DriverSession};
//! use nwsc::diag::ConsoleTextOut;
//!
//! let options = DriverOptions {
//!     inputs: vec!["myscript.nss".into()],
//!     ..Default::default()
//! };
//! let mut session = DriverSession::new(options, ConsoleTextOut::new().into_shared())?;
//! let summary = session.run(&mut my_frontend, None)?;
//! ```

pub mod compiler;
pub mod diag;
pub mod gff;
pub mod resource;
pub mod stream;
pub mod tlk;
pub mod twoda;

// The frequently-used names, one level up.
pub use compiler::{DriverOptions, DriverSession, ScriptCompiler, SessionSummary};
pub use gff::{GffReader, GffWriter};
pub use resource::{ResRef16, ResRef32, ResType, ResourceManager};
