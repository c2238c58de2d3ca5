// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Pluggable diagnostic sink.
//!
//! Everything user-visible — compiler diagnostics, warnings, load progress —
//! flows through [`TextOut`], so embedders can capture or redirect it. The
//! default sink writes to stdout and can tee into a timestamped log file.
//! This is deliberately separate from the `log` facade: `log` carries
//! developer tracing, `TextOut` carries the tool's actual output.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Destination for user-visible diagnostic text.
pub trait TextOut {
    fn write_text(&mut self, text: &str);
}

/// Shared handle to a sink; the manager, driver, and compiler callbacks all
/// write to the same one.
pub type SharedTextOut = Rc<RefCell<dyn TextOut>>;

/// Stdout sink with an optional log-file tee.
pub struct ConsoleTextOut {
    log_file: Option<File>,
    color: bool,
}

impl ConsoleTextOut {
    pub fn new() -> Self {
        Self {
            log_file: None,
            color: atty::is(atty::Stream::Stdout),
        }
    }

    /// Tee output into `path`, each line stamped with seconds since epoch.
    pub fn with_log_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let log_file = File::create(path)?;
        Ok(Self {
            log_file: Some(log_file),
            color: atty::is(atty::Stream::Stdout),
        })
    }

    pub fn into_shared(self) -> SharedTextOut {
        Rc::new(RefCell::new(self))
    }

    fn colorize(&self, text: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        // Highlight the conventional severity prefixes.
        if let Some(rest) = text.strip_prefix("WARNING:") {
            format!("\x1b[33mWARNING:\x1b[0m{}", rest)
        } else if let Some((prefix, rest)) = text.split_once(':') {
            if prefix.ends_with("Error") || prefix.ends_with("ERROR") {
                format!("\x1b[31m{}:\x1b[0m{}", prefix, rest)
            } else {
                text.to_string()
            }
        } else {
            text.to_string()
        }
    }
}

impl Default for ConsoleTextOut {
    fn default() -> Self {
        Self::new()
    }
}

impl TextOut for ConsoleTextOut {
    fn write_text(&mut self, text: &str) {
        print!("{}", self.colorize(text));
        let _ = io::stdout().flush();

        if let Some(file) = &mut self.log_file {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            for line in text.split_inclusive('\n') {
                let _ = write!(file, "[{}] {}", stamp, line);
            }
        }
    }
}

/// Sink that retains everything written; used by embedders and the test
/// suites to assert on diagnostics.
#[derive(Default)]
pub struct BufferTextOut {
    buffer: String,
}

impl BufferTextOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.buffer.lines()
    }

    pub fn into_shared(self) -> SharedTextOut {
        Rc::new(RefCell::new(self))
    }
}

impl TextOut for BufferTextOut {
    fn write_text(&mut self, text: &str) {
        self.buffer.push_str(text);
    }
}

/// Sink that drops everything.
pub struct NullTextOut;

impl TextOut for NullTextOut {
    fn write_text(&mut self, _text: &str) {}
}
