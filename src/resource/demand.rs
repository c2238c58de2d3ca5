// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Scoped demand guard: construction demands, drop releases.
//!
//! The refcount in the manager makes a demanded path live until its final
//! release, so the guard gives callers the usual RAII shape. Cloning
//! re-demands (one more reference), moving transfers the single reference.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::warn;

use super::manager::ResourceManager;
use super::{ResType, ResourceError};

/// Shared single-threaded handle to the manager, as the guard holds it.
pub type SharedResourceManager = Rc<RefCell<ResourceManager>>;

/// A demanded resource that releases itself.
pub struct ScopedDemand {
    manager: SharedResourceManager,
    name: String,
    res_type: ResType,
    path: PathBuf,
}

impl ScopedDemand {
    pub fn new(
        manager: SharedResourceManager,
        name: &str,
        res_type: ResType,
    ) -> Result<Self, ResourceError> {
        let path = manager.borrow_mut().demand(name, res_type)?;
        Ok(Self {
            manager,
            name: name.to_string(),
            res_type,
            path,
        })
    }

    /// Filesystem path of the demanded copy; valid for the guard's
    /// lifetime.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Clone for ScopedDemand {
    fn clone(&self) -> Self {
        // Re-demand: the resource is live, so this only bumps the refcount.
        let path = self
            .manager
            .borrow_mut()
            .demand(&self.name, self.res_type)
            .expect("re-demand of a live resource");
        Self {
            manager: self.manager.clone(),
            name: self.name.clone(),
            res_type: self.res_type,
            path,
        }
    }
}

impl Drop for ScopedDemand {
    fn drop(&mut self) {
        if let Err(err) = self.manager.borrow_mut().release(&self.path) {
            // A module reload may have already torn the demand table down.
            warn!("scoped release of '{}' failed: {}", self.path.display(), err);
        }
    }
}
