//! # Driver coordinator
//!
//! `giggly_core::module_loader::FileCoordinator` implementation for `gigglyc`'s
//! single-threaded build: every file compiles on the same thread that imports it, so
//! there is never anything to actually wait on, but `register` still reports whether
//! this is the first claim so the caller can log a cache hit vs. a fresh compile.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use giggly_core::module_loader::FileCoordinator;
use log::debug;

#[derive(Default)]
pub struct SequentialCoordinator {
    claimed: RefCell<HashSet<PathBuf>>,
}

impl FileCoordinator for SequentialCoordinator {
    fn register(&self, path: &Path) -> bool {
        let first = self.claimed.borrow_mut().insert(path.to_path_buf());
        if first {
            debug!("claiming '{}' for compilation", path.display());
        } else {
            debug!("'{}' already claimed, skipping re-registration", path.display());
        }
        first
    }

    fn wait_until_compiled(&self, _path: &Path) {}
}
