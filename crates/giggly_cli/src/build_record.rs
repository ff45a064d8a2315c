//! # Build record
//!
//! Persisted `.giggly-build.json` cache keyed by the path of every `.gc` file the
//! driver has ever seen, so a second build of an unchanged tree skips recompiling
//! files whose content hash hasn't moved. Scoped per source root, the way the
//! reference project scopes its own on-disk state to the directory it was invoked on.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const RECORD_FILE_NAME: &str = ".giggly-build.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileEntry {
    pub hash: String,
    pub uptodate: bool,
    pub functions: Vec<String>,
    pub structs: Vec<String>,
    pub generic_struct_instances: Vec<String>,
    pub generic_function_instances: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildRecord {
    pub files: HashMap<String, FileEntry>,
}

impl BuildRecord {
    pub fn load(root_dir: &Path) -> Self {
        let path = root_dir.join(RECORD_FILE_NAME);
        fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, root_dir: &Path) -> std::io::Result<()> {
        let path = root_dir.join(RECORD_FILE_NAME);
        let text = serde_json::to_string_pretty(self).expect("BuildRecord serializes");
        fs::write(path, text)
    }

    /// Returns `true` when `relative_path`'s previously recorded hash matches `hash`
    /// and that entry is marked up to date, i.e. the file can be skipped this build.
    pub fn is_uptodate(&self, relative_path: &str, hash: &str) -> bool {
        self.files.get(relative_path).is_some_and(|entry| entry.uptodate && entry.hash == hash)
    }

    pub fn record_compiled(
        &mut self,
        relative_path: &str,
        hash: String,
        functions: Vec<String>,
        structs: Vec<String>,
        generic_struct_instances: Vec<String>,
        generic_function_instances: Vec<String>,
    ) {
        self.files.insert(
            relative_path.to_string(),
            FileEntry {
                hash,
                uptodate: true,
                functions,
                structs,
                generic_struct_instances,
                generic_function_instances,
            },
        );
    }
}

pub fn hash_contents(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recursively collects every `.gc` file under `dir`, skipping the build record and
/// any directory entry that fails to read rather than aborting the whole walk.
pub fn collect_gc_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    collect_gc_files_into(dir, &mut out);
    out
}

fn collect_gc_files_into(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_gc_files_into(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "gc") {
            out.push(path);
        }
    }
}
