pub mod config;
pub mod tagger;
pub mod walker;
pub mod scanner;
pub mod dedup;
pub mod layout;
pub mod actions;
pub mod pipeline;
pub mod utils;

use std::path::PathBuf;
use std::time::SystemTime;

pub use config::{CleanupMode, DateLayout, JobConfig};
pub use scanner::Scanner;
pub use pipeline::{run, RunSummary};

/// A directory visited by the walker, with the tags derived from its path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    pub name: String,
    pub path: PathBuf,
    pub mapped: Option<String>,
    pub tags: Vec<String>,
}

/// A media file found in a [`DirRecord`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    pub path: PathBuf,
    /// Name of the directory the file was found in
    pub subfolder: String,
    /// Hex content hash, set once the file has been read
    pub hash: Option<String>,
    pub modified: SystemTime,
    pub size: u64,
    pub tags: Vec<String>,
    pub mapped: Option<String>,
}

impl FileRecord {
    /// Build an unhashed record for a file living in `dir`
    pub fn in_dir(dir: &DirRecord, name: String, size: u64, modified: SystemTime) -> Self {
        Self {
            path: dir.path.join(&name),
            name,
            subfolder: dir.name.clone(),
            hash: None,
            modified,
            size,
            tags: dir.tags.clone(),
            mapped: dir.mapped.clone(),
        }
    }

    pub fn hash(&self) -> &str {
        self.hash.as_deref().unwrap_or_default()
    }

    pub fn has_mapped(&self) -> bool {
        self.mapped.as_deref().is_some_and(|m| !m.is_empty())
    }
}

/// Output of the read stage: every directory walked and every file hashed
#[derive(Debug, Default)]
pub struct ScanResult {
    pub dirs: Vec<DirRecord>,
    pub files: Vec<FileRecord>,
    pub total_size: u64,
}

impl ScanResult {
    pub fn total_files(&self) -> usize {
        self.files.len()
    }
}
