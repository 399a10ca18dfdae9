use std::collections::{HashMap, HashSet};
use std::cmp::Reverse;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use anyhow::{Result, Context};
use filetime::FileTime;
use log::{debug, warn};
use rayon::prelude::*;

use crate::config::CleanupMode;
use crate::dedup::rank;
use crate::layout::{Layout, Placement};
use crate::utils::{ensure_dir_exists, path_depth};
use crate::{DirRecord, FileRecord};

/// What was done to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Copy,
    Delete,
    RemoveDir,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Copy => "copy",
            Action::Delete => "delete",
            Action::RemoveDir => "remove directory",
        };
        f.write_str(name)
    }
}

/// Represents a single file operation
#[derive(Debug, Clone)]
pub struct FileOperation {
    pub path: PathBuf,
    pub destination: Option<PathBuf>,
    pub hash: Option<String>,
    pub action: Action,
    pub success: bool,
    pub error: Option<String>,
    pub bytes: u64,
}

impl FileOperation {
    fn done(action: Action, path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            destination: None,
            hash: None,
            action,
            success: true,
            error: None,
            bytes: 0,
        }
    }

    fn failed(action: Action, path: &Path, error: &anyhow::Error) -> Self {
        warn!("Failed to {} {}: {:#}", action, path.display(), error);
        Self {
            success: false,
            error: Some(format!("{:#}", error)),
            ..Self::done(action, path)
        }
    }
}

/// Result of performing actions on files
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub operations: Vec<FileOperation>,
    pub total_bytes: u64,
    pub total_files_processed: usize,
    /// Items left alone on purpose, not counted as operations
    pub skipped: usize,
}

impl ActionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_operation(&mut self, operation: FileOperation) {
        self.total_bytes += operation.bytes;
        self.total_files_processed += 1;
        self.operations.push(operation);
    }

    pub fn merge(&mut self, other: ActionResult) {
        for operation in other.operations {
            self.add_operation(operation);
        }
        self.skipped += other.skipped;
    }

    pub fn success_count(&self) -> usize {
        self.operations.iter().filter(|op| op.success).count()
    }

    pub fn error_count(&self) -> usize {
        self.operations.iter().filter(|op| !op.success).count()
    }

    /// Content hashes with at least one failed operation
    pub fn failed_hashes(&self) -> HashSet<String> {
        self.operations
            .iter()
            .filter(|op| !op.success)
            .filter_map(|op| op.hash.clone())
            .collect()
    }
}

/// Copies selected files into the destination layout
pub struct Copier {
    layout: Layout,
    dry_run: bool,
}

impl Copier {
    pub fn new(layout: Layout, dry_run: bool) -> Self {
        Self { layout, dry_run }
    }

    /// Copy every file on a pool of `workers` threads. Files whose primary
    /// destination is the same path go to the same worker, so the
    /// exists-then-create check for a path never races.
    pub fn copy_files(&self, files: Vec<FileRecord>, workers: usize) -> Result<ActionResult> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("copy-{}", i))
            .build()
            .context("Failed to start the copy workers")?;

        let mut buckets: HashMap<PathBuf, Vec<(FileRecord, Placement)>> = HashMap::new();
        for file in files {
            let placement = self.layout.place(&file);
            buckets.entry(placement.path.clone()).or_default().push((file, placement));
        }

        let operations: Vec<FileOperation> = pool.install(|| {
            buckets
                .into_par_iter()
                .flat_map_iter(|(_, bucket)| self.copy_bucket(bucket))
                .collect()
        });

        let mut result = ActionResult::new();
        for operation in operations {
            result.add_operation(operation);
        }
        Ok(result)
    }

    /// Copy files sharing one primary destination, best ranked first. Paths
    /// claimed earlier in the bucket count as taken even in a dry run.
    fn copy_bucket(&self, mut bucket: Vec<(FileRecord, Placement)>) -> Vec<FileOperation> {
        bucket.sort_by(|(a, _), (b, _)| rank(a, b));

        let mut claimed: HashSet<PathBuf> = HashSet::new();
        bucket
            .into_iter()
            .map(|(file, primary)| {
                let placement = if claimed.contains(&primary.path) || primary.path.exists() {
                    let fallback = self.layout.fallback(&primary, &file);
                    debug!(
                        "{} is taken, using {}",
                        primary.path.display(),
                        fallback.path.display()
                    );
                    fallback
                } else {
                    primary
                };
                claimed.insert(placement.path.clone());
                self.copy_file(&file, &placement)
            })
            .collect()
    }

    fn copy_file(&self, file: &FileRecord, placement: &Placement) -> FileOperation {
        if self.dry_run {
            println!(
                "\n===== Dry Run Copy File =====\n  Source      :      {}\n  Destination :      {}\n  Roots       :      {:?}\n  Mapped      :      {}\n=============================",
                file.path.display(),
                placement.path.display(),
                file.tags,
                file.mapped.as_deref().unwrap_or_default(),
            );
            return FileOperation {
                destination: Some(placement.path.clone()),
                hash: file.hash.clone(),
                ..FileOperation::done(Action::Copy, &file.path)
            };
        }

        match write_copy(file, placement) {
            Ok(bytes) => {
                debug!(
                    "Copied {} -> {} (roots: {:?}, mapped: {}, {} bytes)",
                    file.path.display(),
                    placement.path.display(),
                    file.tags,
                    file.mapped.as_deref().unwrap_or_default(),
                    bytes
                );
                FileOperation {
                    destination: Some(placement.path.clone()),
                    hash: file.hash.clone(),
                    bytes,
                    ..FileOperation::done(Action::Copy, &file.path)
                }
            }
            Err(e) => FileOperation {
                destination: Some(placement.path.clone()),
                hash: file.hash.clone(),
                ..FileOperation::failed(Action::Copy, &file.path, &e)
            },
        }
    }
}

/// Copy the bytes and carry the modification time over
fn write_copy(file: &FileRecord, placement: &Placement) -> Result<u64> {
    ensure_dir_exists(&placement.dir)?;

    let mut source = fs::File::open(&file.path)
        .with_context(|| format!("Failed to open {}", file.path.display()))?;
    let mut destination = fs::File::create(&placement.path)
        .with_context(|| format!("Failed to create {}", placement.path.display()))?;

    let bytes = match io::copy(&mut source, &mut destination) {
        Ok(bytes) => bytes,
        Err(e) => {
            drop(destination);
            let _ = fs::remove_file(&placement.path);
            return Err(e).with_context(|| {
                format!("Failed to copy {} to {}", file.path.display(), placement.path.display())
            });
        }
    };
    drop(destination);

    let mtime = FileTime::from_system_time(file.modified);
    filetime::set_file_times(&placement.path, mtime, mtime)
        .with_context(|| format!("Failed to set modification time on {}", placement.path.display()))?;

    Ok(bytes)
}

/// Removes source files and the directories they leave empty. In a dry run
/// nothing is touched, but paths reported as removed count as gone so later
/// emptiness checks report what a real run would do.
pub struct Cleanup {
    dry_run: bool,
    gone: HashSet<PathBuf>,
}

impl Cleanup {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            gone: HashSet::new(),
        }
    }

    /// Delete every source file, except those whose content failed to copy
    pub fn delete_sources(&mut self, files: &[FileRecord], keep: &HashSet<String>) -> ActionResult {
        let mut result = ActionResult::new();

        for file in files {
            if keep.contains(file.hash()) {
                warn!("Keeping {}: its content was not copied", file.path.display());
                result.skipped += 1;
                continue;
            }

            if self.dry_run {
                println!("Would delete: {}", file.path.display());
                self.gone.insert(file.path.clone());
                result.add_operation(FileOperation::done(Action::Delete, &file.path));
                continue;
            }

            match fs::remove_file(&file.path) {
                Ok(()) => {
                    debug!("Deleted {}", file.path.display());
                    self.gone.insert(file.path.clone());
                    result.add_operation(FileOperation {
                        bytes: file.size,
                        ..FileOperation::done(Action::Delete, &file.path)
                    });
                }
                Err(e) => {
                    let e = anyhow::Error::new(e);
                    result.add_operation(FileOperation::failed(Action::Delete, &file.path, &e));
                }
            }
        }

        result
    }

    /// Remove empty directories deepest first, so a parent emptied by
    /// removing its children goes in the same pass.
    pub fn clear_empty_directories(&mut self, dirs: &[DirRecord], mode: CleanupMode) -> ActionResult {
        let mut ordered: Vec<&DirRecord> = dirs.iter().collect();
        ordered.sort_by_key(|d| Reverse(path_depth(&d.path)));

        let mut result = ActionResult::new();
        loop {
            let pass = self.remove_empty_pass(&ordered);
            let removed = pass.success_count();
            result.merge(pass);

            if mode == CleanupMode::Single || removed == 0 {
                break;
            }
        }
        result
    }

    fn remove_empty_pass(&mut self, ordered: &[&DirRecord]) -> ActionResult {
        let mut result = ActionResult::new();

        for dir in ordered {
            if self.gone.contains(&dir.path) {
                continue;
            }

            match self.is_empty(&dir.path) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("{:#}", e);
                    continue;
                }
            }

            if self.dry_run {
                println!("Would remove directory: {}", dir.path.display());
                self.gone.insert(dir.path.clone());
                result.add_operation(FileOperation::done(Action::RemoveDir, &dir.path));
                continue;
            }

            match fs::remove_dir(&dir.path) {
                Ok(()) => {
                    debug!("Removed empty directory {}", dir.path.display());
                    self.gone.insert(dir.path.clone());
                    result.add_operation(FileOperation::done(Action::RemoveDir, &dir.path));
                }
                Err(e) => {
                    let e = anyhow::Error::new(e);
                    result.add_operation(FileOperation::failed(Action::RemoveDir, &dir.path, &e));
                }
            }
        }

        result
    }

    fn is_empty(&self, path: &Path) -> Result<bool> {
        let entries = fs::read_dir(path)
            .with_context(|| format!("Failed to list directory {}", path.display()))?;

        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to list directory {}", path.display()))?;
            if !self.gone.contains(&entry.path()) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DateLayout;
    use crate::scanner::hash_file;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tempfile::tempdir;

    fn record(path: &Path, tags: &[&str], modified: SystemTime) -> FileRecord {
        FileRecord {
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            subfolder: path.parent().unwrap().file_name().unwrap().to_string_lossy().into_owned(),
            path: path.to_path_buf(),
            hash: Some(hash_file(path).unwrap()),
            modified,
            size: fs::metadata(path).unwrap().len(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            mapped: None,
        }
    }

    fn dir_record(path: &Path) -> DirRecord {
        DirRecord {
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            path: path.to_path_buf(),
            mapped: None,
            tags: vec![],
        }
    }

    #[test]
    fn test_copy_preserves_content_and_mtime() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let album = src.path().join("beach");
        fs::create_dir(&album).unwrap();
        fs::write(album.join("a.jpg"), b"sand").unwrap();
        let modified = UNIX_EPOCH + Duration::from_secs(1_500_000_000);

        let copier = Copier::new(Layout::new(dst.path(), DateLayout::YearMonth), false);
        let result = copier
            .copy_files(vec![record(&album.join("a.jpg"), &["Trips"], modified)], 2)
            .unwrap();

        let target = dst.path().join("Trips/beach/a.jpg");
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.total_bytes, 4);
        assert_eq!(fs::read(&target).unwrap(), b"sand");
        let copied = FileTime::from_last_modification_time(&fs::metadata(&target).unwrap());
        assert_eq!(copied, FileTime::from_system_time(modified));
    }

    #[test]
    fn test_same_destination_goes_to_hash_folder() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let first = src.path().join("one/album");
        let second = src.path().join("two/album");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("a.jpg"), b"first").unwrap();
        fs::write(second.join("a.jpg"), b"second").unwrap();

        let now = SystemTime::now();
        let a = record(&first.join("a.jpg"), &["T"], now);
        let b = record(&second.join("a.jpg"), &["T"], now);

        let copier = Copier::new(Layout::new(dst.path(), DateLayout::YearMonth), false);
        let result = copier.copy_files(vec![a.clone(), b.clone()], 4).unwrap();
        assert_eq!(result.success_count(), 2);

        let primary = dst.path().join("T/album/a.jpg");
        let contents = fs::read(&primary).unwrap();
        let other = if contents == b"first" { &b } else { &a };
        let fallback = dst
            .path()
            .join("T/album")
            .join(&other.hash()[..10])
            .join("a.jpg");
        assert!(fallback.is_file());
        assert_ne!(fs::read(&fallback).unwrap(), contents);
    }

    #[test]
    fn test_existing_destination_goes_to_hash_folder() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let album = src.path().join("album");
        fs::create_dir(&album).unwrap();
        fs::write(album.join("a.jpg"), b"new").unwrap();
        fs::create_dir_all(dst.path().join("T/album")).unwrap();
        fs::write(dst.path().join("T/album/a.jpg"), b"old").unwrap();

        let file = record(&album.join("a.jpg"), &["T"], SystemTime::now());
        let copier = Copier::new(Layout::new(dst.path(), DateLayout::YearMonth), false);
        copier.copy_files(vec![file.clone()], 1).unwrap();

        assert_eq!(fs::read(dst.path().join("T/album/a.jpg")).unwrap(), b"old");
        let fallback = dst.path().join("T/album").join(&file.hash()[..10]).join("a.jpg");
        assert_eq!(fs::read(fallback).unwrap(), b"new");
    }

    #[test]
    fn test_dry_run_copy_writes_nothing() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let album = src.path().join("album");
        fs::create_dir(&album).unwrap();
        fs::write(album.join("a.jpg"), b"x").unwrap();

        let file = record(&album.join("a.jpg"), &["T"], SystemTime::now());
        let copier = Copier::new(Layout::new(dst.path().join("out"), DateLayout::YearMonth), true);
        let result = copier.copy_files(vec![file], 1).unwrap();

        assert_eq!(result.success_count(), 1);
        assert_eq!(result.total_bytes, 0);
        assert_eq!(
            result.operations[0].destination.as_deref(),
            Some(dst.path().join("out/T/album/a.jpg").as_path())
        );
        assert!(!dst.path().join("out").exists());
    }

    #[test]
    fn test_missing_source_fails_only_that_file() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let album = src.path().join("album");
        fs::create_dir(&album).unwrap();
        fs::write(album.join("a.jpg"), b"a").unwrap();
        fs::write(album.join("b.jpg"), b"b").unwrap();

        let now = SystemTime::now();
        let a = record(&album.join("a.jpg"), &[], now);
        let b = record(&album.join("b.jpg"), &[], now);
        fs::remove_file(album.join("b.jpg")).unwrap();

        let copier = Copier::new(Layout::new(dst.path(), DateLayout::YearMonth), false);
        let result = copier.copy_files(vec![a, b.clone()], 2).unwrap();
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.error_count(), 1);
        assert!(result.failed_hashes().contains(b.hash()));
    }

    #[test]
    fn test_nested_empty_dirs_removed_deepest_first() {
        let root = tempdir().unwrap();
        let a = root.path().join("A");
        let b = a.join("B");
        fs::create_dir_all(&b).unwrap();
        fs::write(b.join("only.jpg"), b"x").unwrap();
        let file = record(&b.join("only.jpg"), &[], SystemTime::now());

        let mut cleanup = Cleanup::new(false);
        let deleted = cleanup.delete_sources(&[file], &HashSet::new());
        assert_eq!(deleted.success_count(), 1);

        let removed = cleanup.clear_empty_directories(&[dir_record(&a), dir_record(&b)], CleanupMode::Single);
        let order: Vec<_> = removed.operations.iter().map(|op| op.path.clone()).collect();
        assert_eq!(order, vec![b.clone(), a.clone()]);
        assert!(!a.exists());
        assert!(root.path().exists());
    }

    #[test]
    fn test_non_empty_dir_is_kept() {
        let root = tempdir().unwrap();
        let a = root.path().join("A");
        fs::create_dir(&a).unwrap();
        fs::write(a.join("keep.txt"), b"x").unwrap();

        let removed = Cleanup::new(false).clear_empty_directories(&[dir_record(&a)], CleanupMode::Single);
        assert_eq!(removed.success_count(), 0);
        assert!(a.is_dir());
    }

    #[test]
    fn test_walked_source_root_empties_in_same_pass() {
        let root = tempdir().unwrap();
        let a = root.path().join("A");
        let b = a.join("B");
        fs::create_dir_all(&b).unwrap();

        let dirs = [dir_record(root.path()), dir_record(&a), dir_record(&b)];
        let removed = Cleanup::new(false).clear_empty_directories(&dirs, CleanupMode::Single);
        assert_eq!(removed.success_count(), 3);
        assert!(!root.path().exists());
    }

    #[test]
    fn test_until_stable_stops_when_nothing_left() {
        let root = tempdir().unwrap();
        let a = root.path().join("A");
        let b = root.path().join("B");
        fs::create_dir(&a).unwrap();
        fs::create_dir(&b).unwrap();
        fs::write(b.join("keep.txt"), b"x").unwrap();

        let dirs = [dir_record(&a), dir_record(&b)];
        let removed = Cleanup::new(false).clear_empty_directories(&dirs, CleanupMode::UntilStable);
        assert_eq!(removed.success_count(), 1);
        assert_eq!(removed.error_count(), 0);
        assert!(b.is_dir());
    }

    #[test]
    fn test_dry_run_cleanup_touches_nothing_but_reports_cascade() {
        let root = tempdir().unwrap();
        let a = root.path().join("A");
        let b = a.join("B");
        fs::create_dir_all(&b).unwrap();
        fs::write(b.join("only.jpg"), b"x").unwrap();
        let file = record(&b.join("only.jpg"), &[], SystemTime::now());

        let mut cleanup = Cleanup::new(true);
        cleanup.delete_sources(&[file], &HashSet::new());
        let removed = cleanup.clear_empty_directories(&[dir_record(&a), dir_record(&b)], CleanupMode::Single);

        assert_eq!(removed.success_count(), 2);
        assert!(b.join("only.jpg").is_file());
        assert!(b.is_dir());
    }

    #[test]
    fn test_delete_keeps_failed_content() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("a.jpg"), b"x").unwrap();
        let file = record(&root.path().join("a.jpg"), &[], SystemTime::now());
        let keep: HashSet<String> = [file.hash().to_string()].into_iter().collect();

        let result = Cleanup::new(false).delete_sources(&[file], &keep);
        assert_eq!(result.total_files_processed, 0);
        assert_eq!(result.skipped, 1);
        assert!(root.path().join("a.jpg").is_file());
    }
}
