use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, UNIX_EPOCH};
use anyhow::{Result, Context};
use blake3::Hasher;
use crossbeam_channel::{select, tick, unbounded, Receiver, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};

use crate::config::JobConfig;
use crate::utils::format_file_size;
use crate::walker::walk_sources;
use crate::{DirRecord, FileRecord, ScanResult};

const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// How long an idle worker waits on the file queue before rechecking the
/// completion counters
const IDLE_WAIT: Duration = Duration::from_millis(25);

/// A worker stops listing directories while this many files wait to be
/// hashed
const MAX_BACKLOG: usize = 64;

const READ_BUFFER: usize = 64 * 1024;

/// Counters shared by the pool. Completion is decided from these, never from
/// queue lengths.
#[derive(Debug, Default)]
struct Progress {
    dirs_remaining: AtomicUsize,
    files_queued: AtomicUsize,
    files_finished: AtomicUsize,
    files_hashed: AtomicUsize,
    bytes_discovered: AtomicU64,
    /// Largest number of queued but unhashed files seen
    peak_backlog: AtomicUsize,
    /// Files hashed while some directory was still unlisted
    hashed_while_listing: AtomicUsize,
}

impl Progress {
    /// True once every directory has been listed and every queued file has
    /// been hashed or dropped. `files_queued` only grows while a directory is
    /// being listed, so once `dirs_remaining` reaches zero it is final.
    fn is_complete(&self) -> bool {
        if self.dirs_remaining.load(Ordering::SeqCst) != 0 {
            return false;
        }
        let queued = self.files_queued.load(Ordering::SeqCst);
        self.files_finished.load(Ordering::SeqCst) == queued
    }

    fn backlog(&self) -> usize {
        let queued = self.files_queued.load(Ordering::SeqCst);
        queued.saturating_sub(self.files_finished.load(Ordering::SeqCst))
    }

    fn message(&self) -> String {
        format!(
            "directories left: {} file queue: {} files hashed: {} bytes discovered: {}",
            self.dirs_remaining.load(Ordering::SeqCst),
            self.backlog(),
            self.files_hashed.load(Ordering::SeqCst),
            format_file_size(self.bytes_discovered.load(Ordering::SeqCst)),
        )
    }
}

/// Worker pool that lists directories and hashes the media files in them
pub struct Scanner {
    extensions: HashSet<String>,
    workers: usize,
    show_progress: bool,
}

impl Scanner {
    pub fn new(config: &JobConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            workers: config.workers.max(1),
            show_progress: true,
        }
    }

    pub fn set_show_progress(&mut self, show: bool) {
        self.show_progress = show;
    }

    /// Walk the configured sources, then discover and hash their media files
    pub fn scan_directories(&self, config: &JobConfig) -> ScanResult {
        let dirs = walk_sources(config);
        debug!("{} directories to scan", dirs.len());

        let (files, total_size) = self.scan(&dirs);
        ScanResult {
            dirs,
            files,
            total_size,
        }
    }

    /// Run the discovery and hashing pool over `dirs`. Returns every file
    /// that was hashed successfully and the bytes discovered.
    pub fn scan(&self, dirs: &[DirRecord]) -> (Vec<FileRecord>, u64) {
        let (files, progress) = self.run_pool(dirs);
        (files, progress.bytes_discovered.load(Ordering::SeqCst))
    }

    fn run_pool(&self, dirs: &[DirRecord]) -> (Vec<FileRecord>, Progress) {
        let progress = Progress::default();
        progress.dirs_remaining.store(dirs.len(), Ordering::SeqCst);

        let (dir_tx, dir_rx) = unbounded();
        for dir in dirs {
            // the receiver is alive, this cannot fail
            let _ = dir_tx.send(dir.clone());
        }
        drop(dir_tx);

        let (file_tx, file_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();
        let (done_tx, done_rx) = unbounded::<()>();

        let bar = self.progress_bar();

        thread::scope(|s| {
            s.spawn(|| report_progress(&progress, &bar, &done_rx));

            let (dirs, queue, files, results, counters) = (&dir_rx, &file_tx, &file_rx, &result_tx, &progress);
            let handles: Vec<_> = (0..self.workers)
                .map(|_| s.spawn(move || self.run_worker(dirs, queue, files, results, counters)))
                .collect();

            for handle in handles {
                if handle.join().is_err() {
                    warn!("A scan worker panicked");
                }
            }
            drop(done_tx);
        });

        bar.finish_with_message(progress.message());

        drop(result_tx);
        let files: Vec<FileRecord> = result_rx.into_iter().collect();
        (files, progress)
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            bar.set_style(style);
        }
        bar
    }

    fn run_worker(
        &self,
        dirs: &Receiver<DirRecord>,
        file_tx: &Sender<FileRecord>,
        files: &Receiver<FileRecord>,
        results: &Sender<FileRecord>,
        progress: &Progress,
    ) {
        loop {
            let mut worked = false;

            // hash one queued file per turn so the queue drains while
            // directories are still being listed
            if let Ok(file) = files.try_recv() {
                hash_step(file, results, progress);
                worked = true;
            }

            // the directory queue is fully seeded before workers start, so
            // once it reads empty it stays empty
            if progress.backlog() < MAX_BACKLOG {
                if let Ok(dir) = dirs.try_recv() {
                    self.discover(&dir, file_tx, progress);
                    progress.dirs_remaining.fetch_sub(1, Ordering::SeqCst);
                    worked = true;
                }
            }

            if worked {
                continue;
            }

            match files.recv_timeout(IDLE_WAIT) {
                Ok(file) => hash_step(file, results, progress),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if progress.is_complete() {
                break;
            }
        }
    }

    /// List one directory and queue every media file in it
    fn discover(&self, dir: &DirRecord, file_tx: &Sender<FileRecord>, progress: &Progress) {
        let entries = match fs::read_dir(&dir.path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read directory {}: {}", dir.path.display(), e);
                return;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read an entry of {}: {}", dir.path.display(), e);
                    continue;
                }
            };

            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.is_media_file(&name) {
                continue;
            }

            let path = entry.path();
            let metadata = match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Failed to get metadata for {}: {}", path.display(), e);
                    continue;
                }
            };

            let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
            let file = FileRecord::in_dir(dir, name, metadata.len(), modified);

            progress.bytes_discovered.fetch_add(file.size, Ordering::SeqCst);
            progress.files_queued.fetch_add(1, Ordering::SeqCst);
            let _ = file_tx.send(file);
            progress.peak_backlog.fetch_max(progress.backlog(), Ordering::SeqCst);
        }
    }

    /// Check the lower-cased extension against the allow-set
    fn is_media_file(&self, name: &str) -> bool {
        match Path::new(name).extension() {
            Some(ext) => {
                let ext = format!(".{}", ext.to_string_lossy().to_lowercase());
                self.extensions.contains(&ext)
            }
            None => false,
        }
    }
}

fn report_progress(progress: &Progress, bar: &ProgressBar, done: &Receiver<()>) {
    let ticker = tick(REPORT_INTERVAL);
    loop {
        select! {
            recv(ticker) -> _ => {
                bar.set_message(progress.message());
                bar.tick();
            }
            recv(done) -> _ => return,
        }
    }
}

/// Hash one queued file and hand it to the result queue
fn hash_step(file: FileRecord, results: &Sender<FileRecord>, progress: &Progress) {
    if progress.dirs_remaining.load(Ordering::SeqCst) > 0 {
        progress.hashed_while_listing.fetch_add(1, Ordering::SeqCst);
    }
    if let Some(file) = hash_record(file) {
        progress.files_hashed.fetch_add(1, Ordering::SeqCst);
        let _ = results.send(file);
    }
    progress.files_finished.fetch_add(1, Ordering::SeqCst);
}

/// Hash the record's file, or log and drop it on failure
fn hash_record(mut file: FileRecord) -> Option<FileRecord> {
    match hash_file(&file.path) {
        Ok(hash) => {
            file.hash = Some(hash);
            Some(file)
        }
        Err(e) => {
            warn!("Dropping {}: {:#}", file.path.display(), e);
            None
        }
    }
}

/// Calculate the BLAKE3 hash of a file's content as lower-case hex
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("Failed to open file {}", path.display()))?;

    let mut hasher = Hasher::new();
    let mut buffer = vec![0; READ_BUFFER];

    loop {
        let bytes_read = file.read(&mut buffer)
            .with_context(|| format!("Failed to read file {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
