use std::time::Instant;
use anyhow::Result;
use log::info;
use serde::Serialize;

use crate::actions::{Cleanup, Copier};
use crate::config::JobConfig;
use crate::dedup::{group_by_hash, select_all};
use crate::layout::Layout;
use crate::scanner::Scanner;
use crate::utils::format_file_size;

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub directories: usize,
    pub files_read: usize,
    pub bytes_discovered: u64,
    pub groups: usize,
    pub selected: usize,
    pub copied: usize,
    pub failed_copies: usize,
    pub bytes_written: u64,
    pub deleted: usize,
    /// Originals kept because a copy of their content failed
    pub kept_sources: usize,
    pub removed_dirs: usize,
    pub dry_run: bool,
    pub elapsed_secs: f64,
}

/// Run a whole job: scan and hash, pick one file per name and content, copy,
/// then optionally remove the originals. Only setup problems are returned as
/// errors; per-file failures are logged and counted.
pub fn run(config: &JobConfig) -> Result<RunSummary> {
    run_with_progress(config, true)
}

pub fn run_with_progress(config: &JobConfig, show_progress: bool) -> Result<RunSummary> {
    config.validate()?;
    let start = Instant::now();

    let mut scanner = Scanner::new(config);
    scanner.set_show_progress(show_progress);
    let scan = scanner.scan_directories(config);
    info!(
        "Read {} files ({}) in {} directories",
        scan.total_files(),
        format_file_size(scan.total_size),
        scan.dirs.len()
    );

    let groups = group_by_hash(&scan.files);
    let group_count = groups.len();
    let selected = select_all(groups);
    info!("{} unique contents, {} files to write", group_count, selected.len());

    let selected_count = selected.len();
    let copier = Copier::new(Layout::new(&config.destination, config.date_layout), config.dry_run);
    let copied = copier.copy_files(selected, config.workers)?;
    info!("Wrote {}", format_file_size(copied.total_bytes));

    let mut summary = RunSummary {
        directories: scan.dirs.len(),
        files_read: scan.total_files(),
        bytes_discovered: scan.total_size,
        groups: group_count,
        selected: selected_count,
        copied: copied.success_count(),
        failed_copies: copied.error_count(),
        bytes_written: copied.total_bytes,
        dry_run: config.dry_run,
        ..Default::default()
    };

    if config.delete {
        let mut cleanup = Cleanup::new(config.dry_run);
        let deleted = cleanup.delete_sources(&scan.files, &copied.failed_hashes());
        let removed = cleanup.clear_empty_directories(&scan.dirs, config.cleanup);
        info!(
            "Deleted {} files, kept {}, removed {} empty directories",
            deleted.success_count(),
            deleted.skipped,
            removed.success_count()
        );
        summary.deleted = deleted.success_count();
        summary.kept_sources = deleted.skipped;
        summary.removed_dirs = removed.success_count();
    }

    summary.elapsed_secs = start.elapsed().as_secs_f64();
    Ok(summary)
}
