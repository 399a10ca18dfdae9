use std::path::Path;
use std::fs;
use std::time::SystemTime;
use anyhow::{Result, Context};
use chrono::{DateTime, Local};
use humansize::{format_size, DECIMAL};

/// Hex characters of the content hash used for collision folders
pub const HASH_PREFIX_LEN: usize = 10;

/// Format file size in human-readable format
pub fn format_file_size(size: u64) -> String {
    format_size(size, DECIMAL)
}

/// Modification time in the local time zone
pub fn local_time(time: SystemTime) -> DateTime<Local> {
    DateTime::<Local>::from(time)
}

/// `YYYYMMDD` stamp used to rename colliding duplicates
pub fn date_stamp(time: SystemTime) -> String {
    local_time(time).format("%Y%m%d").to_string()
}

/// Leading characters of a content hash
pub fn hash_prefix(hash: &str) -> &str {
    match hash.char_indices().nth(HASH_PREFIX_LEN) {
        Some((end, _)) => &hash[..end],
        None => hash,
    }
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
    }
    Ok(())
}

/// Number of components in a path
pub fn path_depth(path: &Path) -> usize {
    path.components().count()
}

/// Format duration in human-readable format
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}.{:03}s", secs, duration.subsec_millis())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
