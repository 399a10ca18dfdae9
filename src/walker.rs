use std::path::PathBuf;
use log::warn;
use walkdir::{DirEntry, WalkDir};

use crate::config::JobConfig;
use crate::tagger::tag_path;
use crate::DirRecord;

/// Visit every source tree and produce a record for each directory that is
/// not pruned by the ignore set. Empty directories are included; files are
/// not looked at.
pub fn walk_sources(config: &JobConfig) -> Vec<DirRecord> {
    let mut dirs = Vec::new();

    for source in &config.sources {
        let walker = WalkDir::new(source)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_ignored(e, config));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            dirs.push(dir_record(entry.into_path(), config));
        }
    }

    dirs
}

fn is_ignored(entry: &DirEntry, config: &JobConfig) -> bool {
    entry.file_type().is_dir()
        && config
            .ignore
            .contains(&entry.file_name().to_string_lossy().to_lowercase())
}

fn dir_record(path: PathBuf, config: &JobConfig) -> DirRecord {
    let tags = tag_path(&path, &config.roots, &config.mappings);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    DirRecord {
        name,
        path,
        mapped: tags.mapped,
        tags: tags.tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_walk_includes_empty_dirs_and_prunes_ignored() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Family/2020/01")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::create_dir_all(root.join("Thumbs/inner")).unwrap();
        fs::write(root.join("Family/2020/01/a.jpg"), b"a").unwrap();

        let config = JobConfig::new(vec![root.to_path_buf()], "/unused")
            .with_roots(&["family"])
            .with_ignore(&["thumbs"]);
        let dirs = walk_sources(&config);

        let paths: Vec<_> = dirs.iter().map(|d| d.path.clone()).collect();
        assert!(paths.contains(&root.to_path_buf()));
        assert!(paths.contains(&root.join("empty")));
        assert!(paths.contains(&root.join("Family/2020/01")));
        assert!(!paths.iter().any(|p| p.starts_with(root.join("Thumbs"))));
        assert_eq!(dirs.len(), 5);

        let month = dirs.iter().find(|d| d.path == root.join("Family/2020/01")).unwrap();
        assert_eq!(month.name, "01");
        assert_eq!(month.tags, vec!["family".to_string()]);
    }

    #[test]
    fn test_walk_multiple_sources() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        fs::create_dir(b.path().join("sub")).unwrap();

        let config = JobConfig::new(vec![a.path().to_path_buf(), b.path().to_path_buf()], "/unused");
        let dirs = walk_sources(&config);
        assert_eq!(dirs.len(), 3);
    }
}
