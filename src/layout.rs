use std::path::{Path, PathBuf};

use crate::config::DateLayout;
use crate::utils::{hash_prefix, local_time};
use crate::FileRecord;

/// Where a file lands under the destination root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub dir: PathBuf,
    pub path: PathBuf,
}

/// Builds destination paths from ordered folder segments
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    date_layout: DateLayout,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, date_layout: DateLayout) -> Self {
        Self {
            root: root.into(),
            date_layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder segments below the root: the tags then the subfolder, or the
    /// optional mapped folder then the date folders.
    pub fn segments(&self, file: &FileRecord) -> Vec<String> {
        let mut segments = Vec::new();

        if !file.tags.is_empty() {
            segments.extend(file.tags.iter().cloned());
            segments.push(file.subfolder.clone());
        } else {
            if let Some(mapped) = &file.mapped {
                segments.push(mapped.clone());
            }
            segments.extend(self.date_segments(file));
        }

        segments.retain(|s| !s.is_empty());
        segments
    }

    fn date_segments(&self, file: &FileRecord) -> Vec<String> {
        let date = local_time(file.modified);
        let mut segments = vec![date.format("%Y").to_string(), date.format("%m").to_string()];
        if self.date_layout == DateLayout::YearMonthDay {
            segments.push(date.format("%d").to_string());
        }
        segments
    }

    /// Primary placement for a file
    pub fn place(&self, file: &FileRecord) -> Placement {
        let mut dir = self.root.clone();
        for segment in self.segments(file) {
            dir.push(segment);
        }
        let path = dir.join(&file.name);
        Placement { dir, path }
    }

    /// Placement used when the primary path is already taken: one more folder
    /// named from the start of the content hash
    pub fn fallback(&self, primary: &Placement, file: &FileRecord) -> Placement {
        let dir = primary.dir.join(hash_prefix(file.hash()));
        let path = dir.join(&file.name);
        Placement { dir, path }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::time::SystemTime;

    fn file(tags: &[&str], mapped: Option<&str>) -> FileRecord {
        let modified: SystemTime = Local.with_ymd_and_hms(2021, 4, 9, 10, 30, 0).unwrap().into();
        FileRecord {
            name: "a.jpg".to_string(),
            path: PathBuf::from("/src/Family/beach/a.jpg"),
            subfolder: "beach".to_string(),
            hash: Some("0123456789abcdef".to_string()),
            modified,
            size: 3,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            mapped: mapped.map(str::to_string),
        }
    }

    #[test]
    fn test_tagged_file_uses_tags_and_subfolder() {
        let layout = Layout::new("/dest", DateLayout::YearMonth);
        let placement = layout.place(&file(&["Family", "Trips"], Some("Phone")));
        assert_eq!(placement.dir, PathBuf::from("/dest/Family/Trips/beach"));
        assert_eq!(placement.path, PathBuf::from("/dest/Family/Trips/beach/a.jpg"));
    }

    #[test]
    fn test_untagged_file_uses_date() {
        let layout = Layout::new("/dest", DateLayout::YearMonth);
        assert_eq!(layout.place(&file(&[], None)).path, PathBuf::from("/dest/2021/04/a.jpg"));

        let daily = Layout::new("/dest", DateLayout::YearMonthDay);
        assert_eq!(daily.place(&file(&[], None)).path, PathBuf::from("/dest/2021/04/09/a.jpg"));
    }

    #[test]
    fn test_mapped_folder_nests_date() {
        let layout = Layout::new("/dest", DateLayout::YearMonth);
        assert_eq!(
            layout.segments(&file(&[], Some("Phone"))),
            vec!["Phone".to_string(), "2021".to_string(), "04".to_string()]
        );
    }

    #[test]
    fn test_fallback_adds_hash_folder() {
        let layout = Layout::new("/dest", DateLayout::YearMonth);
        let f = file(&["Family"], None);
        let primary = layout.place(&f);
        let fallback = layout.fallback(&primary, &f);
        assert_eq!(fallback.path, PathBuf::from("/dest/Family/beach/0123456789/a.jpg"));
    }
}
