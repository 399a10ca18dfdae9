use std::collections::HashMap;
use std::path::{Component, Path};

/// Tags derived from the segments of a directory path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTags {
    /// Every root tag matched, in path order
    pub tags: Vec<String>,
    /// First folder mapping matched while descending
    pub mapped: Option<String>,
}

/// Match each path segment, case-insensitively, against the root and mapping
/// lookups. A path may carry several root tags but only one mapping.
pub fn tag_path(
    path: &Path,
    roots: &HashMap<String, String>,
    mappings: &HashMap<String, String>,
) -> PathTags {
    let mut result = PathTags::default();

    for component in path.components() {
        let Component::Normal(segment) = component else {
            continue;
        };
        let segment = segment.to_string_lossy().to_lowercase();

        if let Some(tag) = roots.get(&segment) {
            result.tags.push(tag.clone());
        }

        if result.mapped.is_none() {
            result.mapped = mappings.get(&segment).cloned();
        }
    }

    result
}
