use std::cmp::Ordering;
use std::collections::HashMap;
use log::debug;
use rayon::prelude::*;

use crate::utils::date_stamp;
use crate::FileRecord;

/// Partition hashed files by content hash. Unhashed records are skipped.
pub fn group_by_hash(files: &[FileRecord]) -> HashMap<String, Vec<FileRecord>> {
    let mut groups: HashMap<String, Vec<FileRecord>> = HashMap::new();
    for file in files {
        let Some(hash) = &file.hash else {
            continue;
        };
        groups.entry(hash.clone()).or_default().push(file.clone());
    }
    groups
}

/// Pick the files to write from every hash group. Groups run in parallel;
/// each group is decided on a single thread.
pub fn select_all(groups: HashMap<String, Vec<FileRecord>>) -> Vec<FileRecord> {
    groups
        .into_par_iter()
        .flat_map_iter(|(_, group)| select_canonical(group))
        .collect()
}

/// Order candidates so the best home for the content comes first: more root
/// tags, then a mapped folder, then the newest modification time. The path
/// settles anything left so the order is total.
pub fn rank(a: &FileRecord, b: &FileRecord) -> Ordering {
    b.tags
        .len()
        .cmp(&a.tags.len())
        .then_with(|| b.has_mapped().cmp(&a.has_mapped()))
        .then_with(|| b.modified.cmp(&a.modified))
        .then_with(|| a.path.cmp(&b.path))
}

/// Decide which members of one hash group get written and under what name.
///
/// All members have the same content. A member whose name is already taken
/// by a better ranked member with the same modification time is a leftover
/// copy and is dropped. One with a different modification time is kept,
/// renamed with its date and moved next to the member that took the name.
pub fn select_canonical(mut group: Vec<FileRecord>) -> Vec<FileRecord> {
    if group.len() <= 1 {
        return group;
    }

    group.sort_by(rank);

    let mut selected: Vec<FileRecord> = Vec::with_capacity(group.len());
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for file in group {
        let Some(&index) = by_name.get(&file.name) else {
            debug!("Selecting {} as {}", file.path.display(), file.name);
            by_name.insert(file.name.clone(), selected.len());
            selected.push(file);
            continue;
        };

        let accepted = &selected[index];
        if accepted.modified == file.modified {
            debug!(
                "Skipping {}: same modification time as {}",
                file.path.display(),
                accepted.path.display()
            );
            continue;
        }

        let renamed = FileRecord {
            name: format!("{}_{}", date_stamp(file.modified), file.name),
            subfolder: accepted.subfolder.clone(),
            tags: accepted.tags.clone(),
            mapped: accepted.mapped.clone(),
            ..file
        };

        if by_name.contains_key(&renamed.name) {
            debug!("Skipping {}: {} is already taken", renamed.path.display(), renamed.name);
            continue;
        }

        debug!(
            "Selecting {} as {} next to {}",
            renamed.path.display(),
            renamed.name,
            accepted.path.display()
        );
        by_name.insert(renamed.name.clone(), selected.len());
        selected.push(renamed);
    }

    selected
}
