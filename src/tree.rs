//! Folder forests built from flat, single-owner folder lists.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::Folder;

#[derive(Debug, Clone, Serialize)]
pub struct FolderNode {
    #[serde(flatten)]
    pub folder: Folder,
    pub children: Vec<FolderNode>,
}

/// Groups folders under their parents, roots first, each level sorted by
/// name (case-insensitive). Assumes a valid acyclic forest; folders whose
/// parent is absent from the list are not reachable and are left out.
#[must_use]
pub fn build_forest(folders: Vec<Folder>) -> Vec<FolderNode> {
    let mut children: HashMap<Option<i64>, Vec<usize>> = HashMap::new();
    for (idx, folder) in folders.iter().enumerate() {
        children.entry(folder.parent_id).or_default().push(idx);
    }
    for bucket in children.values_mut() {
        bucket.sort_by(|&a, &b| {
            let (a, b) = (&folders[a], &folders[b]);
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then(a.id.cmp(&b.id))
        });
    }

    materialize(&folders, &children, None)
}

fn materialize(
    folders: &[Folder],
    children: &HashMap<Option<i64>, Vec<usize>>,
    parent: Option<i64>,
) -> Vec<FolderNode> {
    children
        .get(&parent)
        .map(|bucket| {
            bucket
                .iter()
                .map(|&idx| {
                    let folder = folders[idx].clone();
                    let nested = materialize(folders, children, Some(folder.id));
                    FolderNode {
                        folder,
                        children: nested,
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// True if making `new_parent` the parent of `folder_id` would close a loop.
/// An existing loop on the ancestor chain also counts.
#[must_use]
pub fn would_create_cycle(folders: &[Folder], folder_id: i64, new_parent: i64) -> bool {
    let parents: HashMap<i64, Option<i64>> =
        folders.iter().map(|f| (f.id, f.parent_id)).collect();

    let mut visited = HashSet::new();
    let mut current = Some(new_parent);
    while let Some(id) = current {
        if id == folder_id || !visited.insert(id) {
            return true;
        }
        current = parents.get(&id).copied().flatten();
    }
    false
}

/// Rejects a re-parent that would make a folder its own ancestor.
pub fn check_parent(folders: &[Folder], folder_id: i64, new_parent: Option<i64>) -> Result<()> {
    match new_parent {
        Some(parent) if would_create_cycle(folders, folder_id, parent) => Err(Error::validation(
            "a folder cannot be moved inside itself or its descendants",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FolderKind;
    use chrono::Utc;

    fn folder(id: i64, parent_id: Option<i64>, name: &str) -> Folder {
        Folder {
            id,
            kind: FolderKind::Notes,
            owner_id: 1,
            parent_id,
            name: name.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn names(nodes: &[FolderNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.folder.name.as_str()).collect()
    }

    #[test]
    fn test_build_forest_orders_each_level() {
        let forest = build_forest(vec![
            folder(1, None, "work"),
            folder(2, None, "Archive"),
            folder(3, Some(1), "zeta"),
            folder(4, Some(1), "alpha"),
            folder(5, Some(4), "deep"),
        ]);

        assert_eq!(names(&forest), ["Archive", "work"]);
        let work = &forest[1];
        assert_eq!(names(&work.children), ["alpha", "zeta"]);
        assert_eq!(names(&work.children[0].children), ["deep"]);
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn test_build_forest_arbitrary_depth() {
        let chain: Vec<Folder> = (1..=50)
            .map(|i| folder(i, if i == 1 { None } else { Some(i - 1) }, "level"))
            .collect();
        let forest = build_forest(chain);

        let mut depth = 0;
        let mut level = &forest;
        while let Some(node) = level.first() {
            depth += 1;
            level = &node.children;
        }
        assert_eq!(depth, 50);
    }

    #[test]
    fn test_build_forest_empty() {
        assert!(build_forest(Vec::new()).is_empty());
    }

    #[test]
    fn test_cycle_detection() {
        let folders = vec![
            folder(1, None, "a"),
            folder(2, Some(1), "b"),
            folder(3, Some(2), "c"),
            folder(4, None, "d"),
        ];

        assert!(would_create_cycle(&folders, 1, 3));
        assert!(would_create_cycle(&folders, 2, 2));
        assert!(!would_create_cycle(&folders, 3, 4));
        assert!(!would_create_cycle(&folders, 4, 3));

        assert!(check_parent(&folders, 1, Some(2)).is_err());
        assert!(check_parent(&folders, 1, None).is_ok());
    }

    #[test]
    fn test_existing_loop_counts_as_cycle() {
        let folders = vec![folder(1, Some(2), "a"), folder(2, Some(1), "b")];
        assert!(would_create_cycle(&folders, 9, 1));
    }

    #[test]
    fn test_serializes_flat_folder_with_children() {
        let forest = build_forest(vec![folder(1, None, "a"), folder(2, Some(1), "b")]);
        let json = serde_json::to_value(&forest).unwrap();
        assert_eq!(json[0]["name"], "a");
        assert_eq!(json[0]["children"][0]["name"], "b");
    }
}
