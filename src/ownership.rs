//! Per-owner silo checks for notes, files and folders.

use crate::error::{Error, Result};
use crate::types::{FileItem, Folder, FolderKind, Note, UserId};

pub trait Owned {
    fn owner_id(&self) -> UserId;
}

impl Owned for Note {
    fn owner_id(&self) -> UserId {
        self.owner_id
    }
}

impl Owned for FileItem {
    fn owner_id(&self) -> UserId {
        self.owner_id
    }
}

impl Owned for Folder {
    fn owner_id(&self) -> UserId {
        self.owner_id
    }
}

/// Fails with `Forbidden` unless `actor` owns `resource`. Holding a
/// permission never substitutes for ownership.
pub fn assert_owner<T: Owned>(resource: &T, actor: UserId) -> Result<()> {
    if resource.owner_id() == actor {
        return Ok(());
    }
    tracing::debug!(
        "Denied access to resource owned by {} for user {}",
        resource.owner_id(),
        actor
    );
    Err(Error::forbidden("you do not own this resource"))
}

/// Unwraps a lookup result and checks ownership: missing → `NotFound`,
/// foreign → `Forbidden`.
pub fn owned<T: Owned>(resource: Option<T>, actor: UserId) -> Result<T> {
    let resource = resource.ok_or(Error::NotFound)?;
    assert_owner(&resource, actor)?;
    Ok(resource)
}

/// Validates a folder referenced by id as a target (an item's folder or a
/// folder's parent). A folder of another owner or kind is reported as
/// `NotFound`, the same as a missing one.
pub fn referenced_folder(folder: Option<Folder>, kind: FolderKind, actor: UserId) -> Result<Folder> {
    match folder {
        Some(folder) if folder.owner_id == actor && folder.kind == kind => Ok(folder),
        _ => Err(Error::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn note(owner_id: UserId) -> Note {
        Note {
            id: 1,
            owner_id,
            folder_id: None,
            title: "t".to_string(),
            content: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn folder(owner_id: UserId, kind: FolderKind) -> Folder {
        Folder {
            id: 4,
            kind,
            owner_id,
            parent_id: None,
            name: "f".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_assert_owner() {
        assert!(assert_owner(&note(2), 2).is_ok());
        assert!(matches!(assert_owner(&note(2), 3), Err(Error::Forbidden(_))));
    }

    #[test]
    fn test_owned() {
        assert_eq!(owned(Some(note(2)), 2).unwrap().owner_id, 2);
        assert!(matches!(owned(Some(note(2)), 1), Err(Error::Forbidden(_))));
        assert!(matches!(owned::<Note>(None, 1), Err(Error::NotFound)));
    }

    #[test]
    fn test_referenced_folder() {
        let ok = referenced_folder(Some(folder(2, FolderKind::Files)), FolderKind::Files, 2);
        assert!(ok.is_ok());

        let foreign = referenced_folder(Some(folder(3, FolderKind::Files)), FolderKind::Files, 2);
        assert!(matches!(foreign, Err(Error::NotFound)));

        let wrong_kind = referenced_folder(Some(folder(2, FolderKind::Notes)), FolderKind::Files, 2);
        assert!(matches!(wrong_kind, Err(Error::NotFound)));

        assert!(matches!(
            referenced_folder(None, FolderKind::Notes, 2),
            Err(Error::NotFound)
        ));
    }
}
