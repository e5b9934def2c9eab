use std::collections::BTreeSet;

use serde::Serialize;

use crate::types::Permission;

/// Immutable snapshot of the permission names a user holds, directly or
/// through roles. Two grants of the same name count once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EffectivePermissions(BTreeSet<String>);

impl EffectivePermissions {
    #[must_use]
    pub fn compute(direct: &[Permission], via_roles: &[Permission]) -> Self {
        Self(
            direct
                .iter()
                .chain(via_roles)
                .map(|p| p.name.clone())
                .collect(),
        )
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for EffectivePermissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn perm(id: i64, name: &str) -> Permission {
        Permission {
            id,
            name: name.to_string(),
            guard_name: "web".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_union_is_deduplicated() {
        let direct = [perm(1, "notes.view")];
        let via_roles = [perm(1, "notes.view"), perm(2, "notes.create")];

        let effective = EffectivePermissions::compute(&direct, &via_roles);
        assert_eq!(effective.len(), 2);
        assert_eq!(
            effective.iter().collect::<Vec<_>>(),
            ["notes.create", "notes.view"]
        );
    }

    #[test]
    fn test_dedup_is_by_name_not_row() {
        // Same name reached through two different rows.
        let effective =
            EffectivePermissions::compute(&[perm(1, "files.view")], &[perm(7, "files.view")]);
        assert_eq!(effective.len(), 1);
        assert!(effective.contains("files.view"));
        assert!(!effective.contains("files.delete"));
    }

    #[test]
    fn test_empty() {
        let effective = EffectivePermissions::compute(&[], &[]);
        assert!(effective.is_empty());
        assert!(!effective.contains("notes.view"));
    }

    #[test]
    fn test_serializes_as_sorted_list() {
        let effective: EffectivePermissions = ["b.view", "a.view"].into_iter().collect();
        assert_eq!(
            serde_json::to_string(&effective).unwrap(),
            r#"["a.view","b.view"]"#
        );
    }
}
