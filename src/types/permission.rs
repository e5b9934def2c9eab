use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

const MAX_PERMISSION_NAME_LEN: usize = 120;

/// A permission name of the form `<resource>.<action>`, e.g. `users.view`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PermissionName {
    resource: String,
    action: String,
}

impl PermissionName {
    /// Parses a namespaced permission name.
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("Permission name cannot be empty"));
        }
        if name.len() > MAX_PERMISSION_NAME_LEN {
            return Err(Error::validation(format!(
                "Permission name cannot exceed {MAX_PERMISSION_NAME_LEN} characters"
            )));
        }

        let (resource, action) = name.split_once('.').ok_or_else(|| {
            Error::validation("Permission name must have the form <resource>.<action>")
        })?;

        for segment in [resource, action] {
            if segment.is_empty() || !segment.chars().all(is_segment_char) {
                return Err(Error::validation(
                    "Permission name segments can only contain lowercase letters, digits, and underscores",
                ));
            }
        }

        Ok(Self {
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.action)
    }
}

/// Groups permission names by resource prefix. Names without a prefix land
/// under their own name with no actions.
pub fn group_by_resource<'a, I>(names: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in names {
        match name.split_once('.') {
            Some((resource, action)) => groups
                .entry(resource.to_string())
                .or_default()
                .push(action.to_string()),
            None => {
                groups.entry(name.to_string()).or_default();
            }
        }
    }
    for actions in groups.values_mut() {
        actions.sort();
        actions.dedup();
    }
    groups
}
