//! Permission names granted to provisioned test roles.

use crate::error::{HarnessError, Result};
use std::collections::BTreeSet;
use std::fmt;

pub const ORDERS_READ: &str = "orders_read";
pub const ORDERS_CREATE: &str = "orders_create";
pub const ORDERS_UPDATE: &str = "orders_update";
pub const ORDERS_DELETE: &str = "orders_delete";
pub const ROLES_READ: &str = "roles_read";
pub const ROLES_CREATE: &str = "roles_create";
pub const ROLES_UPDATE: &str = "roles_update";
pub const ROLES_DELETE: &str = "roles_delete";
pub const USERS_READ: &str = "users_read";
pub const USERS_CREATE: &str = "users_create";

/// A validated, de-duplicated set of permission names.
///
/// Names are lowercase ASCII letters, digits and underscores. The server
/// decides what a name means; this type only keeps malformed names from
/// reaching it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn new<I, S>(permissions: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for permission in permissions {
            let name = permission.as_ref().trim();
            validate_name(name)?;
            set.insert(name.to_string());
        }
        Ok(Self(set))
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().collect();
        write!(f, "[{}]", names.join(", "))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HarnessError::Config(
            "permission name must not be empty".to_string(),
        ));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(HarnessError::Config(format!(
            "invalid permission name: {:?}",
            name
        )));
    }
    Ok(())
}
