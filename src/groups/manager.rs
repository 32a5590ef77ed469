//! In-memory group registry.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::workloads::validate_name;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Member workload names.
    pub members: BTreeSet<String>,
    /// Set once a cascade delete has started; the group takes no new members.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleting: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("group {0} already exists")]
    AlreadyExists(String),

    #[error("group {0} not found")]
    NotFound(String),

    #[error("group {0} is being deleted")]
    Deleting(String),

    #[error("invalid group name: {reason}")]
    InvalidName { name: String, reason: String },
}

/// Registry of groups. Each group entry is updated under its own shard lock.
#[derive(Debug, Clone, Default)]
pub struct GroupManager {
    groups: Arc<DashMap<String, Group>>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: &str) -> Result<Group, GroupError> {
        validate_name(name).map_err(|reason| GroupError::InvalidName {
            name: name.to_string(),
            reason,
        })?;

        match self.groups.entry(name.to_string()) {
            Entry::Occupied(_) => Err(GroupError::AlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                let group = Group {
                    name: name.to_string(),
                    created_at: Utc::now(),
                    members: BTreeSet::new(),
                    deleting: false,
                };
                slot.insert(group.clone());
                tracing::info!(group = %name, "Group created");
                Ok(group)
            }
        }
    }

    /// Create `name` unless it already exists.
    pub fn ensure(&self, name: &str) -> Result<Group, GroupError> {
        match self.create(name) {
            Err(GroupError::AlreadyExists(_)) => self.get(name).ok_or_else(|| GroupError::NotFound(name.to_string())),
            other => other,
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Group> {
        self.groups.get(name).map(|g| g.clone())
    }

    /// All groups, sorted by name.
    pub fn list(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = self.groups.iter().map(|g| g.value().clone()).collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    /// Member names; empty for an unknown or empty group.
    pub fn list_workloads_in_group(&self, name: &str) -> Vec<String> {
        self.groups
            .get(name)
            .map(|g| g.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn add_workload(&self, group: &str, workload: &str) -> Result<(), GroupError> {
        let mut entry = self
            .groups
            .get_mut(group)
            .ok_or_else(|| GroupError::NotFound(group.to_string()))?;
        if entry.deleting {
            return Err(GroupError::Deleting(group.to_string()));
        }
        entry.members.insert(workload.to_string());
        Ok(())
    }

    /// Stop `name` from taking new members and return the members it has.
    ///
    /// Joins that raced ahead are in the returned set; later ones fail with
    /// [`GroupError::Deleting`]. `None` if the group does not exist.
    pub fn close(&self, name: &str) -> Option<Vec<String>> {
        let mut entry = self.groups.get_mut(name)?;
        entry.deleting = true;
        Some(entry.members.iter().cloned().collect())
    }

    /// Drop `workload` from `group`; a missing group or member is not an error.
    pub fn remove_workload(&self, group: &str, workload: &str) {
        if let Some(mut entry) = self.groups.get_mut(group) {
            entry.members.remove(workload);
        }
    }

    /// Remove the group record only. Absent groups are not an error.
    pub fn delete(&self, name: &str) -> Option<Group> {
        let removed = self.groups.remove(name).map(|(_, g)| g);
        if let Some(group) = &removed {
            tracing::info!(group = %name, members = group.members.len(), "Group deleted");
        }
        removed
    }
}
