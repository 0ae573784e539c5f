use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::Id;
use super::configuration::ConfigurationVersion;

/// A named configuration within a directory with its version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationInfo {
    pub directory_id: Id,
    pub directory_path: String,
    pub name: String,
    /// Ascending by version number.
    pub versions: Vec<ConfigurationVersion>,
    pub locked_by: Option<String>,
}

impl ConfigurationInfo {
    /// Full name in `dir/name` form.
    pub fn full_name(&self) -> String {
        join_path(&self.directory_path, &self.name)
    }

    pub fn latest(&self) -> Option<&ConfigurationVersion> {
        self.versions.last()
    }

    pub fn version(&self, version: i32) -> Option<&ConfigurationVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    pub id: Id,
    pub parent_id: Option<Id>,
    pub name: String,
    /// Absolute path, `/` for the root.
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub children: Vec<Directory>,
    pub configurations: Vec<ConfigurationInfo>,
}

impl Directory {
    /// Finds a directory by absolute path below (and including) this one.
    pub fn find(&self, path: &str) -> Option<&Directory> {
        let wanted = normalize_path(path);
        if self.path == wanted {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(&wanted))
    }

    pub fn find_by_id(&self, id: Id) -> Option<&Directory> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_id(id))
    }

    /// Depth-first iteration over every configuration in the subtree.
    pub fn all_configurations(&self) -> Vec<&ConfigurationInfo> {
        let mut out: Vec<&ConfigurationInfo> = self.configurations.iter().collect();
        for child in &self.children {
            out.extend(child.all_configurations());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.configurations.is_empty()
    }
}

/// Joins a directory path and a leaf name with a single `/`.
pub fn join_path(directory: &str, name: &str) -> String {
    format!("{}/{}", directory.trim_end_matches('/'), name)
}

/// Strips trailing slashes and ensures a leading one.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{}", trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_join_and_normalize() {
        assert_eq!(join_path("/", "cfg"), "/cfg");
        assert_eq!(join_path("/Group", "MyConfig"), "/Group/MyConfig");
        assert_eq!(normalize_path("Group/Sub/"), "/Group/Sub");
        assert_eq!(normalize_path("/"), "/");
    }
}
