use std::collections::{BTreeMap, HashMap};

use crate::error::{ConfDbError, ConsistencyWarning, Loaded, Result, WarningSink};
use crate::model::{join_path, normalize_path, ConfigurationInfo, ConfigurationVersion, Directory, Id};
use crate::store::rows::{ConfigurationRow, DirectoryRow, LockRow};
use crate::store::Store;

impl From<&ConfigurationRow> for ConfigurationVersion {
    fn from(row: &ConfigurationRow) -> Self {
        ConfigurationVersion {
            id: row.id,
            version: row.version,
            created_at: row.created_at,
            creator: row.creator.clone(),
            release_tag: row.release_tag.clone(),
            process_name: row.process_name.clone(),
            comment: row.description.clone(),
        }
    }
}

/// A configuration reference parsed from `dir/name[/Vn]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationPath {
    pub directory: String,
    pub name: String,
    pub version: Option<i32>,
}

/// `V` followed by digits only, the form of a version suffix.
fn is_version_segment(segment: &str) -> bool {
    segment
        .strip_prefix('V')
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

impl ConfigurationPath {
    pub fn parse(full_name: &str) -> Option<Self> {
        let trimmed = full_name.trim().trim_end_matches('/');
        let (rest, version) = match trimmed.rsplit_once('/') {
            Some((rest, last)) if is_version_segment(last) => (rest, Some(last[1..].parse::<i32>().ok()?)),
            _ => (trimmed, None),
        };
        let (directory, name) = match rest.rsplit_once('/') {
            Some((dir, name)) => (normalize_path(dir), name),
            None => ("/".to_string(), rest),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            directory,
            name: name.to_string(),
            version,
        })
    }

    pub fn full_name(&self) -> String {
        join_path(&self.directory, &self.name)
    }

    /// Whether `name` can name a directory or configuration. Names that
    /// read as a version suffix would make `dir/name` ambiguous.
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty() && !name.contains('/') && !is_version_segment(name)
    }
}

/// Absolute paths of all directories reachable from the root.
fn directory_paths(rows: &[DirectoryRow]) -> HashMap<Id, String> {
    let by_id: HashMap<Id, &DirectoryRow> = rows.iter().map(|r| (r.id, r)).collect();
    let mut paths = HashMap::new();
    for row in rows {
        let mut segments = Vec::new();
        let mut current = Some(row);
        let mut steps = 0;
        while let Some(dir) = current {
            let parent = dir.parent_id.and_then(|p| by_id.get(&p).copied());
            if parent.is_none() {
                break;
            }
            segments.push(dir.name.as_str());
            current = parent;
            steps += 1;
            if steps > rows.len() {
                segments.clear();
                break;
            }
        }
        if steps <= rows.len() {
            segments.reverse();
            paths.insert(row.id, format!("/{}", segments.join("/")));
        }
    }
    paths
}

/// Links flat directory rows into a tree by parent id.
///
/// Row order is irrelevant. The root is the single row whose parent does
/// not resolve; rows not reachable from it are reported and skipped.
pub fn build_tree(
    rows: &[DirectoryRow],
    configurations: &[ConfigurationRow],
    locks: &[LockRow],
) -> Result<Loaded<Directory>> {
    const OP: &str = "load directory tree";
    let mut sink = WarningSink::default();
    let ids: HashMap<Id, &DirectoryRow> = rows.iter().map(|r| (r.id, r)).collect();

    let roots: Vec<&DirectoryRow> = rows
        .iter()
        .filter(|r| r.parent_id.map_or(true, |p| !ids.contains_key(&p)))
        .collect();
    let root = match roots.as_slice() {
        [root] => *root,
        [] => return Err(ConfDbError::integrity(OP, "no root directory")),
        many => {
            return Err(ConfDbError::integrity(
                OP,
                format!(
                    "{} directories without resolvable parent: {}",
                    many.len(),
                    many.iter().map(|r| r.id.to_string()).collect::<Vec<_>>().join(", ")
                ),
            ))
        }
    };

    let mut children: HashMap<Id, Vec<&DirectoryRow>> = HashMap::new();
    for row in rows {
        if let Some(parent) = row.parent_id.filter(|p| ids.contains_key(p)) {
            children.entry(parent).or_default().push(row);
        }
    }

    let mut configs: HashMap<Id, BTreeMap<&str, Vec<&ConfigurationRow>>> = HashMap::new();
    for row in configurations {
        configs
            .entry(row.directory_id)
            .or_default()
            .entry(row.name.as_str())
            .or_default()
            .push(row);
    }
    let lock_of: HashMap<(Id, &str), &str> = locks
        .iter()
        .map(|l| ((l.directory_id, l.name.as_str()), l.user.as_str()))
        .collect();

    let mut visited = 0usize;
    let tree = link(root, "/".to_string(), &children, &configs, &lock_of, &mut visited);

    if visited < rows.len() {
        let reachable = collect_ids(&tree);
        for row in rows.iter().filter(|r| !reachable.contains(&r.id)) {
            sink.push(ConsistencyWarning::OrphanDirectory {
                id: row.id,
                name: row.name.clone(),
            });
        }
    }
    Ok(sink.finish(tree))
}

fn link<'r>(
    row: &'r DirectoryRow,
    path: String,
    children: &HashMap<Id, Vec<&'r DirectoryRow>>,
    configs: &HashMap<Id, BTreeMap<&'r str, Vec<&'r ConfigurationRow>>>,
    locks: &HashMap<(Id, &'r str), &'r str>,
    visited: &mut usize,
) -> Directory {
    *visited += 1;
    let mut kids: Vec<Directory> = children
        .get(&row.id)
        .map(|rows| {
            rows.iter()
                .map(|child| {
                    let child_path = join_path(&path, &child.name);
                    link(*child, child_path, children, configs, locks, visited)
                })
                .collect()
        })
        .unwrap_or_default();
    kids.sort_by(|a, b| a.name.cmp(&b.name));

    let configurations = configs
        .get(&row.id)
        .map(|by_name| {
            by_name
                .iter()
                .map(|(name, versions)| {
                    let mut versions: Vec<ConfigurationVersion> =
                        versions.iter().map(|r| ConfigurationVersion::from(*r)).collect();
                    versions.sort_by_key(|v| v.version);
                    ConfigurationInfo {
                        directory_id: row.id,
                        directory_path: path.clone(),
                        name: name.to_string(),
                        versions,
                        locked_by: locks.get(&(row.id, *name)).map(|u| u.to_string()),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Directory {
        id: row.id,
        parent_id: row.parent_id,
        name: row.name.clone(),
        path,
        created_at: row.created_at,
        children: kids,
        configurations,
    }
}

fn collect_ids(dir: &Directory) -> std::collections::HashSet<Id> {
    let mut ids = std::collections::HashSet::new();
    ids.insert(dir.id);
    for child in &dir.children {
        ids.extend(collect_ids(child));
    }
    ids
}

/// Hierarchical namespace of versioned configurations with advisory locks.
pub struct DirectoryManager<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> DirectoryManager<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn load_tree(&self) -> Result<Loaded<Directory>> {
        const OP: &str = "load directory tree";
        let rows = self
            .store
            .list_directories()
            .await
            .map_err(ConfDbError::store(OP))?;
        let configurations = self
            .store
            .list_configurations()
            .await
            .map_err(ConfDbError::store(OP))?;
        let locks = self.store.list_locks().await.map_err(ConfDbError::store(OP))?;
        build_tree(&rows, &configurations, &locks)
    }

    async fn paths(&self, operation: &'static str) -> Result<HashMap<Id, String>> {
        let rows = self
            .store
            .list_directories()
            .await
            .map_err(ConfDbError::store(operation))?;
        Ok(directory_paths(&rows))
    }

    /// Absolute path of a directory.
    pub async fn directory_path(&self, directory_id: Id) -> Result<String> {
        const OP: &str = "resolve directory";
        self.paths(OP)
            .await?
            .remove(&directory_id)
            .ok_or_else(|| ConfDbError::not_found(OP, format!("directory {}", directory_id)))
    }

    /// Directory id for an absolute path.
    pub async fn find_directory(&self, path: &str) -> Result<Id> {
        const OP: &str = "resolve directory";
        let wanted = normalize_path(path);
        self.paths(OP)
            .await?
            .into_iter()
            .find(|(_, p)| *p == wanted)
            .map(|(id, _)| id)
            .ok_or_else(|| ConfDbError::not_found(OP, format!("directory '{}'", wanted)))
    }

    pub async fn create_directory(&self, parent_id: Id, name: &str) -> Result<Directory> {
        const OP: &str = "create directory";
        if !ConfigurationPath::is_valid_name(name) {
            return Err(ConfDbError::integrity(OP, format!("invalid directory name '{}'", name)));
        }
        let parent_path = self.directory_path(parent_id).await.map_err(|_| {
            ConfDbError::integrity(OP, format!("parent directory {} does not exist", parent_id))
        })?;
        let row = self
            .store
            .insert_directory(parent_id, name)
            .await
            .map_err(ConfDbError::store(OP))?;
        log::info!("Created directory {}", join_path(&parent_path, name));
        Ok(Directory {
            id: row.id,
            parent_id: row.parent_id,
            name: row.name,
            path: join_path(&parent_path, name),
            created_at: row.created_at,
            children: Vec::new(),
            configurations: Vec::new(),
        })
    }

    /// Removes a directory that holds neither subdirectories nor
    /// configurations.
    pub async fn remove_directory(&self, directory_id: Id) -> Result<()> {
        const OP: &str = "remove directory";
        let path = self.directory_path(directory_id).await?;
        let removed = self
            .store
            .delete_empty_directory(directory_id)
            .await
            .map_err(ConfDbError::store(OP))?;
        if !removed {
            return Err(ConfDbError::integrity(OP, format!("directory {} is not empty", path)));
        }
        log::info!("Removed directory {}", path);
        Ok(())
    }

    async fn configuration_path(&self, operation: &'static str, directory_id: Id, name: &str) -> Result<String> {
        let directory = self.paths(operation).await?.remove(&directory_id).ok_or_else(|| {
            ConfDbError::integrity(operation, format!("directory {} does not exist", directory_id))
        })?;
        let path = join_path(&directory, name);
        let versions = self
            .store
            .list_versions(directory_id, name)
            .await
            .map_err(ConfDbError::store(operation))?;
        if versions.is_empty() {
            return Err(ConfDbError::not_found(operation, format!("configuration {}", path)));
        }
        Ok(path)
    }

    /// Takes the advisory lock on a configuration for `user`.
    pub async fn lock(&self, directory_id: Id, name: &str, user: &str) -> Result<()> {
        const OP: &str = "lock configuration";
        let path = self.configuration_path(OP, directory_id, name).await?;
        let lock = LockRow {
            directory_id,
            name: name.to_string(),
            user: user.to_string(),
        };
        if self.store.insert_lock(&lock).await.map_err(ConfDbError::store(OP))? {
            log::info!("{} locked {}", user, path);
            return Ok(());
        }
        let holder = self
            .store
            .get_lock(directory_id, name)
            .await
            .map_err(ConfDbError::store(OP))?
            .map(|l| l.user)
            .unwrap_or_default();
        Err(ConfDbError::LockConflict {
            operation: OP,
            path,
            holder,
        })
    }

    /// Releases a lock held by `user`. A lock held by someone else is a
    /// conflict; use `break_lock` to remove it regardless.
    pub async fn unlock(&self, directory_id: Id, name: &str, user: &str) -> Result<()> {
        const OP: &str = "unlock configuration";
        let path = self.configuration_path(OP, directory_id, name).await?;
        let lock = self
            .store
            .get_lock(directory_id, name)
            .await
            .map_err(ConfDbError::store(OP))?
            .ok_or_else(|| ConfDbError::not_found(OP, format!("lock on {}", path)))?;
        if lock.user != user {
            return Err(ConfDbError::LockConflict {
                operation: OP,
                path,
                holder: lock.user,
            });
        }
        self.store
            .delete_lock(directory_id, name)
            .await
            .map_err(ConfDbError::store(OP))?;
        log::info!("{} unlocked {}", user, path);
        Ok(())
    }

    /// Removes a lock without checking its holder. Returns the previous
    /// holder, if any.
    pub async fn break_lock(&self, directory_id: Id, name: &str) -> Result<Option<String>> {
        const OP: &str = "break lock";
        let path = self.configuration_path(OP, directory_id, name).await?;
        let previous = self
            .store
            .get_lock(directory_id, name)
            .await
            .map_err(ConfDbError::store(OP))?;
        self.store
            .delete_lock(directory_id, name)
            .await
            .map_err(ConfDbError::store(OP))?;
        if let Some(lock) = &previous {
            log::warn!("Lock of {} on {} was broken", lock.user, path);
        }
        Ok(previous.map(|l| l.user))
    }

    /// Every configuration as `dir/name`, sorted.
    pub async fn configuration_names(&self) -> Result<Vec<String>> {
        const OP: &str = "list configuration names";
        let paths = self.paths(OP).await?;
        let rows = self
            .store
            .list_configurations()
            .await
            .map_err(ConfDbError::store(OP))?;
        let mut names: Vec<String> = rows
            .iter()
            .filter_map(|r| paths.get(&r.directory_id).map(|dir| join_path(dir, &r.name)))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Directory, name and version history of the configuration a version
    /// id belongs to.
    pub async fn configuration_info(&self, configuration_id: Id) -> Result<ConfigurationInfo> {
        const OP: &str = "configuration info";
        let row = self
            .store
            .get_configuration(configuration_id)
            .await
            .map_err(ConfDbError::store(OP))?
            .ok_or_else(|| ConfDbError::not_found(OP, format!("configuration {}", configuration_id)))?;
        self.info_for(OP, row.directory_id, &row.name).await
    }

    async fn info_for(&self, operation: &'static str, directory_id: Id, name: &str) -> Result<ConfigurationInfo> {
        let directory_path = self.paths(operation).await?.remove(&directory_id).ok_or_else(|| {
            ConfDbError::integrity(operation, format!("directory {} does not exist", directory_id))
        })?;
        let versions = self
            .store
            .list_versions(directory_id, name)
            .await
            .map_err(ConfDbError::store(operation))?;
        let locked_by = self
            .store
            .get_lock(directory_id, name)
            .await
            .map_err(ConfDbError::store(operation))?
            .map(|l| l.user);
        Ok(ConfigurationInfo {
            directory_id,
            directory_path,
            name: name.to_string(),
            versions: versions.iter().map(ConfigurationVersion::from).collect(),
            locked_by,
        })
    }

    /// Resolves `dir/name[/Vn]` to a configuration info, failing when the
    /// configuration or the requested version does not exist.
    pub async fn resolve(&self, full_name: &str) -> Result<(ConfigurationInfo, Option<i32>)> {
        const OP: &str = "resolve configuration";
        let parsed = ConfigurationPath::parse(full_name)
            .ok_or_else(|| ConfDbError::not_found(OP, format!("configuration '{}'", full_name)))?;
        let directory_id = self.find_directory(&parsed.directory).await?;
        let info = self.info_for(OP, directory_id, &parsed.name).await?;
        if info.versions.is_empty() {
            return Err(ConfDbError::not_found(OP, format!("configuration '{}'", parsed.full_name())));
        }
        Ok((info, parsed.version))
    }

    /// Id of the named version, or of the latest one when no `/Vn` suffix
    /// is given.
    pub async fn resolve_configuration_id(&self, full_name: &str) -> Result<Id> {
        const OP: &str = "resolve configuration";
        let (info, version) = self.resolve(full_name).await?;
        let found = match version {
            Some(v) => info.version(v),
            None => info.latest(),
        };
        found
            .map(|v| v.id)
            .ok_or_else(|| ConfDbError::not_found(OP, format!("configuration '{}'", full_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dir(id: Id, parent: Option<Id>, name: &str) -> DirectoryRow {
        DirectoryRow {
            id,
            parent_id: parent,
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn tree_links_rows_in_any_order() {
        let rows = vec![
            dir(5, Some(3), "Sub"),
            dir(3, Some(1), "Group"),
            dir(4, Some(1), "Another"),
            dir(1, None, "/"),
        ];
        let tree = build_tree(&rows, &[], &[]).unwrap();
        assert!(tree.is_clean());
        let root = tree.value;
        assert_eq!(root.id, 1);
        assert_eq!(root.path, "/");
        let names: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Another", "Group"]);
        assert_eq!(root.find("/Group/Sub").unwrap().id, 5);
    }

    #[test]
    fn root_is_row_with_unresolvable_parent() {
        let rows = vec![dir(2, Some(7), "Group"), dir(9, Some(99), "top")];
        let err = build_tree(&rows, &[], &[]).unwrap_err();
        assert!(matches!(err, ConfDbError::Integrity { .. }));

        let rows = vec![dir(2, Some(9), "Group"), dir(9, Some(99), "top")];
        let tree = build_tree(&rows, &[], &[]).unwrap().value;
        assert_eq!(tree.id, 9);
        assert_eq!(tree.children[0].path, "/Group");
    }

    #[test]
    fn unreachable_rows_are_reported() {
        let rows = vec![dir(1, None, "/"), dir(2, Some(3), "a"), dir(3, Some(2), "b")];
        let tree = build_tree(&rows, &[], &[]).unwrap();
        assert_eq!(tree.warnings.len(), 2);
        assert!(tree.value.children.is_empty());
    }

    #[test]
    fn configuration_paths_parse() {
        let p = ConfigurationPath::parse("/Group/MyConfig/V3").unwrap();
        assert_eq!(p.directory, "/Group");
        assert_eq!(p.name, "MyConfig");
        assert_eq!(p.version, Some(3));

        let p = ConfigurationPath::parse("/MyConfig").unwrap();
        assert_eq!(p.directory, "/");
        assert_eq!(p.version, None);
        assert_eq!(p.full_name(), "/MyConfig");

        let p = ConfigurationPath::parse("/Group/Vx").unwrap();
        assert_eq!(p.name, "Vx");
        assert!(ConfigurationPath::parse("/").is_none());
        assert!(ConfigurationPath::parse("/V3").is_none());

        let p = ConfigurationPath::parse("/V3/MyConfig").unwrap();
        assert_eq!(p.directory, "/V3");
        assert_eq!(p.version, None);
    }

    #[test]
    fn version_like_names_are_invalid() {
        assert!(ConfigurationPath::is_valid_name("MyConfig"));
        assert!(ConfigurationPath::is_valid_name("V"));
        assert!(ConfigurationPath::is_valid_name("V3a"));
        assert!(ConfigurationPath::is_valid_name("v3"));
        assert!(!ConfigurationPath::is_valid_name("V3"));
        assert!(!ConfigurationPath::is_valid_name("V03"));
        assert!(!ConfigurationPath::is_valid_name("a/b"));
        assert!(!ConfigurationPath::is_valid_name(""));
    }
}
