//! Locate jj repositories and their secondary workspaces under a root
//!
//! A directory holding `.jj/repo` as a directory is a primary repository.
//! When `.jj/repo` is a file it is a secondary workspace, and the file names
//! the primary's store (absolute, or relative to the `.jj` directory).

use crate::filters::should_skip_dir;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A primary repository and the secondary workspaces attached to its store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRepo {
    /// Directory of the default workspace
    pub path: Utf8PathBuf,
    /// Canonical `.jj/repo` store
    pub store: Utf8PathBuf,
    /// Secondary workspace directories, sorted
    pub workspaces: Vec<Utf8PathBuf>,
}

/// Walk `root` for repositories, pruning skipped and dot directories
///
/// The walk does not descend into a workspace once found. Secondary
/// workspaces whose primary lies outside the walk are dropped with a warning.
pub fn discover_repositories(root: &Utf8Path) -> Vec<DiscoveredRepo> {
    let mut primaries: BTreeMap<Utf8PathBuf, Utf8PathBuf> = BTreeMap::new();
    let mut secondaries: Vec<(Utf8PathBuf, Utf8PathBuf)> = Vec::new();

    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.file_type().is_dir()
                && (e.depth() == 0
                    || e.file_name().to_str().is_some_and(|name| !should_skip_dir(name)))
        });

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry during discovery: {}", e);
                continue;
            }
        };
        let Some(dir) = Utf8Path::from_path(entry.path()) else {
            debug!("Skipping non UTF-8 path {:?}", entry.path());
            continue;
        };

        let jj_dir = dir.join(".jj");
        if !jj_dir.is_dir() {
            continue;
        }
        walker.skip_current_dir();

        let repo_marker = jj_dir.join("repo");
        if repo_marker.is_dir() {
            match repo_marker.canonicalize_utf8() {
                Ok(store) => {
                    primaries.insert(store, dir.to_path_buf());
                }
                Err(e) => warn!("Cannot resolve store of {}: {}", dir, e),
            }
        } else if repo_marker.is_file() {
            match resolve_primary_store(&jj_dir) {
                Some(store) => secondaries.push((dir.to_path_buf(), store)),
                None => warn!("Cannot resolve the repository backing workspace {}", dir),
            }
        }
    }

    let mut repos: BTreeMap<Utf8PathBuf, DiscoveredRepo> = primaries
        .into_iter()
        .map(|(store, path)| {
            (
                store.clone(),
                DiscoveredRepo {
                    path,
                    store,
                    workspaces: Vec::new(),
                },
            )
        })
        .collect();

    for (workspace, store) in secondaries {
        match repos.get_mut(&store) {
            Some(repo) => repo.workspaces.push(workspace),
            None => warn!(
                "Workspace {} belongs to a repository outside the scanned root ({})",
                workspace, store
            ),
        }
    }

    let mut repos: Vec<DiscoveredRepo> = repos.into_values().collect();
    for repo in &mut repos {
        repo.workspaces.sort();
    }
    repos.sort_by(|a, b| a.path.cmp(&b.path));
    repos
}

/// Read a secondary workspace's `.jj/repo` file and canonicalize the store it names
fn resolve_primary_store(jj_dir: &Utf8Path) -> Option<Utf8PathBuf> {
    let content = std::fs::read_to_string(jj_dir.join("repo")).ok()?;
    let target = Utf8Path::new(content.trim());
    if target.as_str().is_empty() {
        return None;
    }
    let target = if target.is_absolute() {
        target.to_path_buf()
    } else {
        jj_dir.join(target)
    };
    target.canonicalize_utf8().ok()
}

/// Every workspace directory, primary and secondary
pub fn workspace_paths(repos: &[DiscoveredRepo]) -> BTreeSet<Utf8PathBuf> {
    repos
        .iter()
        .flat_map(|repo| std::iter::once(repo.path.clone()).chain(repo.workspaces.iter().cloned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_primary(path: &Utf8Path) {
        fs::create_dir_all(path.join(".jj/repo")).unwrap();
    }

    fn make_secondary(path: &Utf8Path, primary: &Utf8Path) {
        fs::create_dir_all(path.join(".jj")).unwrap();
        fs::write(path.join(".jj/repo"), primary.join(".jj/repo").as_str()).unwrap();
    }

    #[test]
    fn test_discovers_primary_and_workspaces() {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().canonicalize_utf8().unwrap();

        make_primary(&root.join("pivot/default"));
        make_secondary(&root.join("pivot/feature"), &root.join("pivot/default"));
        make_primary(&root.join("tools"));
        // Nested inside a workspace: never reached
        make_primary(&root.join("tools/vendor/inner"));
        // Pruned directories
        make_primary(&root.join("node_modules/pkg"));
        make_primary(&root.join(".config/thing"));
        make_primary(&root.join(".dotfiles"));

        let repos = discover_repositories(&root);
        let paths: Vec<&Utf8PathBuf> = repos.iter().map(|r| &r.path).collect();
        assert_eq!(
            paths,
            vec![&root.join(".dotfiles"), &root.join("pivot/default"), &root.join("tools")]
        );

        let pivot = &repos[1];
        assert_eq!(pivot.workspaces, vec![root.join("pivot/feature")]);
        assert_eq!(workspace_paths(&repos).len(), 4);
    }

    #[test]
    fn test_relative_store_reference() {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().canonicalize_utf8().unwrap();
        make_primary(&root.join("repo"));
        fs::create_dir_all(root.join("repo-ws/.jj")).unwrap();
        fs::write(root.join("repo-ws/.jj/repo"), "../../repo/.jj/repo").unwrap();

        let repos = discover_repositories(&root);
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].workspaces, vec![root.join("repo-ws")]);
    }

    #[test]
    fn test_orphan_workspace_is_dropped() {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().canonicalize_utf8().unwrap();
        fs::create_dir_all(root.join("orphan/.jj")).unwrap();
        fs::write(root.join("orphan/.jj/repo"), "/does/not/exist/.jj/repo").unwrap();

        assert!(discover_repositories(&root).is_empty());
    }
}
