//! Loose-file and symlink capture
//!
//! Captured files are the non-versioned material that lives next to
//! workspaces: plain files directly in the root, and everything inside a
//! "workspace tree parent" (a directory that holds workspaces without being
//! one itself, e.g. `~/pivot/` holding `default/` and `feature/`).

use crate::discovery::{workspace_paths, DiscoveredRepo};
use crate::filters::should_skip_dir;
use crate::manifest::{sha256_hex, CapturedFile, SymlinkEntry};
use camino::{Utf8Path, Utf8PathBuf};
use devenv_core::paths::{is_path_under_root, normalize, to_key_path};
use devenv_core::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Files above this size are not captured
pub const FILE_MAX_SIZE: u64 = 10 * 1024 * 1024;

/// Leading bytes inspected for NUL when detecting binary files
pub const BINARY_CHECK_SIZE: usize = 8192;

/// Directories containing workspaces without being one
pub fn workspace_tree_parents(root: &Utf8Path, workspaces: &BTreeSet<Utf8PathBuf>) -> BTreeSet<Utf8PathBuf> {
    workspaces
        .iter()
        .filter_map(|ws| ws.parent())
        .filter(|parent| {
            *parent != root
                && parent.starts_with(root)
                && !workspaces.contains(*parent)
                && !parent.join(".jj").exists()
        })
        .map(Utf8Path::to_path_buf)
        .collect()
}

/// Collect captured files and symlinks under `root`
///
/// `root` must be canonical. Both lists come back sorted by path.
pub fn discover_files(
    root: &Utf8Path,
    repos: &[DiscoveredRepo],
) -> Result<(Vec<CapturedFile>, Vec<SymlinkEntry>)> {
    let workspaces = workspace_paths(repos);
    let mut files: BTreeMap<String, CapturedFile> = BTreeMap::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let Some(path) = Utf8Path::from_path(&entry.path()).map(Utf8Path::to_path_buf) else {
            continue;
        };
        capture_file(root, &path, &mut files);
    }

    for parent in workspace_tree_parents(root, &workspaces) {
        collect_tree_parent(root, &parent, &workspaces, &mut files)?;
    }

    let symlinks = collect_symlinks(root, &workspaces);
    debug!(
        "Captured {} files and {} symlinks under {}",
        files.len(),
        symlinks.len(),
        root
    );
    Ok((files.into_values().collect(), symlinks))
}

fn collect_tree_parent(
    root: &Utf8Path,
    parent: &Utf8Path,
    workspaces: &BTreeSet<Utf8PathBuf>,
    files: &mut BTreeMap<String, CapturedFile>,
) -> Result<()> {
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let Some(path) = Utf8Path::from_path(&entry.path()).map(Utf8Path::to_path_buf) else {
            continue;
        };
        if workspaces.contains(&path) {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_file() {
            capture_file(root, &path, files);
        } else if file_type.is_dir() && !path.file_name().is_some_and(|n| n.starts_with('.')) {
            collect_directory(root, &path, workspaces, files);
        }
    }
    Ok(())
}

fn collect_directory(
    root: &Utf8Path,
    dir: &Utf8Path,
    workspaces: &BTreeSet<Utf8PathBuf>,
    files: &mut BTreeMap<String, CapturedFile>,
) {
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name_ok = e.file_name().to_str().is_some_and(|n| !should_skip_dir(n));
            name_ok
                && Utf8Path::from_path(e.path()).is_some_and(|p| !workspaces.contains(p))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry under {}: {}", dir, e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(path) = Utf8Path::from_path(entry.path()) {
            capture_file(root, path, files);
        }
    }
}

/// Add `path` when it passes the capture filters; unreadable files are skipped
fn capture_file(root: &Utf8Path, path: &Utf8Path, files: &mut BTreeMap<String, CapturedFile>) {
    if path.file_name().is_none_or(|name| name.starts_with('.')) {
        return;
    }
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if !meta.file_type().is_file() || meta.len() > FILE_MAX_SIZE {
        return;
    }
    let Ok(rel) = path.strip_prefix(root) else {
        return;
    };
    let key = to_key_path(rel);
    if files.contains_key(&key) {
        return;
    }

    match fs::read(path) {
        Ok(content) => {
            if is_binary(&content) {
                trace!("Skipping binary file {}", path);
                return;
            }
            files.insert(
                key.clone(),
                CapturedFile {
                    path: key,
                    size: content.len() as u64,
                    content_hash: sha256_hex(&content),
                },
            );
        }
        Err(e) => debug!("Skipping unreadable file {}: {}", path, e),
    }
}

fn is_binary(content: &[u8]) -> bool {
    content.iter().take(BINARY_CHECK_SIZE).any(|b| *b == 0)
}

/// Symlinks whose link and resolved target both live under `root`
///
/// Workspace internals and top-level dot entries (managed by the dotfiles
/// installer) are not recorded. Targets are stored root-relative.
pub fn collect_symlinks(root: &Utf8Path, workspaces: &BTreeSet<Utf8PathBuf>) -> Vec<SymlinkEntry> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            e.file_name().to_str().is_some_and(|n| !should_skip_dir(n))
                && Utf8Path::from_path(e.path()).is_some_and(|p| !workspaces.contains(p))
        });

    let mut links = Vec::new();
    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.path_is_symlink() {
            continue;
        }
        let Some(link) = Utf8Path::from_path(entry.path()) else {
            continue;
        };
        let Ok(rel) = link.strip_prefix(root) else {
            continue;
        };
        if rel
            .components()
            .next()
            .is_some_and(|c| c.as_str().starts_with('.'))
        {
            continue;
        }

        let Ok(raw_target) = fs::read_link(link) else {
            continue;
        };
        let Ok(raw_target) = Utf8PathBuf::try_from(raw_target) else {
            continue;
        };
        let resolved = match link.parent() {
            Some(parent) if raw_target.is_relative() => normalize(&parent.join(&raw_target)),
            _ => normalize(&raw_target),
        };
        if !is_path_under_root(&resolved, root) {
            trace!("Skipping symlink {} pointing outside the root", link);
            continue;
        }
        let Ok(target) = resolved.strip_prefix(root) else {
            continue;
        };
        if target.as_str().is_empty() {
            continue;
        }

        links.push(SymlinkEntry {
            path: to_key_path(rel),
            target: to_key_path(target),
        });
    }
    links.sort_by(|a, b| a.path.cmp(&b.path));
    links
}
