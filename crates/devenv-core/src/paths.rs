//! Root-relative path safety
//!
//! Manifests store every path relative to a root (usually `$HOME`). Nothing
//! recorded in a manifest may point outside that root once joined.

use crate::error::{Error, Result};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Check that `rel` is a plain relative path: non-empty, not absolute, no `..`
pub fn validate_relative_path(rel: &str) -> Result<&Utf8Path> {
    let path = Utf8Path::new(rel);
    if rel.is_empty() {
        return Err(Error::invalid_path(rel, "path is empty"));
    }
    for component in path.components() {
        match component {
            Utf8Component::Normal(_) | Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                return Err(Error::invalid_path(rel, "path traversal is not allowed"))
            }
            Utf8Component::RootDir | Utf8Component::Prefix(_) => {
                return Err(Error::invalid_path(rel, "absolute paths are not allowed"))
            }
        }
    }
    Ok(path)
}

/// Join a validated relative path onto `root`, refusing anything that escapes it
pub fn resolve_under_root(root: &Utf8Path, rel: &str) -> Result<Utf8PathBuf> {
    let rel = validate_relative_path(rel)?;
    let joined = root.join(rel);
    if !is_path_under_root(&joined, root) {
        return Err(Error::invalid_path(
            rel.as_str(),
            format!("resolves outside {}", root),
        ));
    }
    Ok(joined)
}

/// Containment check that follows symlinks for the part of `path` that exists
///
/// The deepest existing ancestor is canonicalized and must live under the
/// canonical root; the non-existing remainder is checked lexically.
pub fn is_path_under_root(path: &Utf8Path, root: &Utf8Path) -> bool {
    let normalized = normalize(path);
    let root_normalized = normalize(root);
    if !normalized.starts_with(&root_normalized) {
        return false;
    }

    let Ok(canonical_root) = root.canonicalize_utf8() else {
        return true;
    };

    let mut existing = normalized.as_path();
    while !existing.exists() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return true,
        }
    }
    match existing.canonicalize_utf8() {
        Ok(canonical) => canonical.starts_with(&canonical_root),
        Err(_) => false,
    }
}

/// Lexically collapse `.` and `..` without touching the filesystem
pub fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

/// Relative target for a symlink at `link` pointing at `target` (both absolute)
pub fn relative_link_target(link: &Utf8Path, target: &Utf8Path) -> Utf8PathBuf {
    let from = normalize(link.parent().unwrap_or(Utf8Path::new("/")));
    let to = normalize(target);

    let from_parts: Vec<&str> = from.components().map(|c| c.as_str()).collect();
    let to_parts: Vec<&str> = to.components().map(|c| c.as_str()).collect();
    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = Utf8PathBuf::new();
    for _ in common..from_parts.len() {
        rel.push("..");
    }
    for part in &to_parts[common..] {
        rel.push(part);
    }
    if rel.as_str().is_empty() {
        rel.push(".");
    }
    rel
}

/// Object-store key form of a relative path (always `/`-separated)
pub fn to_key_path(rel: &Utf8Path) -> String {
    rel.components()
        .filter(|c| !matches!(c, Utf8Component::CurDir))
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/")
}
