//! Path filters for discovery and session mirroring
//!
//! - Directories pruned while walking the root for repositories and files
//! - Allow-lists for the Claude Code and OpenCode session mirrors
//! - Paths that are never mirrored regardless of the allow-list

use devenv_core::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Directory names never descended into
pub const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".cache",
    "target",
    "dist",
    ".cargo",
    ".rustup",
    ".mise",
    ".local",
    ".npm",
    ".bun",
    "go",
    ".gradle",
    ".m2",
];

/// Dot-directories that are still searched
pub const ALLOWED_DOT_DIRS: &[&str] = &[".dotfiles"];

/// Claude Code paths mirrored, relative to the claude dir
pub const CLAUDE_SYNC_PATTERNS: &[&str] = &[
    ".claude.json",
    ".claude.json.backup",
    "history.jsonl",
    "projects/**",
    "plans/**",
    "todos/**",
    "file-history/**",
    "plugins/installed_plugins.json",
    "plugins/known_marketplaces.json",
];

/// OpenCode storage subtrees mirrored
pub const OPENCODE_SYNC_PATTERNS: &[&str] = &[
    "session/**",
    "message/**",
    "part/**",
    "project/**",
    "todo/**",
];

/// Never mirrored, even when an allow-list pattern matches
pub const NEVER_SYNC: &[&str] = &[".credentials.json", "**/.credentials.json"];

/// Whether a directory named `name` is pruned from discovery walks
pub fn should_skip_dir(name: &str) -> bool {
    if ALLOWED_DOT_DIRS.contains(&name) {
        return false;
    }
    SKIP_DIRS.contains(&name) || name.starts_with('.')
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::invalid_config(format!("Invalid sync pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::invalid_config(format!("Failed to build sync globset: {}", e)))
}

/// Allow-list for one session mirror
#[derive(Debug, Clone)]
pub struct SessionFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl SessionFilter {
    pub fn new(patterns: &[&str]) -> Result<Self> {
        Ok(Self {
            include: build_globset(patterns)?,
            exclude: build_globset(NEVER_SYNC)?,
        })
    }

    pub fn claude() -> Result<Self> {
        Self::new(CLAUDE_SYNC_PATTERNS)
    }

    pub fn opencode() -> Result<Self> {
        Self::new(OPENCODE_SYNC_PATTERNS)
    }

    /// Checks a path relative to the mirrored directory
    pub fn matches(&self, rel_path: impl AsRef<Path>) -> bool {
        let rel_path = rel_path.as_ref();
        !self.exclude.is_match(rel_path) && self.include.is_match(rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_skip_dir() {
        assert!(should_skip_dir("node_modules"));
        assert!(should_skip_dir("target"));
        assert!(should_skip_dir(".git"));
        assert!(should_skip_dir(".jj"));
        assert!(!should_skip_dir(".dotfiles"));
        assert!(!should_skip_dir("projects"));
    }

    #[test]
    fn test_claude_filter() {
        let filter = SessionFilter::claude().unwrap();
        assert!(filter.matches(".claude.json"));
        assert!(filter.matches("history.jsonl"));
        assert!(filter.matches("projects/-home-dev-repo/abc.jsonl"));
        assert!(filter.matches("plugins/installed_plugins.json"));

        assert!(!filter.matches(".credentials.json"));
        assert!(!filter.matches("projects/.credentials.json"));
        assert!(!filter.matches("settings.json"));
        assert!(!filter.matches("plugins/cache/some-plugin.js"));
        assert!(!filter.matches("projectsx/file"));
    }

    #[test]
    fn test_opencode_filter() {
        let filter = SessionFilter::opencode().unwrap();
        assert!(filter.matches("session/abc/info.json"));
        assert!(filter.matches("part/msg_1/part_2.json"));
        assert!(!filter.matches("snapshot/abc"));
        assert!(!filter.matches("session"));
    }
}
