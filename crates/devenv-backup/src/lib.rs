//! devenv backup engine
//!
//! Captures the state of every jj repository and workspace under a root
//! directory into a versioned [`Manifest`], ships it (with loose files and
//! agent session transcripts) to object storage, and restores it on a clean
//! machine.
//!
//! # Features
//!
//! ## Backup
//! - **Workspace enumeration**: every workspace's current change, with
//!   uncommitted work detected against the remote trunk
//! - **Loose files and symlinks**: small text files outside repositories
//! - **Idempotent upload**: unchanged files are never re-sent; the manifest is
//!   written last so an interrupted backup is detectably incomplete
//! - **Session mirrors**: Claude Code and OpenCode transcripts
//!
//! ## Restore
//! - Sequential across repositories, parallel across a repository's workspaces
//! - Per-repository and per-workspace failures are collected, never fatal
//!
//! # Examples
//!
//! ```no_run
//! use devenv_backup::{build_manifest, JjCli};
//! use camino::Utf8Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> devenv_core::Result<()> {
//!     let manifest = build_manifest(Arc::new(JjCli::new()), Utf8Path::new("/home/dev"), true).await?;
//!     println!("{}", manifest.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod discovery;
pub mod enumerator;
pub mod files;
pub mod filters;
pub mod manifest;
pub mod restore;
pub mod sessions;
pub mod sync;
pub mod vcs;

pub use builder::{build_manifest, ManifestBuilder};
pub use discovery::{discover_repositories, DiscoveredRepo};
pub use enumerator::{Enumeration, WorkspaceEnumerator};
pub use manifest::{
    CapturedFile, Manifest, ManifestVersion, PreparationStep, RepositoryEntry, SymlinkEntry,
    UncommittedChange, WorkspaceEntry,
};
pub use restore::{RestoreOptions, RestoreOrchestrator, RestoreReport, WorkspaceAction};
pub use sessions::{parse_sessions_after, MirrorReport, SessionKind, SessionMirror};
pub use sync::{BackupSummary, DownloadedBackup, SyncEngine, UploadOptions, UploadReport};
pub use vcs::{FakeChange, FakeRemote, FakeVcs, JjCli, Vcs, VcsError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
