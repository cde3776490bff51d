//! Shared fixtures for devenv-backup integration tests
//!
//! A [`Machine`] is a temporary root directory plus a [`FakeVcs`] whose
//! repositories are also laid out on disk, so discovery finds them.

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use devenv_backup::manifest::DEFAULT_WORKSPACE;
use devenv_backup::{FakeChange, FakeVcs};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

pub const URL_A: &str = "https://github.com/dev/repoA.git";
pub const URL_B: &str = "https://github.com/dev/repoB.git";
pub const URL_C: &str = "git@github.com:dev/repoC.git";

pub const BACKUP_NAME: &str = "2026-10-16";

pub struct Machine {
    _dir: TempDir,
    pub root: Utf8PathBuf,
    pub vcs: Arc<FakeVcs>,
}

impl Machine {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        Self {
            _dir: dir,
            root,
            vcs: Arc::new(FakeVcs::new()),
        }
    }

    /// Primary clone at `rel` whose default workspace is on `head`
    pub fn repo(&self, rel: &str, url: &str, changes: Vec<(FakeChange, bool)>, head: &str) -> Utf8PathBuf {
        let path = self.root.join(rel);
        fs::create_dir_all(path.join(".jj/repo")).unwrap();
        self.vcs.add_repo(path.clone(), &[("origin", url)]);
        for (change, on_trunk) in changes {
            self.vcs.add_change(&path, change, on_trunk);
        }
        self.vcs.set_head(&path, DEFAULT_WORKSPACE, head);
        path
    }

    /// Secondary workspace of `repo` at `rel`, on `head`
    pub fn workspace(&self, repo: &Utf8Path, rel: &str, name: &str, head: &str) -> Utf8PathBuf {
        let path = self.root.join(rel);
        fs::create_dir_all(path.join(".jj")).unwrap();
        fs::write(path.join(".jj/repo"), repo.join(".jj/repo").as_str()).unwrap();
        self.vcs.add_workspace_at(repo, path.clone(), name, head);
        path
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    /// Serve this machine's repositories to clones on `other`
    pub fn publish_to(&self, other: &Machine, repos: &[(&str, &str)]) {
        for (rel, url) in repos {
            other
                .vcs
                .publish(*url, self.vcs.remote_snapshot(&self.root.join(rel)));
        }
    }
}

/// The two-repository machine: `repoA` on trunk change `aaa1`; `repoB` with
/// its default workspace on trunk and a `feature` workspace on WIP `bbb2`
pub fn scenario_machine() -> Machine {
    let machine = Machine::new();
    machine.repo(
        "repoA",
        URL_A,
        vec![(FakeChange::new("aaa1").described("init").modified().pushed(), true)],
        "aaa1",
    );
    let repo_b = machine.repo(
        "repoB",
        URL_B,
        vec![
            (FakeChange::new("bbb1").described("release").modified().pushed(), true),
            (FakeChange::new("bbb2").described("WIP").modified().with_parent("bbb1"), false),
        ],
        "bbb1",
    );
    machine.workspace(&repo_b, "repoB-feature", "feature", "bbb2");
    machine
}

pub const SCENARIO_REPOS: &[(&str, &str)] = &[("repoA", URL_A), ("repoB", URL_B)];
