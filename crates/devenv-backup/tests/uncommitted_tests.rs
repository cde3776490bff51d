//! Uncommitted-work detection and trunk immutability

mod common;

use common::*;
use devenv_backup::{FakeChange, ManifestBuilder, PreparationStep};
use std::collections::BTreeSet;

/// One repository per case, each with its default workspace on the head change
fn machine_with_cases() -> (Machine, Vec<(&'static str, bool)>) {
    let machine = Machine::new();
    let cases: Vec<(&str, FakeChange, bool, bool)> = vec![
        // (name, head, head on trunk, expected is_uncommitted)
        ("empty", FakeChange::new("e1"), false, false),
        ("described", FakeChange::new("d1").described("WIP: parser"), false, true),
        ("modified", FakeChange::new("m1").modified(), false, true),
        (
            "trunk-described",
            FakeChange::new("t1").described("release").modified(),
            true,
            false,
        ),
        (
            "bookmarked",
            FakeChange::new("b1").described("feature").with_bookmark("feat"),
            false,
            true,
        ),
    ];

    let mut expected = Vec::new();
    for (name, head, on_trunk, uncommitted) in cases {
        let id = head.change_id.clone();
        machine.repo(
            name,
            &format!("https://github.com/dev/{}.git", name),
            vec![(head, on_trunk)],
            &id,
        );
        expected.push((name, uncommitted));
    }
    (machine, expected)
}

#[tokio::test]
async fn test_uncommitted_matches_content_and_trunk() {
    let (machine, expected) = machine_with_cases();
    let manifest = ManifestBuilder::new(machine.vcs.clone(), machine.root.clone(), "laptop")
        .include_files(false)
        .build()
        .await
        .unwrap();

    for (name, uncommitted) in expected {
        let repo = manifest
            .repository(name)
            .unwrap_or_else(|| panic!("repository {} missing", name));
        assert_eq!(
            repo.workspaces[0].is_uncommitted, uncommitted,
            "is_uncommitted for {}",
            name
        );
    }

    let flagged: BTreeSet<&str> = manifest
        .uncommitted
        .iter()
        .map(|c| c.repository.as_str())
        .collect();
    assert_eq!(
        flagged,
        BTreeSet::from(["bookmarked", "described", "modified"])
    );
}

#[tokio::test]
async fn test_preparation_never_targets_trunk() {
    let machine = Machine::new();
    let repo = machine.repo(
        "app",
        "https://github.com/dev/app.git",
        vec![
            (FakeChange::new("trunk1").described("v1").modified().pushed(), true),
            (
                FakeChange::new("wip1").modified().with_parent("trunk1"),
                false,
            ),
            (
                FakeChange::new("wip2").described("more").with_parent("wip1"),
                false,
            ),
        ],
        "wip2",
    );
    machine.workspace(&repo, "app-hotfix", "hotfix", "trunk1");

    let manifest = ManifestBuilder::new(machine.vcs.clone(), machine.root.clone(), "laptop")
        .include_files(false)
        .build()
        .await
        .unwrap();

    let hotfix = manifest
        .repository("app")
        .unwrap()
        .workspaces
        .iter()
        .find(|w| w.name == "hotfix")
        .unwrap();
    assert!(!hotfix.is_uncommitted);

    let steps = manifest.preparation_steps();
    assert!(!steps.is_empty());
    assert!(steps.iter().all(|s| s.change_id() != "trunk1"));

    let targeted: BTreeSet<&str> = steps.iter().map(PreparationStep::change_id).collect();
    assert_eq!(targeted, BTreeSet::from(["wip1", "wip2"]));

    // wip1 is undescribed and unbookmarked: describe, bookmark, push
    let wip1: Vec<String> = steps
        .iter()
        .filter(|s| s.change_id() == "wip1")
        .map(ToString::to_string)
        .collect();
    assert_eq!(wip1.len(), 3);
    assert!(wip1[2].starts_with("jj git push"));
}
