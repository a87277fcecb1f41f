//! Integration coverage for the patch engine against real repositories.

mod common;

use common::*;
use trunkpad::error::Error;
use trunkpad::patch::{ApplyStage, Complexity, PatchEngine, Recommendation};
use trunkpad::store::WorkpadStatus;

#[test]
fn preview_recommends_apply_for_small_clean_patches() {
    let harness = TestCore::new();
    let repo = harness.seed_hello_repo();
    let core = &harness.core;
    let pad = core.store.create_workpad(&repo.id, "preview").unwrap();

    let patch = new_file_patch("small.txt", &["just one line"]);
    let preview = core.patches.preview_patch(&pad.id, &patch).unwrap();
    assert!(preview.conflicts.can_apply);
    assert_eq!(preview.stats.complexity, Complexity::Trivial);
    assert_eq!(preview.recommendation, Recommendation::Apply);
}

#[test]
fn preview_recommends_split_for_sprawling_patches() {
    let harness = TestCore::new();
    let repo = harness.seed_hello_repo();
    let core = &harness.core;
    let pad = core.store.create_workpad(&repo.id, "sprawl").unwrap();

    // 12 files pushes past the moderate bucket.
    let parts: Vec<String> = (0..12)
        .map(|i| new_file_patch(&format!("gen_{i}.txt"), &["x"]))
        .collect();
    let patch = PatchEngine::combine_patches(&parts);
    let preview = core.patches.preview_patch(&pad.id, &patch).unwrap();
    assert_eq!(preview.stats.files_affected, 12);
    assert_eq!(preview.recommendation, Recommendation::Split);
}

#[test]
fn preview_rejects_conflicting_patches() {
    let harness = TestCore::new();
    let repo = harness.seed_hello_repo();
    let core = &harness.core;
    let pad = core.store.create_workpad(&repo.id, "reject").unwrap();

    let patch = replace_line_patch("main.py", "not the real content", "whatever");
    let preview = core.patches.preview_patch(&pad.id, &patch).unwrap();
    assert!(!preview.conflicts.can_apply);
    assert_eq!(preview.recommendation, Recommendation::Reject);
}

#[test]
fn interactive_dry_run_stops_before_applying() {
    let harness = TestCore::new();
    let repo = harness.seed_hello_repo();
    let core = &harness.core;
    let pad = core.store.create_workpad(&repo.id, "dry").unwrap();

    let patch = new_file_patch("maybe.txt", &["tentative"]);
    let outcome = core
        .patches
        .apply_patch_interactive(&pad.id, &patch, "dry run", true)
        .unwrap();

    let stages: Vec<ApplyStage> = outcome.stages.iter().map(|s| s.stage).collect();
    assert_eq!(stages, vec![ApplyStage::Validate, ApplyStage::Preview]);
    assert!(outcome.stages.iter().all(|s| s.ok));
    assert!(outcome.checkpoint_id.is_none());
    assert!(core.store.get_workpad(&pad.id).unwrap().checkpoints.is_empty());
}

#[test]
fn interactive_full_run_creates_a_checkpoint() {
    let harness = TestCore::new();
    let repo = harness.seed_hello_repo();
    let core = &harness.core;
    let pad = core.store.create_workpad(&repo.id, "wet").unwrap();

    let patch = new_file_patch("real.txt", &["committed"]);
    let outcome = core
        .patches
        .apply_patch_interactive(&pad.id, &patch, "apply for real", false)
        .unwrap();

    assert_eq!(outcome.stages.len(), 3);
    assert!(outcome.stages.iter().all(|s| s.ok));
    assert_eq!(outcome.checkpoint_id.as_deref(), Some("t1"));
}

#[test]
fn interactive_run_surfaces_invalid_syntax_without_repo_access() {
    let harness = TestCore::new();
    let repo = harness.seed_hello_repo();
    let core = &harness.core;
    let pad = core.store.create_workpad(&repo.id, "garbage").unwrap();

    let outcome = core
        .patches
        .apply_patch_interactive(&pad.id, "not a patch at all\n", "nope", false)
        .unwrap();
    assert_eq!(outcome.stages.len(), 1);
    assert!(!outcome.stages[0].ok);
    assert!(outcome.checkpoint_id.is_none());
}

#[test]
fn apply_failure_is_retryable_from_clean_state() {
    let harness = TestCore::new();
    let repo = harness.seed_hello_repo();
    let core = &harness.core;
    let pad = core.store.create_workpad(&repo.id, "retry").unwrap();

    // First attempt conflicts and must leave the tree pristine.
    let bad = replace_line_patch("main.py", "wrong context", "x");
    let err = core.patches.apply_patch(&pad.id, &bad, "bad").unwrap_err();
    assert!(matches!(err, Error::PatchConflict { .. }));
    assert!(core.store.get_status(&repo.id, Some(&pad.id)).unwrap().is_clean());

    // A valid patch then applies as if nothing happened.
    let good = replace_line_patch("main.py", "print('hello')", "print('fixed')");
    let checkpoint = core.patches.apply_patch(&pad.id, &good, "good").unwrap();
    assert_eq!(checkpoint, "t1");

    let diff = core.store.get_diff(&pad.id, None).unwrap();
    assert!(diff.contains("+print('fixed')"));
}

#[test]
fn split_and_combine_roundtrip_applies_identically() {
    let harness = TestCore::new();
    let repo = harness.seed_repo(
        "multi",
        &[("one.txt", "alpha\n"), ("two.txt", "beta\n")],
    );
    let core = &harness.core;

    // Build a two-file patch by committing on a pad and reading the diff
    // back out of the engine.
    let author_pad = core.store.create_workpad(&repo.id, "author").unwrap();
    core.patches
        .apply_patch(
            &author_pad.id,
            &PatchEngine::combine_patches(&[
                replace_line_patch("one.txt", "alpha", "alpha prime"),
                replace_line_patch("two.txt", "beta", "beta prime"),
            ]),
            "edit both",
        )
        .unwrap();
    let full_diff = core.store.get_diff(&author_pad.id, None).unwrap();

    // Round-trip: split into per-file diffs, recombine, apply to a fresh pad.
    let split = PatchEngine::split_patch_by_file(&full_diff).unwrap();
    assert_eq!(split.len(), 2);
    let recombined = PatchEngine::combine_patches(&split.values().cloned().collect::<Vec<_>>());

    let replay_pad = core.store.create_workpad(&repo.id, "replay").unwrap();
    core.patches
        .apply_patch(&replay_pad.id, &recombined, "replayed")
        .unwrap();

    let replay_diff = core.store.get_diff(&replay_pad.id, None).unwrap();
    assert_eq!(replay_diff, full_diff);
}

#[test]
fn promoted_pads_no_longer_accept_patches() {
    let harness = TestCore::new();
    let repo = harness.seed_hello_repo();
    let core = &harness.core;
    let pad = core.store.create_workpad(&repo.id, "done").unwrap();
    core.patches
        .apply_patch(&pad.id, &new_file_patch("f.txt", &["1"]), "f")
        .unwrap();
    core.store.promote(&pad.id).unwrap();
    assert_eq!(
        core.store.get_workpad(&pad.id).unwrap().status,
        WorkpadStatus::Promoted
    );

    let err = core
        .patches
        .apply_patch(&pad.id, &new_file_patch("g.txt", &["2"]), "late")
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}
