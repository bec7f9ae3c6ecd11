//! Integration tests for bundles on disk and the `retrace` binary

use std::fs::File;
use std::io::Write;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use retrace::archive::TestBundle;
use retrace::model::{MatchStatus, Screenshot};

use super::common::{full_mask, goto_then_click, page, with_changed_pixels};

fn retrace(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("retrace").expect("binary built");
    cmd.arg("--data-dir").arg(data_dir);
    cmd
}

fn write_png(path: &Path, screenshot: &Screenshot) {
    std::fs::write(path, screenshot.to_png_bytes().unwrap()).unwrap();
}

#[test]
fn test_bundle_keeps_results_and_images() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.zip");
    let mut test = goto_then_click(page());
    {
        let click = test.action_mut(1).unwrap();
        click.match_status = MatchStatus::Fail;
        click.actual_screenshot = Some(with_changed_pixels(&page(), 50));
    }

    TestBundle::create(&path, &test).unwrap();
    let opened = TestBundle::open(&path).unwrap();

    assert_eq!(opened.images, 2);
    let click = opened.test.action(1).unwrap();
    assert_eq!(click.match_status, MatchStatus::Fail);
    assert_eq!(click.expected_screenshot.as_ref(), Some(&page()));
    assert_eq!(
        click.actual_screenshot.as_ref(),
        Some(&with_changed_pixels(&page(), 50))
    );
    assert_eq!(opened.test.overall_status(), MatchStatus::Fail);
}

#[test]
fn test_cli_diff_reports_pass_and_fail() {
    let dir = tempfile::tempdir().unwrap();
    let expected = dir.path().join("expected.png");
    let same = dir.path().join("same.png");
    let changed = dir.path().join("changed.png");
    let out = dir.path().join("diff.png");
    write_png(&expected, &page());
    write_png(&same, &page());
    write_png(&changed, &with_changed_pixels(&page(), 50));

    retrace(dir.path())
        .arg("diff")
        .arg(&expected)
        .arg(&same)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("pass: 0 of 480000"));

    retrace(dir.path())
        .arg("diff")
        .arg(&expected)
        .arg(&changed)
        .arg("--out")
        .arg(&out)
        .assert()
        .failure()
        .stdout(predicate::str::contains("fail: 50 of 480000"))
        .stderr(predicate::str::contains("screenshots differ"));
    assert!(out.exists());
}

#[test]
fn test_cli_diff_with_mask_allows() {
    let dir = tempfile::tempdir().unwrap();
    let expected = dir.path().join("expected.png");
    let changed = dir.path().join("changed.png");
    let mask = dir.path().join("mask.png");
    write_png(&expected, &page());
    write_png(&changed, &with_changed_pixels(&page(), 50));
    write_png(&mask, &full_mask(800, 600));

    retrace(dir.path())
        .arg("diff")
        .arg(&expected)
        .arg(&changed)
        .arg("--mask")
        .arg(&mask)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("allow: 0 of 480000 pixels differ (50 masked)"));
}

#[test]
fn test_cli_inspect_lists_actions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.zip");
    TestBundle::create(&path, &goto_then_click(page())).unwrap();

    retrace(dir.path())
        .arg("inspect")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("goto-then-click"))
        .stdout(predicate::str::contains("click"))
        .stdout(predicate::str::contains("expected"));
}

#[test]
fn test_cli_renumber_rewrites_stray_indices() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edited.zip");
    let test = goto_then_click(page());
    let mut json = serde_json::json!({
        "meta": {
            "schema_version": 1,
            "created_at": "2024-01-01T00:00:00Z",
            "app_version": "0.1.0"
        },
        "test": serde_json::to_value(&test).unwrap(),
    });
    json["test"]["actions"][0]["index"] = 4.into();
    {
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("test.json", zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(&serde_json::to_vec(&json).unwrap()).unwrap();
        zip.finish().unwrap();
    }

    retrace(dir.path())
        .arg("renumber")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("renumbered 1 actions"));

    let opened = TestBundle::open(&path).unwrap();
    assert_eq!(opened.renumbered, 0);
    assert_eq!(opened.test.action(0).unwrap().index, 0);

    retrace(dir.path())
        .arg("renumber")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("already contiguous"));
}

#[test]
fn test_cli_finds_bundles_by_name_in_the_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let bundles = dir.path().join("tests");
    std::fs::create_dir_all(&bundles).unwrap();
    TestBundle::create(&bundles.join("flow.zip"), &goto_then_click(page())).unwrap();

    retrace(dir.path())
        .arg("inspect")
        .arg("flow")
        .assert()
        .success()
        .stdout(predicate::str::contains("goto-then-click"));
}

#[test]
fn test_cli_rejects_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    retrace(dir.path())
        .arg("inspect")
        .arg(dir.path().join("nope.zip"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("opening bundle"));
}
