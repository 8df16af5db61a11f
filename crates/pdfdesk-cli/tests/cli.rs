use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn pdfdesk(config_home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pdfdesk").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home)
        .env("HOME", config_home);
    cmd
}

#[test]
fn config_init_get_set() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("desk.json");
    let config_arg = config.to_str().unwrap();

    pdfdesk(dir.path())
        .args(["--config", config_arg, "config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));
    assert!(config.exists());

    pdfdesk(dir.path())
        .args(["--config", config_arg, "config", "get", "ocr.language"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"jpn+eng\""));

    pdfdesk(dir.path())
        .args(["--config", config_arg, "config", "set", "ocr.jobs", "4"])
        .assert()
        .success();

    pdfdesk(dir.path())
        .args(["--config", config_arg, "config", "get", "ocr.jobs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4"));

    pdfdesk(dir.path())
        .args(["--config", config_arg, "config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn config_path_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("absent.json");

    pdfdesk(dir.path())
        .args(["--config", config.to_str().unwrap(), "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("absent.json"))
        .stdout(predicate::str::contains("not created"));
}

#[test]
fn state_override_writes_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let document = dir.path().join("scan.pdf");
    fs::write(&document, "").unwrap();

    pdfdesk(dir.path())
        .args(["state", document.to_str().unwrap(), "skipped"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped"));

    let sidecar = fs::read_to_string(dir.path().join("scan_side.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&sidecar).unwrap();
    assert_eq!(json["ocr"], "skipped");

    pdfdesk(dir.path())
        .args(["status", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped"))
        .stdout(predicate::str::contains("scan.pdf"));
}

#[test]
fn state_rejects_automatic_states() {
    let dir = tempfile::tempdir().unwrap();
    let document = dir.path().join("scan.pdf");
    fs::write(&document, "").unwrap();

    pdfdesk(dir.path())
        .args(["state", document.to_str().unwrap(), "done"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be set manually"));
    assert!(!dir.path().join("scan_side.json").exists());

    pdfdesk(dir.path())
        .args(["state", document.to_str().unwrap(), "finished"])
        .assert()
        .failure();
}

#[test]
fn batch_skips_by_name_and_writes_summary() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("contract_skip.pdf"), "").unwrap();
    let summary = dir.path().join("summary.csv");

    pdfdesk(dir.path())
        .args([
            "batch",
            "--quiet",
            dir.path().to_str().unwrap(),
            "--summary",
            summary.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped_by_name: 1"));

    let csv = fs::read_to_string(&summary).unwrap();
    assert!(csv.starts_with("path,status,detail,persistence_error"));
    assert!(csv.contains("contract_skip.pdf,skipped_by_name"));
    assert!(!dir.path().join("contract_skip_side.json").exists());
}

#[test]
fn status_lists_pending_folders() {
    let dir = tempfile::tempdir().unwrap();
    let site = dir.path().join("site-a");
    fs::create_dir(&site).unwrap();
    fs::write(site.join("scan.pdf"), "").unwrap();
    fs::write(
        site.join("scan_side.json"),
        r#"{"type": "image_pdf", "created_at": "2024-01-01 09:00:00", "ocr": "unprocessed"}"#,
    )
    .unwrap();

    pdfdesk(dir.path())
        .args(["status", "--pending", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 pending"))
        .stdout(predicate::str::contains("scan.pdf"));
}

#[test]
fn classify_record_continues_past_sidecar_errors() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.pdf"), "").unwrap();
    fs::write(dir.path().join("b.pdf"), "").unwrap();
    fs::create_dir(dir.path().join("a_side.json")).unwrap();

    pdfdesk(dir.path())
        .args(["classify", "--record", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("sidecar I/O error"))
        .stdout(predicate::str::contains("b.pdf"));
}

#[test]
fn quiet_help_describes_backend_order() {
    let dir = tempfile::tempdir().unwrap();

    for command in ["ocr", "batch"] {
        pdfdesk(dir.path())
            .args([command, "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("only as its fallback"))
            .stdout(predicate::str::contains("library backend only").not());
    }
}
