use assert_cmd::Command;
use calib_guide::io::SessionConfig;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("calib-guide")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init-config"))
        .stdout(predicate::str::contains("simulate"));
}

#[test]
fn init_config_writes_loadable_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.json");
    Command::cargo_bin("calib-guide")
        .expect("binary")
        .args(["init-config", "--out"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote"));

    let cfg = SessionConfig::load_json(&path).expect("config");
    assert_eq!(cfg.guidance.min_pts_initial, 27);
    assert_eq!(cfg.guidance.min_pts_active, 15);
    assert_eq!(cfg.calibrator.translation_scale, 10.0);
    assert_eq!(cfg.board.cols, 9);
}

#[test]
fn simulate_reports_missing_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    Command::cargo_bin("calib-guide")
        .expect("binary")
        .args(["simulate", "--config"])
        .arg(dir.path().join("missing.json"))
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error:"));
}
