//! Integration tests for the querylens binary

use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn query_log(lines: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}

fn n_plus_one_log(authors: u32) -> NamedTempFile {
    let mut lines = vec![
        r#"{"statement": "SELECT * FROM posts LIMIT 20", "duration_us": 900, "stack": [{"function": "app::views::index", "file": "src/views.rs", "line": 12}], "unit_of_work": "req-1"}"#
            .to_string(),
    ];
    for id in 0..authors {
        lines.push(format!(
            r#"{{"statement": "SELECT * FROM authors WHERE id = {id}", "params": [{id}], "duration_us": 120, "stack": [{{"function": "app::views::author", "file": "src/views.rs", "line": 31}}], "unit_of_work": "req-{unit}"}}"#,
            id = id,
            unit = id % 2
        ));
    }
    query_log(&lines)
}

#[test]
fn test_json_report() {
    let log = n_plus_one_log(8);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("querylens");
    cmd.arg("--scope").arg("session").arg("--input").arg(log.path()).arg("--format").arg("json");

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["format_version"], "1");
    assert_eq!(report["summary"]["total_queries"], 9);
    assert_eq!(report["findings"][0]["kind"], "DUPLICATE_QUERY");
    assert_eq!(
        report["findings"][0]["entries"][0]["normalized_shape"],
        "select * from authors where id = ?"
    );
    assert_eq!(report["findings"][0]["entries"][0]["count"], 8);
}

#[test]
fn test_text_report() {
    let log = n_plus_one_log(8);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("querylens");
    cmd.arg("--scope").arg("session").arg("--input").arg(log.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Query Profile Summary"))
        .stdout(predicate::str::contains("select * from authors where id = ?"))
        .stdout(predicate::str::contains("Findings (1):"))
        .stdout(predicate::str::contains("app::views::author (src/views.rs:31)"));
}

#[test]
fn test_unit_of_work_scope_flag() {
    // 8 lookups split over two requests: 4 each, under the default threshold of 5
    let log = n_plus_one_log(8);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("querylens");
    cmd.arg("--input")
        .arg(log.path())
        .arg("--scope")
        .arg("unit-of-work");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No findings."));
}

#[test]
fn test_threshold_overrides() {
    let log = n_plus_one_log(3);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("querylens");
    cmd.arg("--scope")
        .arg("session")
        .arg("--input")
        .arg(log.path())
        .arg("--duplicate-threshold")
        .arg("2")
        .arg("--slow-threshold-ms")
        .arg("0")
        .arg("--format")
        .arg("json");

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let kinds: Vec<&str> = report["findings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["DUPLICATE_QUERY", "SLOW_QUERY", "SLOW_QUERY"]);
}

#[test]
fn test_config_file() {
    let log = n_plus_one_log(3);
    let mut config = NamedTempFile::new().unwrap();
    writeln!(config, "duplicate_threshold = 2").unwrap();
    writeln!(config, "slow_query_threshold_ms = 1000").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("querylens");
    cmd.arg("--scope")
        .arg("session")
        .arg("--input")
        .arg(log.path())
        .arg("--config")
        .arg(config.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Findings (1):"));
}

#[test]
fn test_invalid_config_fails() {
    let log = n_plus_one_log(1);
    let mut config = NamedTempFile::new().unwrap();
    writeln!(config, "duplicate_threshold = 0").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("querylens");
    cmd.arg("--scope")
        .arg("session")
        .arg("--input")
        .arg(log.path())
        .arg("--config")
        .arg(config.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("duplicate_threshold"));
}

#[test]
fn test_scope_must_be_chosen() {
    let log = n_plus_one_log(8);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("querylens");
    cmd.arg("--input").arg(log.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--scope"));
}

#[test]
fn test_malformed_log_reports_line() {
    let log = query_log(&[
        r#"{"statement": "SELECT 1", "duration_us": 5}"#.to_string(),
        "not json".to_string(),
    ]);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("querylens");
    cmd.arg("--scope").arg("session").arg("--input").arg(log.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_missing_input_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("querylens");
    cmd.arg("--scope").arg("session").arg("--input").arg("/nonexistent/queries.jsonl");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read query log"));
}

#[test]
fn test_empty_log() {
    let log = query_log(&[]);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("querylens");
    cmd.arg("--scope").arg("session").arg("--input").arg(log.path()).arg("--format").arg("json");

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["summary"]["total_queries"], 0);
    assert_eq!(report["entries"].as_array().unwrap().len(), 0);
    assert_eq!(report["findings"].as_array().unwrap().len(), 0);
}
