#![cfg(unix)]

mod common;

use std::fs;
use std::path::Path;

#[test]
fn merge_and_total() {
    let (cli, _tools) = common::fake_tools();
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.info");
    let b = dir.path().join("b.info");
    fs::write(&a, "TN:\nend_of_record\n").unwrap();
    fs::write(&b, "TN:\nend_of_record\n").unwrap();

    let merged = cli.merge(&[a, b], dir.path()).unwrap();
    assert_eq!(merged, dir.path().join("merged.info"));
    assert_eq!(fs::read_to_string(&merged).unwrap(), "merged tracefile\n");

    let total = cli.total_coverage(&merged).unwrap();
    assert!((total - 82.5).abs() < f64::EPSILON);
}

#[test]
fn summary_drops_banner() {
    let (cli, _tools) = common::fake_tools();
    let summary = cli.summarize(Path::new("whatever.info")).unwrap();
    assert!(summary.starts_with("Summary coverage rate:"));
    assert!(!summary.contains("Reading tracefile"));
}

#[test]
fn list_detail_keeps_header_and_rows() {
    let (cli, _tools) = common::fake_tools();
    let rows = cli.list_detail(Path::new("whatever.info")).unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows[1].starts_with("Filename"));
    assert!(rows[3].starts_with("src/lib.rs"));
    assert!(!rows.iter().any(|r| r.contains("Total:")));
}

#[test]
fn tool_failure_is_fatal() {
    let (cli, _tools) = common::failing_tools();
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.info");
    fs::write(&a, "").unwrap();

    let err = cli.merge(&[a], dir.path()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("lcov"), "unexpected error: {msg}");
    assert!(msg.contains("cannot read tracefile"));
}

#[test]
fn html_report_is_written() {
    let (cli, _tools) = common::fake_tools();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("html");

    cli.generate_html(Path::new("merged.info"), &out, dir.path())
        .unwrap();
    assert!(out.join("index.html").exists());
}
