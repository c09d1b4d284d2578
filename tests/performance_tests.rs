use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::NamedTempFile;

mod common;

#[test]
fn test_large_batch() {
    let input = NamedTempFile::new().unwrap();
    common::generate_requests_csv(input.path(), 2000).expect("Failed to generate CSV");

    Command::new(cargo_bin!("payledger"))
        .arg(input.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("bulk,0,2001"));
}
