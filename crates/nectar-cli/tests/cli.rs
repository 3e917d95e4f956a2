//! End-to-end tests for the nectar binary.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::PathBuf;
use std::process::Command as StdCommand;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn nectar() -> Command {
    let mut cmd = Command::cargo_bin("nectar").unwrap();
    cmd.env_remove("NECTAR_MODULE_PATH");
    cmd
}

/// Compile the core crate's fixture module into `dir`, returning its name.
fn build_fixture(dir: &TempDir) -> Option<String> {
    let name = "sum_module_cli".to_string();
    let source = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../nectar-core/tests/fixtures/sum_module.rs");
    let output = dir
        .path()
        .join(format!("{}{}{}", DLL_PREFIX, name, DLL_SUFFIX));

    let built = StdCommand::new("rustc")
        .args(["--edition", "2021", "--crate-type", "cdylib", "--crate-name"])
        .arg(&name)
        .arg("-o")
        .arg(&output)
        .arg(&source)
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if !built {
        eprintln!("Skipping: could not compile {}", source.display());
        return None;
    }
    Some(name)
}

#[test]
fn test_help_lists_commands() {
    nectar()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("info"))
        .stdout(predicate::str::contains("eval"));
}

#[test]
fn test_missing_module_shows_hint() {
    let dir = TempDir::new().unwrap();
    nectar()
        .args(["info", "--module", "nowhere", "--function", "sum", "--search-dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("module not found: nowhere"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_invalid_config_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("nectar.json");
    std::fs::write(&config, "{ not json").unwrap();

    nectar()
        .args(["eval", "--module", "nowhere", "--function", "sum", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration value"));
}

#[test]
fn test_info_and_eval_on_real_module() {
    let dir = TempDir::new().unwrap();
    let Some(module) = build_fixture(&dir) else {
        return;
    };

    nectar()
        .args(["info", "--function", "sum", "--json", "--module", &module, "--search-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"input_dimension\": 2"))
        .stdout(predicate::str::contains("a + b"));

    nectar()
        .args(["eval", "--function", "sum", "--repeat", "2", "--module", &module, "--search-dir"])
        .arg(dir.path())
        .write_stdin("[[1, 2], [3, 4], [1, 2]]")
        .assert()
        .success()
        .stdout(predicate::str::contains("[[3.0],[7.0],[3.0]]"))
        .stderr(predicate::str::contains("\"foreign_calls\":2"));

    nectar()
        .args(["eval", "--function", "sum", "--workers", "2", "--module", &module, "--search-dir"])
        .arg(dir.path())
        .write_stdin("[[0.5, 0.25], [1, 1]]")
        .assert()
        .success()
        .stdout(predicate::str::contains("[[0.75],[2.0]]"));
}
