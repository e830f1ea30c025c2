//! Integration tests for the azx binary
//!
//! These tests run the built binary with an isolated configuration
//! directory. Tests that need a live storage account are ignored.

use std::process::{Command, Output};
use tempfile::TempDir;

fn azx(config_home: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_azx"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("AZURE_STORAGE_ACCOUNT")
        .env_remove("AZURE_STORAGE_CONTAINER")
        .env_remove("AZX_PARALLELISM")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run azx")
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    let output = azx(&home, &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["upload", "upload-stream", "download", "config"] {
        assert!(stdout.contains(command), "help is missing {command}: {stdout}");
    }
}

#[test]
fn test_config_show_uses_defaults() {
    let home = TempDir::new().unwrap();
    let output = azx(&home, &["config", "show"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("container_name   = azx-files"));
    assert!(stdout.contains("storage_account  = <not set>"));
}

#[test]
fn test_config_set_persists() {
    let home = TempDir::new().unwrap();

    let output = azx(&home, &["config", "set", "parallelism", "9"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(home.path().join("azx").join("azx.toml").exists());

    let output = azx(&home, &["config", "show"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("parallelism      = 9"));

    let output = azx(&home, &["config", "set", "nonsense", "1"]);
    assert!(!output.status.success());
}

#[test]
fn test_upload_without_account_fails() {
    let home = TempDir::new().unwrap();
    let output = azx(&home, &["upload", "Cargo.toml"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Storage account is required"));
}

#[test]
#[ignore] // Requires AZURE_STORAGE_ACCOUNT and credentials for a live container
fn test_live_upload_and_download() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let source = work.path().join("payload.bin");
    std::fs::write(&source, vec![42u8; 9 * 1024 * 1024]).unwrap();
    let target = work.path().join("payload.out");

    let account = std::env::var("AZURE_STORAGE_ACCOUNT").unwrap();
    let run = |args: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_azx"))
            .args(args)
            .env("XDG_CONFIG_HOME", home.path())
            .env("AZURE_STORAGE_ACCOUNT", &account)
            .output()
            .unwrap()
    };

    let source_arg = source.to_string_lossy().to_string();
    let target_arg = target.to_string_lossy().to_string();
    assert!(run(&["upload", &source_arg, "--block-size-mb", "4"]).status.success());
    assert!(run(&["download", "payload.bin", "-o", &target_arg]).status.success());
    assert_eq!(std::fs::read(&source).unwrap(), std::fs::read(&target).unwrap());
}
