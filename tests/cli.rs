//! Binary-level tests: configuration discovery and the credential check
//! that must run before any document is read.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const KEY_VAR: &str = "DOCCHAT_TEST_API_KEY";

fn docchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docchat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(data_dir.join("notes.md"), "# Notes\n\nSomething worth asking about.").unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[data]
dir = "{root}/data"

[credentials]
api_key_env = "{KEY_VAR}"

[embedding]
endpoint = "http://127.0.0.1:9"

[llm]
endpoint = "http://127.0.0.1:9"

[cache]
path = "{root}/cache/index.json"
"#,
        root = root.display(),
    );
    let config_path = config_dir.join("docchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docchat(cwd: &Path, config: Option<&Path>, args: &[&str]) -> (String, String, bool) {
    let binary = docchat_binary();
    let mut cmd = Command::new(&binary);
    cmd.current_dir(cwd)
        .env_remove(KEY_VAR)
        .env_remove("GEMINI_API_KEY")
        .env("RUST_LOG", "warn");
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    let output = cmd
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_missing_key_stops_every_command_before_indexing() {
    let (tmp, config_path) = setup_test_env();

    for args in [
        vec!["serve"],
        vec!["demo"],
        vec!["index"],
        vec!["ask", "what is in the notes?"],
    ] {
        let (stdout, stderr, success) = run_docchat(tmp.path(), Some(&config_path), &args);
        assert!(!success, "{:?} succeeded without a key", args);
        assert!(
            stderr.contains(&format!("{} is not set", KEY_VAR)),
            "{:?} stderr: {}",
            args,
            stderr
        );
        assert!(!stderr.contains("loading documents"), "{:?} started indexing", args);
        assert!(!stdout.contains("API key"), "{:?} stdout: {}", args, stdout);
    }
    assert!(!tmp.path().join("cache").exists());
}

#[test]
fn test_empty_key_is_rejected() {
    let (tmp, config_path) = setup_test_env();
    let output = Command::new(docchat_binary())
        .current_dir(tmp.path())
        .env(KEY_VAR, "   ")
        .arg("--config")
        .arg(&config_path)
        .arg("index")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("is set but empty"), "stderr: {}", stderr);
}

#[test]
fn test_demo_reports_key_then_fails_on_unreachable_service() {
    let (tmp, config_path) = setup_test_env();
    let output = Command::new(docchat_binary())
        .current_dir(tmp.path())
        .env(KEY_VAR, "test-key")
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(&config_path)
        .arg("demo")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(&format!("API key {} found", KEY_VAR)), "stdout: {}", stdout);
    assert!(!stdout.contains("test-key"));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Gemini embeddings"), "stderr: {}", stderr);
}

#[test]
fn test_default_config_path_falls_back_to_defaults() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_docchat(tmp.path(), None, &["index"]);
    assert!(!success);
    assert!(stderr.contains("GEMINI_API_KEY is not set"), "stderr: {}", stderr);
}

#[test]
fn test_explicit_missing_config_is_error() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_docchat(tmp.path(), Some(&missing), &["index"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.toml");
    fs::write(&path, "[chunking]\nmax_tokens = 100\noverlap_tokens = 100\n").unwrap();
    let (_, stderr, success) = run_docchat(tmp.path(), Some(&path), &["index"]);
    assert!(!success);
    assert!(stderr.contains("overlap_tokens"), "stderr: {}", stderr);
}
