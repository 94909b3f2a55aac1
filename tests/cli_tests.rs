//! Integration tests for the boardroom binary
use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Command running inside `dir` with no user config or API keys
fn boardroom(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("boardroom");
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env_remove("OPENAI_API_KEY")
        .env_remove("GITHUB_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_init_writes_default_config() {
    let dir = TempDir::new().unwrap();

    boardroom(dir.path()).arg("init").assert().success();

    let config = std::fs::read_to_string(dir.path().join(".boardroom/config.toml")).unwrap();
    assert!(config.contains("max_tool_rounds = 8"));
    assert!(dir.path().join(".boardroom/roles").is_dir());
}

#[test]
fn test_initialize_then_status() {
    let dir = TempDir::new().unwrap();

    boardroom(dir.path())
        .args(["initialize", "acme", "ceo", "--context", r#"{"goal": "launch"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"initialized\""))
        .stdout(predicate::str::contains("launch"));

    assert!(dir
        .path()
        .join(".boardroom/workspaces/acme/memory/ceo/status.json")
        .exists());

    boardroom(dir.path())
        .args(["status", "acme", "ceo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("initialized"))
        .stdout(predicate::str::contains("Turns:    0"));
}

#[test]
fn test_invalid_context_is_rejected() {
    let dir = TempDir::new().unwrap();

    boardroom(dir.path())
        .args(["initialize", "acme", "ceo", "--context", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--context must be valid JSON"));
}

#[test]
fn test_capabilities_by_role() {
    let dir = TempDir::new().unwrap();

    boardroom(dir.path())
        .args(["capabilities", "acme", "--role", "ceo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("team_write_message"))
        .stdout(predicate::str::contains("commit_changes").not());

    boardroom(dir.path())
        .args(["capabilities", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("commit_changes"));
}

#[test]
fn test_empty_board_and_notes() {
    let dir = TempDir::new().unwrap();

    boardroom(dir.path())
        .args(["initialize", "acme", "devops"])
        .assert()
        .success();

    boardroom(dir.path())
        .args(["board", "acme", "--priority", "urgent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(0 shown, 0 matching, 0 total)"));

    boardroom(dir.path())
        .args(["notes", "acme", "roadmap"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No shared note named 'roadmap'"));
}

#[test]
fn test_unknown_project_and_role() {
    let dir = TempDir::new().unwrap();

    boardroom(dir.path())
        .args(["status", "ghost", "ceo"])
        .assert()
        .failure();

    boardroom(dir.path())
        .args(["initialize", "acme", "intern"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown role 'intern'"));
}

#[test]
fn test_invoke_requires_api_key() {
    let dir = TempDir::new().unwrap();

    boardroom(dir.path())
        .args(["invoke", "acme", "ceo", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("API key not configured"));
}

#[test]
fn test_teardown_needs_confirmation() {
    let dir = TempDir::new().unwrap();

    boardroom(dir.path())
        .args(["initialize", "acme", "ceo"])
        .assert()
        .success();

    boardroom(dir.path())
        .args(["teardown", "acme"])
        .assert()
        .failure();
    assert!(dir.path().join(".boardroom/workspaces/acme").exists());

    boardroom(dir.path())
        .args(["teardown", "acme", "--yes"])
        .assert()
        .success();
    assert!(!dir.path().join(".boardroom/workspaces/acme").exists());
}

#[test]
fn test_roles_and_activity() {
    let dir = TempDir::new().unwrap();

    boardroom(dir.path())
        .arg("roles")
        .assert()
        .success()
        .stdout(predicate::str::contains("ceo"))
        .stdout(predicate::str::contains("devops"));

    boardroom(dir.path())
        .args(["activity", "acme"])
        .assert()
        .failure();

    boardroom(dir.path())
        .args(["initialize", "acme", "ceo"])
        .assert()
        .success();

    boardroom(dir.path())
        .args(["activity", "acme", "--limit", "5"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_decide_then_list_decisions() {
    let dir = TempDir::new().unwrap();

    boardroom(dir.path())
        .args(["decide", "acme", "ceo", "Pricing", "Freemium tier"])
        .assert()
        .failure();

    boardroom(dir.path())
        .args(["initialize", "acme", "ceo"])
        .assert()
        .success();

    boardroom(dir.path())
        .args([
            "decide",
            "acme",
            "ceo",
            "Pricing",
            "Freemium tier",
            "--rationale",
            "growth first",
        ])
        .assert()
        .success();

    boardroom(dir.path())
        .args(["decisions", "acme", "ceo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pricing: Freemium tier"))
        .stdout(predicate::str::contains("because growth first"));

    assert!(dir
        .path()
        .join(".boardroom/workspaces/acme/memory/ceo/decisions.jsonl")
        .exists());
}
