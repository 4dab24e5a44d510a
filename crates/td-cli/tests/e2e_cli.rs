//! E2E CLI tests covering:
//! - init, uninitialized directories and the JSON error envelope
//! - create/list/update/delete/restore with bare hex ids
//! - TDQ queries, `--check`, parse and validation exit codes
//! - undo, work sessions, boards, notes behind their flag
//! - auth and feature commands against an isolated config directory

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

/// `td` rooted in `dir`, with user config under `config`.
fn td(dir: &Path, config: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("td"));
    cmd.current_dir(dir);
    cmd.env("TD_SESSION", "ses_test");
    cmd.env("XDG_CONFIG_HOME", config);
    cmd.env("TD_LOG", "error");
    cmd.env_remove("FORMAT");
    cmd.env_remove("TD_WORK_DIR");
    cmd.env_remove("TD_SYNC_API_KEY");
    cmd.env_remove("TD_SYNC_URL");
    cmd.env_remove("TD_SYNC_PROJECT");
    cmd.env_remove("TD_DISABLE_EXPERIMENTAL");
    cmd.env_remove("TD_FEATURE_NOTES");
    cmd
}

struct Env {
    dir: TempDir,
    config: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            config: TempDir::new().unwrap(),
        }
    }

    fn initialized() -> Self {
        let env = Self::new();
        env.cmd().arg("init").assert().success();
        env
    }

    fn cmd(&self) -> Command {
        td(self.dir.path(), self.config.path())
    }

    fn json(&self, args: &[&str]) -> Value {
        let out = self.cmd().args(args).arg("--json").output().unwrap();
        assert!(
            out.status.success(),
            "td {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        serde_json::from_slice(&out.stdout).unwrap()
    }

    fn create(&self, args: &[&str]) -> String {
        let mut full = vec!["create"];
        full.extend_from_slice(args);
        self.json(&full)["id"].as_str().unwrap().to_string()
    }

    fn text(&self, args: &[&str]) -> String {
        let out = self
            .cmd()
            .args(args)
            .args(["--format", "text"])
            .output()
            .unwrap();
        assert!(
            out.status.success(),
            "td {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8(out.stdout).unwrap()
    }
}

fn ids(list: &Value) -> Vec<String> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn init_is_idempotent() {
    let env = Env::new();
    env.cmd()
        .args(["init", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("INITIALIZED "));
    assert!(env.dir.path().join(".todos").is_dir());
    env.cmd()
        .args(["init", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ALREADY INITIALIZED "));
}

#[test]
fn uninitialized_directory_reports_not_found() {
    let env = Env::new();
    let out = env.cmd().args(["list", "--json"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let err: Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(err["error"]["code"], "not_found");
    assert!(out.stdout.is_empty());
}

#[test]
fn work_dir_flag_selects_project() {
    let env = Env::initialized();
    let elsewhere = TempDir::new().unwrap();
    let out = td(elsewhere.path(), env.config.path())
        .args(["create", "from afar", "--json", "--work-dir"])
        .arg(env.dir.path())
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(ids(&env.json(&["list"])).len(), 1);
}

#[test]
fn create_list_update_with_bare_ids() {
    let env = Env::initialized();
    let id = env.create(&["Crash on empty file", "-t", "bug", "-p", "P1", "-l", "Parser,crash"]);
    assert!(id.starts_with("td-"));
    let bare = id.trim_start_matches("td-");

    let shown = env.json(&["show", bare]);
    assert_eq!(shown["issue"]["type"], "bug");
    assert_eq!(shown["issue"]["labels"], serde_json::json!(["crash", "parser"]));

    env.cmd()
        .args(["update", bare, "--priority", "P0", "--add-label", "urgent", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("UPDATED {id}")));
    let issue = env.json(&["show", &id])["issue"].clone();
    assert_eq!(issue["priority"], "P0");
    assert_eq!(issue["labels"], serde_json::json!(["crash", "parser", "urgent"]));

    let listed = env.json(&["list", "-p", "P0"]);
    assert_eq!(ids(&listed), vec![id]);
}

#[test]
fn empty_update_is_invalid_input() {
    let env = Env::initialized();
    let id = env.create(&["nothing to change"]);
    let out = env.cmd().args(["update", &id, "--json"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let err: Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(err["error"]["code"], "invalid_input");
}

#[test]
fn delete_hides_and_restore_returns() {
    let env = Env::initialized();
    let id = env.create(&["temporary"]);
    let text = env.text(&["delete", &id]);
    assert_eq!(text.trim(), format!("DELETED {id}"));
    assert!(ids(&env.json(&["list"])).is_empty());
    env.cmd().args(["show", &id]).assert().code(1);
    assert_eq!(ids(&env.json(&["list", "--deleted"])), vec![id.clone()]);

    env.text(&["restore", &id]);
    assert_eq!(ids(&env.json(&["list"])), vec![id]);
}

#[test]
fn closed_issues_need_all_flag() {
    let env = Env::initialized();
    let id = env.create(&["done soon"]);
    env.text(&["close", &id]);
    assert!(ids(&env.json(&["list"])).is_empty());
    assert_eq!(ids(&env.json(&["list", "--all"])), vec![id]);
}

#[test]
fn query_filters_and_checks() {
    let env = Env::initialized();
    let bug = env.create(&["broken", "-t", "bug", "-p", "P1"]);
    env.create(&["feature", "-t", "feature", "-p", "P3"]);

    let found = env.json(&["query", "type = bug AND priority <= P1"]);
    assert_eq!(ids(&found), vec![bug]);

    let checked = env.json(&["query", "--check", "priority = high"]);
    assert_eq!(checked["valid"], true);
    assert!(checked["query"].as_str().unwrap().contains("P1"));
}

#[test]
fn query_errors_map_to_exit_codes() {
    let env = Env::initialized();
    let out = env.cmd().args(["query", "--json", "status = = open"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let err: Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(err["error"]["code"], "parse_error");

    let out = env.cmd().args(["query", "--json", "nosuchfield = 1"]).output().unwrap();
    assert_eq!(out.status.code(), Some(3));
    let err: Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(err["error"]["code"], "validation_error");
    assert!(!err["error"]["details"].as_array().unwrap().is_empty());
}

#[test]
fn undo_reverts_create_then_reports_nothing_left() {
    let env = Env::initialized();
    let id = env.create(&["oops"]);
    let undone = env.json(&["undo"]);
    assert_eq!(undone[0]["entity_id"], id.as_str());
    assert!(ids(&env.json(&["list"])).is_empty());

    let out = env.cmd().args(["undo", "--json"]).output().unwrap();
    assert!(!out.status.success());
}

#[test]
fn work_session_fans_logs_out_to_tagged_issues() {
    let env = Env::initialized();
    let a = env.create(&["lexer"]);
    let b = env.create(&["parser"]);
    env.text(&["ws", "start", "rewrite"]);
    env.text(&["ws", "tag", &a, &b]);

    let logs = env.json(&["ws", "log", "switched", "to", "logos"]);
    assert_eq!(logs.as_array().unwrap().len(), 2);
    for id in [&a, &b] {
        let detail = env.json(&["show", id]);
        assert!(
            detail["logs"]
                .as_array()
                .unwrap()
                .iter()
                .any(|l| l["message"] == "switched to logos")
        );
    }

    let current = env.json(&["ws", "current"]);
    assert_eq!(current["work_session"]["name"], "rewrite");
    assert_eq!(current["issues"].as_array().unwrap().len(), 2);

    env.text(&["ws", "end"]);
    assert!(env.json(&["ws", "current"])["work_session"].is_null());
    env.cmd().args(["ws", "end"]).assert().code(1);
}

#[test]
fn board_orders_positioned_issues_first() {
    let env = Env::initialized();
    let first = env.create(&["one", "-t", "bug"]);
    let second = env.create(&["two", "-t", "bug"]);
    env.create(&["three", "-t", "task"]);
    env.text(&["board", "create", "bugs", "type = bug"]);
    env.text(&["board", "move", "bugs", &second, "1"]);

    let board = env.json(&["board", "show", "bugs"]);
    let entries = board["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["issue"]["id"], second.as_str());
    assert_eq!(entries[0]["position"], 1);
    assert_eq!(entries[1]["issue"]["id"], first.as_str());

    let out = env
        .cmd()
        .args(["board", "create", "broken", "status = = open", "--json"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn notes_follow_feature_flag() {
    let env = Env::initialized();
    let note = env.json(&["note", "add", "release", "-c", "tag and publish"]);
    let id = note["id"].as_str().unwrap().to_string();
    env.text(&["note", "pin", &id]);
    let listed = env.json(&["note", "list"]);
    assert_eq!(listed[0]["pinned"], true);

    env.text(&["feature", "set", "notes", "off"]);
    env.cmd()
        .args(["note", "list", "--json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid_input"));

    // Environment beats the project setting.
    env.cmd()
        .env("TD_FEATURE_NOTES", "1")
        .args(["note", "list", "--json"])
        .assert()
        .success();
}

#[test]
fn auth_login_status_logout() {
    let env = Env::new();
    env.cmd()
        .args([
            "auth",
            "login",
            "--key",
            "tdk_secret_value",
            "--url",
            "https://sync.example.com/",
            "--project",
            "p_1",
            "--format",
            "text",
        ])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("LOGGED IN (device "));

    let status = {
        let out = env.cmd().args(["auth", "status", "--json"]).output().unwrap();
        serde_json::from_slice::<Value>(&out.stdout).unwrap()
    };
    assert_eq!(status["authenticated"], true);
    assert_eq!(status["url"], "https://sync.example.com");
    assert_eq!(status["project_id"], "p_1");
    assert!(!status["key"].as_str().unwrap().contains("secret"));
    assert_eq!(status["device_id"].as_str().unwrap().len(), 16);

    env.cmd().args(["auth", "logout"]).assert().success();
    let out = env.cmd().args(["auth", "status", "--json"]).output().unwrap();
    let status: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(status["authenticated"], false);
}

#[test]
fn sync_without_credentials_is_invalid_input() {
    let env = Env::initialized();
    let out = env.cmd().args(["sync", "--json"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let status = env.json(&["sync", "status"]);
    assert_eq!(status["local"]["pull_cursor"], 0);
}

#[test]
fn completions_need_no_project() {
    let env = Env::new();
    env.cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("td"));
}

#[test]
fn context_lists_next_up() {
    let env = Env::initialized();
    let id = env.create(&["first thing", "-p", "P0"]);
    let ctx = env.json(&["context"]);
    assert_eq!(ctx["session"], "ses_test");
    assert_eq!(ctx["next_up"][0]["id"], id.as_str());
    let text = env.text(&["context"]);
    assert!(text.contains(&id));
}
