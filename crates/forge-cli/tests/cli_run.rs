use assert_cmd::Command;
use forge_testkit::{MockSseResponse, sse_reply, start_mock_sse_server};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn configure(workspace: &Path, llm: Value) {
    let runtime = workspace.join(".forge");
    fs::create_dir_all(&runtime).expect("runtime dir");
    fs::write(
        runtime.join("settings.local.json"),
        serde_json::to_string(&json!({ "llm": llm })).expect("settings json"),
    )
    .expect("settings override");
}

fn forge(workspace: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("forge"));
    cmd.current_dir(workspace)
        .env("HOME", workspace)
        .env_remove("LM_STUDIO_BASE_URL")
        .env_remove("LM_STUDIO_MODEL")
        .env_remove("AGENT_MAX_STEPS");
    cmd
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[test]
fn run_streams_json_events_and_writes_files() {
    let workspace = TempDir::new().expect("workspace");
    let server = start_mock_sse_server(vec![
        sse_reply(
            "THOUGHT: Create the notes file.\nACTION: write_file\nPARAMETERS: {\"path\": \"notes.txt\", \"content\": \"hello from forge\\n\"}",
        ),
        sse_reply("ACTION: finish\nPARAMETERS: {\"response\": \"Created notes.txt.\"}"),
    ]);
    configure(workspace.path(), json!({ "base_url": server.base_url }));

    let output = forge(workspace.path())
        .args(["--json", "run", "create", "notes.txt"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&output);

    assert!(
        lines
            .iter()
            .any(|e| e["type"] == "tool_call" && e["tool"] == "write_file")
    );
    assert!(
        lines
            .iter()
            .any(|e| e["type"] == "response" && e["content"] == "Created notes.txt.")
    );
    let summary = lines.last().expect("summary line");
    assert_eq!(summary["success"], true);
    assert_eq!(summary["steps"], 2);
    assert_eq!(
        fs::read_to_string(workspace.path().join("notes.txt")).expect("notes"),
        "hello from forge\n"
    );
    assert_eq!(server.request_count(), 2);
    assert!(server.request_bodies()[0].contains("\"stream\":true"));
}

#[test]
fn server_error_fails_the_run() {
    let workspace = TempDir::new().expect("workspace");
    let server = start_mock_sse_server(vec![MockSseResponse::status(
        500,
        r#"{"error":"model not loaded"}"#,
    )]);
    configure(workspace.path(), json!({ "base_url": server.base_url }));

    let output = forge(workspace.path())
        .args(["--json", "run", "list", "the", "files"])
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&output);
    let last = lines.last().expect("error event");
    assert_eq!(last["type"], "error");
    assert!(
        last["message"]
            .as_str()
            .is_some_and(|m| m.starts_with("API Error:"))
    );
    let log = fs::read_to_string(workspace.path().join(".forge/agent-errors.log")).expect("log");
    assert!(log.contains("[TRANSPORT_ERROR]"));
}

#[test]
fn history_file_round_trips_the_conversation() {
    let workspace = TempDir::new().expect("workspace");
    let server = start_mock_sse_server(vec![sse_reply(
        "ACTION: finish\nPARAMETERS: {\"response\": \"Nothing to change.\"}",
    )]);
    configure(workspace.path(), json!({ "base_url": server.base_url }));
    let history = workspace.path().join("history.json");
    fs::write(
        &history,
        r#"[{"role":"user","content":"earlier question"},{"role":"assistant","content":"earlier answer"}]"#,
    )
    .expect("history");

    forge(workspace.path())
        .args(["run", "--history", "history.json", "what", "is", "here?"])
        .assert()
        .success();

    let saved: Vec<Value> =
        serde_json::from_str(&fs::read_to_string(&history).expect("saved")).expect("json");
    assert_eq!(saved.len(), 4);
    assert_eq!(saved[0]["content"], "earlier question");
    assert_eq!(saved[2]["content"], "what is here?");
    assert_eq!(saved[3]["role"], "assistant");
    assert!(saved.iter().all(|m| m["role"] != "system"));
    assert!(server.request_bodies()[0].contains("earlier answer"));
}

#[test]
fn config_show_redacts_the_api_key() {
    let workspace = TempDir::new().expect("workspace");
    configure(
        workspace.path(),
        json!({ "api_key": "sk-local", "model": "qwen2.5-coder" }),
    );
    let output = forge(workspace.path())
        .args(["--json", "config", "--show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let cfg: Value = serde_json::from_slice(&output).expect("config json");
    assert_eq!(cfg["llm"]["api_key"], "***REDACTED***");
    assert_eq!(cfg["llm"]["model"], "qwen2.5-coder");
    assert_eq!(cfg["agent"]["max_steps"], 50);
}

#[test]
fn config_writes_default_settings_once() {
    let workspace = TempDir::new().expect("workspace");
    let output = forge(workspace.path())
        .args(["--json", "config"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let first: Value = serde_json::from_slice(&output).expect("json");
    assert_eq!(first["created"], true);
    assert!(workspace.path().join(".forge/settings.json").exists());

    let output = forge(workspace.path())
        .args(["--json", "config"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let second: Value = serde_json::from_slice(&output).expect("json");
    assert_eq!(second["created"], false);
}

#[test]
fn completions_are_generated() {
    let workspace = TempDir::new().expect("workspace");
    let output = forge(workspace.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("forge"));
}
