//! End-to-end loop scenarios against a scripted model and the real file
//! tools in a scratch workspace.

use anyhow::Result;
use forge_agent::nudge::REJECTED_MARKER;
use forge_agent::{AgentLoop, Failure, GuardKind, RunOutcome, RunRequest};
use forge_core::{AgentConfig, AgentEvent, ChatMessage, ToolsConfig};
use forge_llm::TransportError;
use forge_observe::Observer;
use forge_testkit::{EventRecorder, ScriptedLlm, read_file, temp_workspace, write_file};
use forge_tools::LocalToolHost;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

// ── Helpers ───────────────────────────────────────────────────────────

fn reply(thought: &str, action: &str, params: Value) -> String {
    format!("THOUGHT: {thought}\n\nACTION: {action}\n\nPARAMETERS: {params}")
}

fn finish(response: &str) -> String {
    reply("The work is complete.", "finish", json!({ "response": response }))
}

fn run_with(
    workspace: &Path,
    llm: &ScriptedLlm,
    config: AgentConfig,
    req: RunRequest,
) -> (Result<RunOutcome>, EventRecorder) {
    let recorder = EventRecorder::new();
    let host = Arc::new(LocalToolHost::new(workspace, ToolsConfig::default()));
    let mut agent = AgentLoop::new(llm, host, config, "test-model");
    agent.set_event_callback(recorder.sink());
    (agent.run(req), recorder)
}

fn run_task(workspace: &Path, llm: &ScriptedLlm, task: &str) -> (Result<RunOutcome>, EventRecorder) {
    let req = RunRequest::new(vec![ChatMessage::user(task)], workspace);
    run_with(workspace, llm, AgentConfig::default(), req)
}

fn warnings(recorder: &EventRecorder) -> usize {
    recorder.count(|e| matches!(e, AgentEvent::Warning { .. }))
}

fn assert_single_terminal_last(recorder: &EventRecorder) {
    let events = recorder.events();
    assert_eq!(recorder.terminal_events().len(), 1, "events: {events:?}");
    assert!(events.last().is_some_and(AgentEvent::is_terminal));
}

// ── Generate mode ─────────────────────────────────────────────────────

#[test]
fn clean_write_finishes_in_two_steps() -> Result<()> {
    let ws = temp_workspace()?;
    let llm = ScriptedLlm::new([
        reply(
            "Create the greeting file.",
            "write_file",
            json!({"path": "hello.txt", "content": "hello world\n"}),
        ),
        finish("Created hello.txt."),
    ]);
    let (outcome, recorder) = run_task(ws.path(), &llm, "Create hello.txt saying hello world");
    let outcome = outcome?;

    assert!(outcome.success);
    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.response, "Created hello.txt.");
    assert!(outcome.state.code_modified);
    assert_eq!(read_file(ws.path(), "hello.txt")?, "hello world\n");
    assert_single_terminal_last(&recorder);
    assert!(matches!(
        recorder.terminal_events().as_slice(),
        [AgentEvent::Response { content }] if content == "Created hello.txt."
    ));
    assert_eq!(warnings(&recorder), 0);
    Ok(())
}

#[test]
fn system_prompt_leads_every_request() -> Result<()> {
    let ws = temp_workspace()?;
    let llm = ScriptedLlm::new([finish("Nothing to do here.")]);
    let (outcome, _) = run_task(ws.path(), &llm, "What is in this folder?");
    assert!(outcome?.success);

    let requests = llm.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "test-model");
    assert!(matches!(requests[0].messages[0], ChatMessage::System { .. }));
    assert_eq!(requests[0].messages[1].content(), "What is in this folder?");
    Ok(())
}

#[test]
fn streamed_text_hides_action_and_parameters() -> Result<()> {
    let ws = temp_workspace()?;
    let llm = ScriptedLlm::new([
        reply("Look around first.", "list_files", json!({"path": "."})),
        finish("The folder is empty."),
    ]);
    let (outcome, recorder) = run_task(ws.path(), &llm, "What is in this folder?");
    assert!(outcome?.success);

    let shown = recorder.streamed_text();
    assert!(shown.contains("Look around first."));
    assert!(!shown.contains("PARAMETERS"));
    assert!(!shown.contains("list_files"));
    assert_eq!(
        recorder.count(|e| matches!(e, AgentEvent::Thought { content } if content == "Look around first.")),
        1
    );
    Ok(())
}

#[test]
fn repeated_action_gets_exactly_one_directive() -> Result<()> {
    let ws = temp_workspace()?;
    write_file(ws.path(), "a.txt", "alpha\n")?;
    let look = || reply("List the files.", "list_files", json!({"path": "."}));
    let llm = ScriptedLlm::new([look(), look(), look(), finish("One file: a.txt.")]);
    let (outcome, recorder) = run_task(ws.path(), &llm, "What is in this folder?");
    let outcome = outcome?;

    assert!(outcome.success);
    assert_eq!(outcome.steps, 4);
    assert_eq!(warnings(&recorder), 1);
    // The third identical call is answered with a directive, not executed.
    assert_eq!(recorder.count(|e| matches!(e, AgentEvent::ToolCall { .. })), 2);
    let directives = outcome
        .history
        .iter()
        .filter(|m| m.content().starts_with("[SYSTEM DIRECTIVE #"))
        .count();
    assert_eq!(directives, 1);
    Ok(())
}

#[test]
fn duplicate_write_then_new_action_recovers() -> Result<()> {
    let ws = temp_workspace()?;
    let write = |content: &str| {
        reply(
            "Write the notes.",
            "write_file",
            json!({"path": "notes.txt", "content": content}),
        )
    };
    let llm = ScriptedLlm::new([
        write("first line\nsecond line\n"),
        write("first  line\nsecond line"),
        write("first line\n  second line\n"),
        reply("Check the result.", "read_file", json!({"path": "notes.txt"})),
        finish("Wrote notes.txt."),
    ]);
    let (outcome, recorder) = run_task(ws.path(), &llm, "create notes.txt");
    let outcome = outcome?;

    assert!(outcome.success);
    assert_eq!(outcome.steps, 5);
    assert_eq!(warnings(&recorder), 1);
    // One acknowledgement plus one directive.
    let injected = outcome
        .history
        .iter()
        .filter(|m| {
            m.content() == GuardKind::Duplicate.acknowledgement()
                || m.content().starts_with("[SYSTEM DIRECTIVE #")
        })
        .count();
    assert_eq!(injected, 2);
    assert_eq!(read_file(ws.path(), "notes.txt")?, "first  line\nsecond line");
    Ok(())
}

#[test]
fn repeated_fusion_signature_then_write() -> Result<()> {
    let ws = temp_workspace()?;
    let llm = ScriptedLlm::new([
        "okay ACTIONXXXETERS: {}\nthen ACTIONXXXETERS: {}".to_string(),
        reply(
            "Write it properly.",
            "write_file",
            json!({"path": "notes.txt", "content": "recovered content\n"}),
        ),
        finish("Wrote notes.txt."),
    ]);
    let (outcome, recorder) = run_task(ws.path(), &llm, "create notes.txt");
    let outcome = outcome?;

    assert!(outcome.success);
    assert_eq!(outcome.format_recoveries, 1);
    assert_eq!(
        recorder.count(|e| matches!(e, AgentEvent::FormatRecovery { .. })),
        1
    );
    assert_eq!(read_file(ws.path(), "notes.txt")?, "recovered content\n");
    Ok(())
}

#[test]
fn identical_actions_past_the_ceiling_fail_the_run() -> Result<()> {
    let ws = temp_workspace()?;
    let look = || reply("List the files.", "list_files", json!({"path": "."}));
    let llm = ScriptedLlm::new([look(), look(), look(), look(), look()]);
    let (outcome, recorder) = run_task(ws.path(), &llm, "What is in this folder?");
    let outcome = outcome?;

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(Failure::Guard(GuardKind::Duplicate)));
    assert!(outcome.response.contains("repeated 5 times"));
    assert_single_terminal_last(&recorder);
    assert!(matches!(
        recorder.terminal_events().as_slice(),
        [AgentEvent::Failed { .. }]
    ));
    Ok(())
}

#[test]
fn garbled_reply_is_rewritten_and_retried() -> Result<()> {
    let ws = temp_workspace()?;
    let garbled = "THOUGHT: look\nACTIONPARAMETERS: {\"path\": \".\"}";
    let llm = ScriptedLlm::new([garbled.to_string(), finish("Nothing here.")]);
    let (outcome, recorder) = run_task(ws.path(), &llm, "What is in this folder?");
    let outcome = outcome?;

    assert!(outcome.success);
    assert_eq!(outcome.format_recoveries, 1);
    assert_eq!(
        recorder.count(|e| matches!(e, AgentEvent::FormatRecovery { attempt: 1 })),
        1
    );

    let retry = &llm.requests()[1];
    assert!(retry.messages.iter().any(|m| m.content() == REJECTED_MARKER));
    assert!(retry.messages.iter().all(|m| !m.content().contains("ACTIONPARAMETERS")));
    Ok(())
}

#[test]
fn consecutive_unknown_actions_trip_the_chain_guard() -> Result<()> {
    let ws = temp_workspace()?;
    let bad = || reply("Try something.", "explode", json!({}));
    let llm = ScriptedLlm::new([bad(), bad(), bad(), bad()]);
    let (outcome, recorder) = run_task(ws.path(), &llm, "What is in this folder?");
    let outcome = outcome?;

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(Failure::Guard(GuardKind::ChainError)));
    assert_eq!(outcome.steps, 4);
    assert_eq!(warnings(&recorder), 3);
    assert_eq!(llm.remaining(), 0);
    Ok(())
}

#[test]
fn early_finish_is_refused_until_a_file_changes() -> Result<()> {
    let ws = temp_workspace()?;
    write_file(ws.path(), "README.md", "# Old\n")?;
    let llm = ScriptedLlm::new([
        finish("Updated."),
        reply(
            "Rewrite the readme.",
            "write_file",
            json!({"path": "README.md", "content": "# New title\n\nFresh text.\n"}),
        ),
        finish("Updated the readme."),
    ]);
    let (outcome, recorder) = run_task(ws.path(), &llm, "update the readme");
    let outcome = outcome?;

    assert!(outcome.success);
    assert_eq!(outcome.steps, 3);
    assert_eq!(warnings(&recorder), 1);
    assert_eq!(read_file(ws.path(), "README.md")?, "# New title\n\nFresh text.\n");
    Ok(())
}

#[test]
fn failed_replace_echoes_current_file() -> Result<()> {
    let ws = temp_workspace()?;
    write_file(ws.path(), "app.js", "const a = 1;\n")?;
    let llm = ScriptedLlm::new([
        reply(
            "Patch the constant.",
            "replace_in_file",
            json!({"path": "app.js", "search": "const b = 2;", "replace": "const b = 3;"}),
        ),
        reply(
            "Use the real line.",
            "replace_in_file",
            json!({"path": "app.js", "search": "const a = 1;", "replace": "const a = 2;"}),
        ),
        finish("Patched app.js."),
    ]);
    let (outcome, recorder) = run_task(ws.path(), &llm, "fix the constant in app.js");
    assert!(outcome?.success);

    assert_eq!(recorder.count(|e| matches!(e, AgentEvent::ToolError { .. })), 1);
    let second = &llm.requests()[1];
    let feedback = second.messages.last().map(ChatMessage::content).unwrap_or_default();
    assert!(feedback.contains("CURRENT FILE CONTENT OF \"app.js\""));
    assert!(feedback.contains("const a = 1;"));
    assert_eq!(read_file(ws.path(), "app.js")?, "const a = 2;\n");
    Ok(())
}

#[test]
fn target_folder_pins_tool_paths() -> Result<()> {
    let ws = temp_workspace()?;
    std::fs::create_dir_all(ws.path().join("apps/web"))?;
    let llm = ScriptedLlm::new([
        reply(
            "Add the entry point.",
            "write_file",
            json!({"path": "apps/web/src/main.js", "content": "console.log('web');\n"}),
        ),
        finish("Added src/main.js."),
    ]);
    let (outcome, _) = run_task(
        ws.path(),
        &llm,
        "[TARGET FOLDER: apps/web] create src/main.js",
    );
    assert!(outcome?.success);
    assert_eq!(
        read_file(ws.path(), "apps/web/src/main.js")?,
        "console.log('web');\n"
    );
    assert!(!ws.path().join("apps/web/apps").exists());
    Ok(())
}

#[test]
fn step_limit_ends_the_run() -> Result<()> {
    let ws = temp_workspace()?;
    write_file(ws.path(), "a.txt", "a\n")?;
    write_file(ws.path(), "b.txt", "b\n")?;
    let llm = ScriptedLlm::new([
        reply("Look.", "list_files", json!({"path": "."})),
        reply("Read a.", "read_file", json!({"path": "a.txt"})),
        reply("Read b.", "read_file", json!({"path": "b.txt"})),
    ]);
    let config = AgentConfig {
        max_steps: 3,
        ..AgentConfig::default()
    };
    let req = RunRequest::new(vec![ChatMessage::user("What is in this folder?")], ws.path());
    let (outcome, recorder) = run_with(ws.path(), &llm, config, req);
    let outcome = outcome?;

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(Failure::StepLimit));
    assert_eq!(outcome.steps, 3);
    assert!(matches!(
        recorder.terminal_events().as_slice(),
        [AgentEvent::Failed { reason }] if reason.contains("3-step limit")
    ));
    Ok(())
}

// ── Review mode ───────────────────────────────────────────────────────

fn review_request(workspace: &Path, task: &str) -> RunRequest {
    let mut req = RunRequest::new(vec![ChatMessage::user(task)], workspace);
    req.review = true;
    req
}

#[test]
fn review_must_save_report_before_finishing() -> Result<()> {
    let ws = temp_workspace()?;
    write_file(ws.path(), "src/app.js", "export const add = (a, b) => a + b;\n")?;
    let llm = ScriptedLlm::new([
        reply("Read the code.", "read_file", json!({"path": "src/app.js"})),
        finish("[VERDICT: PASS] Looks fine."),
        reply(
            "Save the report.",
            "write_file",
            json!({"path": "REVIEW_REPORT.md", "content": "# Review\n\nNo issues found in src/app.js.\n"}),
        ),
        finish("[VERDICT: PASS] No issues found."),
    ]);
    let req = review_request(ws.path(), "Review the code in src");
    let (outcome, recorder) = run_with(ws.path(), &llm, AgentConfig::default(), req);
    let outcome = outcome?;

    assert!(outcome.success);
    assert!(outcome.state.report_saved);
    assert!(!outcome.state.code_modified);
    assert_eq!(warnings(&recorder), 1);
    assert!(read_file(ws.path(), "REVIEW_REPORT.md")?.contains("No issues found"));
    Ok(())
}

#[test]
fn review_finish_needs_a_verdict() -> Result<()> {
    let ws = temp_workspace()?;
    let llm = ScriptedLlm::new([
        reply(
            "Save the report.",
            "write_file",
            json!({"path": "REVIEW_REPORT.md", "content": "# Review\n\nThe folder is empty.\n"}),
        ),
        finish("Reviewed."),
        finish("[VERDICT: FAIL] The folder is empty."),
    ]);
    let req = review_request(ws.path(), "Review this project");
    let (outcome, recorder) = run_with(ws.path(), &llm, AgentConfig::default(), req);
    let outcome = outcome?;

    assert!(outcome.success);
    assert!(outcome.response.contains("[VERDICT: FAIL]"));
    assert_eq!(warnings(&recorder), 1);
    Ok(())
}

#[test]
fn review_cannot_modify_source_files() -> Result<()> {
    let ws = temp_workspace()?;
    write_file(ws.path(), "src/app.js", "original\n")?;
    let llm = ScriptedLlm::new([
        reply(
            "Fix it myself.",
            "write_file",
            json!({"path": "src/app.js", "content": "patched by the reviewer\n"}),
        ),
        reply(
            "Try again.",
            "write_file",
            json!({"path": "src/app.js", "content": "patched once more\n"}),
        ),
    ]);
    let req = review_request(ws.path(), "Review the code in src");
    let (outcome, recorder) = run_with(ws.path(), &llm, AgentConfig::default(), req);
    let outcome = outcome?;

    assert!(!outcome.success);
    assert_eq!(
        outcome.failure,
        Some(Failure::Guard(GuardKind::ReviewWriteBlock))
    );
    assert!(!outcome.state.code_modified);
    assert_eq!(read_file(ws.path(), "src/app.js")?, "original\n");
    assert_eq!(recorder.count(|e| matches!(e, AgentEvent::ToolError { .. })), 2);
    assert_single_terminal_last(&recorder);
    Ok(())
}

#[test]
fn review_tag_switches_mode() -> Result<()> {
    let ws = temp_workspace()?;
    write_file(ws.path(), "src/app.js", "original\n")?;
    let llm = ScriptedLlm::new([
        reply(
            "Edit.",
            "write_file",
            json!({"path": "src/app.js", "content": "changed content here\n"}),
        ),
        reply(
            "Edit again.",
            "write_file",
            json!({"path": "src/app.js", "content": "changed content again\n"}),
        ),
    ]);
    let (outcome, _) = run_task(ws.path(), &llm, "[MODE: REVIEW] check src");
    let outcome = outcome?;
    assert_eq!(
        outcome.failure,
        Some(Failure::Guard(GuardKind::ReviewWriteBlock))
    );
    assert_eq!(read_file(ws.path(), "src/app.js")?, "original\n");
    Ok(())
}

// ── Transport and cancellation ────────────────────────────────────────

#[test]
fn cancelled_before_the_call_stops_with_error_event() -> Result<()> {
    let ws = temp_workspace()?;
    let llm = ScriptedLlm::new([finish("never sent")]);
    let req = RunRequest::new(vec![ChatMessage::user("anything")], ws.path());
    req.cancel.cancel();
    let (outcome, recorder) = run_with(ws.path(), &llm, AgentConfig::default(), req);

    let err = outcome.expect_err("cancelled run fails");
    assert_eq!(TransportError::find(&err), Some(&TransportError::Cancelled));
    assert!(llm.requests().is_empty());
    assert!(matches!(
        recorder.terminal_events().as_slice(),
        [AgentEvent::Error { message }] if message == "Agent stopped by user."
    ));
    Ok(())
}

#[test]
fn cancel_during_tool_finishes_with_its_summary() -> Result<()> {
    let ws = temp_workspace()?;
    let llm = ScriptedLlm::new([
        reply(
            "Create the file.",
            "write_file",
            json!({"path": "hello.txt", "content": "hello world here"}),
        ),
        finish("never requested"),
    ]);
    let req = RunRequest::new(vec![ChatMessage::user("create hello.txt")], ws.path());

    let recorder = EventRecorder::new();
    let record = recorder.sink();
    let cancel = req.cancel.clone();
    let host = Arc::new(LocalToolHost::new(ws.path(), ToolsConfig::default()));
    let mut agent = AgentLoop::new(&llm, host, AgentConfig::default(), "test-model");
    agent.set_event_callback(Arc::new(move |event: AgentEvent| {
        if matches!(event, AgentEvent::ToolCall { .. }) {
            cancel.cancel();
        }
        record(event);
    }));
    let outcome = agent.run(req)?;

    assert!(outcome.success);
    assert_eq!(outcome.steps, 1);
    assert!(outcome.response.starts_with("### File Updated"));
    assert_eq!(read_file(ws.path(), "hello.txt")?, "hello world here");
    assert_eq!(llm.requests().len(), 1);
    assert_single_terminal_last(&recorder);
    assert!(matches!(
        recorder.terminal_events().as_slice(),
        [AgentEvent::Response { content }] if content == &outcome.response
    ));
    Ok(())
}

#[test]
fn transport_failure_is_logged_and_surfaced() -> Result<()> {
    let ws = temp_workspace()?;
    let llm = ScriptedLlm::default();
    llm.push_error(TransportError::Unreachable("http://localhost:1".to_string()));

    let recorder = EventRecorder::new();
    let host = Arc::new(LocalToolHost::new(ws.path(), ToolsConfig::default()));
    let observer = Arc::new(Observer::new(ws.path())?);
    let mut agent = AgentLoop::new(&llm, host, AgentConfig::default(), "test-model");
    agent.set_event_callback(recorder.sink());
    agent.set_observer(Arc::clone(&observer));

    let req = RunRequest::new(vec![ChatMessage::user("anything")], ws.path());
    assert!(agent.run(req).is_err());
    assert!(matches!(
        recorder.terminal_events().as_slice(),
        [AgentEvent::Error { message }] if message.starts_with("API Error: Cannot reach")
    ));
    let log = std::fs::read_to_string(observer.log_path())?;
    assert!(log.contains("[TRANSPORT_ERROR]"));
    Ok(())
}

#[test]
fn stalled_stream_is_logged_as_a_warning() -> Result<()> {
    let ws = temp_workspace()?;
    let llm = ScriptedLlm::default();
    llm.push_error(TransportError::Stalled(30));

    let recorder = EventRecorder::new();
    let host = Arc::new(LocalToolHost::new(ws.path(), ToolsConfig::default()));
    let observer = Arc::new(Observer::new(ws.path())?);
    let mut agent = AgentLoop::new(&llm, host, AgentConfig::default(), "test-model");
    agent.set_event_callback(recorder.sink());
    agent.set_observer(Arc::clone(&observer));

    let req = RunRequest::new(vec![ChatMessage::user("anything")], ws.path());
    let err = agent.run(req).expect_err("stalled run fails");
    assert_eq!(TransportError::find(&err), Some(&TransportError::Stalled(30)));
    let log = std::fs::read_to_string(observer.log_path())?;
    assert!(log.contains("[WARN] model stream stalled after 30s at step 1"));
    assert!(log.contains("[TRANSPORT_ERROR]"));
    Ok(())
}
