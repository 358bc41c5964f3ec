use anyhow::Result;
use forge_core::{AgentEvent, AppConfig, EventSink};
use serde::Serialize;
use serde_json::json;
use std::io::{self, Write};
use std::sync::Arc;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn redact_config_for_display(cfg: &AppConfig) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(cfg)?;
    if let Some(llm) = value.get_mut("llm").and_then(|entry| entry.as_object_mut())
        && llm.get("api_key").is_some_and(|key| !key.is_null())
    {
        llm.insert("api_key".to_string(), json!("***REDACTED***"));
    }
    Ok(value)
}

/// Streams model text to stdout and progress to stderr; with `json_mode`
/// every event becomes one JSON line on stdout.
pub(crate) fn event_printer(json_mode: bool) -> EventSink {
    Arc::new(move |event| {
        if json_mode {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
            return;
        }
        render_event(&event);
    })
}

fn render_event(event: &AgentEvent) {
    match event {
        AgentEvent::Chunk { content } => {
            print!("{content}");
            let _ = io::stdout().flush();
        }
        // Thoughts already reach the terminal through the stream.
        AgentEvent::Status { .. } | AgentEvent::Thought { .. } => {}
        AgentEvent::ToolCall { tool, .. } => eprintln!("\n-> {tool}"),
        AgentEvent::ToolResult { tool, .. } => eprintln!("   ok: {tool}"),
        AgentEvent::ToolError { tool, error } => eprintln!("   failed: {tool}: {error}"),
        AgentEvent::Warning { message } => eprintln!("[forge] {message}"),
        AgentEvent::FormatRecovery { attempt } => {
            eprintln!("[forge] unreadable reply, retrying (attempt {attempt})")
        }
        AgentEvent::Response { content } => println!("\n\n{content}"),
        AgentEvent::Failed { reason } => eprintln!("\nforge: run failed: {reason}"),
        AgentEvent::Error { message } => eprintln!("\nforge: {message}"),
    }
}
