use anyhow::{Context, Result};
use forge_agent::{AgentLoop, RunRegistry, RunRequest};
use forge_core::{AppConfig, ChatMessage};
use forge_llm::LocalClient;
use forge_observe::Observer;
use forge_tools::LocalToolHost;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::RunArgs;
use crate::output::{event_printer, print_json};

const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// `forge run`: one agent run against the configured local model. Returns
/// whether the run finished successfully.
pub(crate) fn run_agent(
    workspace: &Path,
    args: RunArgs,
    json_mode: bool,
    verbose: bool,
) -> Result<bool> {
    let mut cfg = AppConfig::load(workspace)?;
    if let Some(model) = &args.model {
        cfg.llm.model = model.clone();
    }
    if let Some(steps) = args.max_steps.filter(|steps| *steps > 0) {
        cfg.agent.max_steps = steps;
    }

    let mut observer = Observer::new(workspace)?;
    observer.set_verbose(verbose);
    let observer = Arc::new(observer);

    let mut messages = match &args.history {
        Some(path) if path.exists() => load_history(path)?,
        _ => Vec::new(),
    };
    messages.push(ChatMessage::user(args.prompt.join(" ")));

    let mut req = RunRequest::new(messages, workspace);
    req.fast = args.fast;
    req.review = args.review;
    req.target_folder = args.target.clone();

    let registry = Arc::new(RunRegistry::new());
    let run_id = registry.register(req.cancel.clone());
    watch_interrupts(Arc::clone(&registry))?;

    let client = LocalClient::new(cfg.llm.clone())?;
    let host = Arc::new(LocalToolHost::new(workspace, cfg.tools.clone()));
    let mut agent = AgentLoop::new(&client, host, cfg.agent.clone(), cfg.llm.model.clone());
    agent.set_event_callback(event_printer(json_mode));
    agent.set_observer(Arc::clone(&observer));

    let result = agent.run(req);
    registry.finish(run_id);
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            observer.verbose_log(&format!("run ended with error: {err:#}"));
            return Ok(false);
        }
    };

    if let Some(path) = &args.history {
        // The system prompt is rebuilt on every run.
        save_history(path, outcome.history.get(1..).unwrap_or_default())?;
    }
    if json_mode {
        print_json(&json!({
            "success": outcome.success,
            "steps": outcome.steps,
            "format_recoveries": outcome.format_recoveries,
            "state": outcome.state,
        }))?;
    }
    Ok(outcome.success)
}

fn load_history(path: &Path) -> Result<Vec<ChatMessage>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read history {}", path.display()))?;
    let messages: Vec<ChatMessage> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid history file {}", path.display()))?;
    Ok(messages
        .into_iter()
        .filter(|m| !matches!(m, ChatMessage::System { .. }))
        .collect())
}

fn save_history(path: &Path, messages: &[ChatMessage]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(messages)?)?;
    Ok(())
}

/// SIGINT sets a flag instead of killing the process; a watcher thread
/// turns it into a cancel of the active run.
fn watch_interrupts(registry: Arc<RunRegistry>) -> Result<()> {
    let sigint_flag = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    {
        let flag = Arc::clone(&sigint_flag);
        signal_hook::flag::register(signal_hook::consts::SIGINT, flag)?;
    }
    thread::spawn(move || {
        loop {
            if sigint_flag.swap(false, Ordering::SeqCst) {
                registry.stop_active();
            }
            thread::sleep(INTERRUPT_POLL);
        }
    });
    Ok(())
}
