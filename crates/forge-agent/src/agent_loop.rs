//! The ReAct loop: stream a turn, parse it, guard it, run the tool, feed the
//! result back.
//!
//! One run owns its history, state and guard counters. Every run emits
//! exactly one terminal event (`Response`, `Failed` or `Error`) last.

use crate::guards::{FinishContext, GuardBank, GuardKind, Verdict, action_signature};
use crate::mode::{Mode, ModeKind};
use crate::nudge::Injector;
use crate::parser::{Action, ParsedReply, parse_reply};
use crate::prune::prune_history;
use crate::request::{RunRequest, parse_tags, strip_pinned_prefix};
use crate::state::AgentState;
use crate::stream_filter::StreamFilter;
use crate::summary::{replace_failure_context, summarize, tool_result_turn, truncate_chars};
use anyhow::Result;
use forge_core::{
    AgentConfig, AgentEvent, ChatMessage, ChatRequest, EventSink, StreamCallback, StreamChunk,
    ToolCall, ToolHost, ToolName, ToolResult, VERDICT_FAIL,
};
use forge_llm::{LlmClient, TransportError};
use forge_observe::Observer;
use forge_policy::PathPolicy;
use forge_tools::params::PathParams;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Default maximum number of steps before the loop gives up.
pub const DEFAULT_MAX_STEPS: usize = 50;

const EMPTY_REPLY_ERROR: &str =
    "Your reply was empty. Every reply must name an ACTION with its PARAMETERS.";
const RAW_PREVIEW_CHARS: usize = 500;

/// Why a run ended without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Guard(GuardKind),
    StepLimit,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The run ended through an accepted `finish`.
    pub success: bool,
    /// Final response on success, failure reason otherwise.
    pub response: String,
    pub failure: Option<Failure>,
    /// Model turns consumed.
    pub steps: usize,
    pub state: AgentState,
    /// Garbled replies that were rewritten and retried.
    pub format_recoveries: u32,
    /// Full conversation at the end of the run, system prompt first.
    pub history: Vec<ChatMessage>,
}

/// Per-run working set.
struct Run {
    mode: Mode,
    history: Vec<ChatMessage>,
    state: AgentState,
    guards: GuardBank,
    injector: Injector,
    policy: PathPolicy,
    /// Root or pinned sub-folder that tool paths resolve against.
    base: PathBuf,
    target: Option<String>,
    task: String,
    rejected_before: bool,
    req: RunRequest,
    steps: usize,
}

impl Run {
    fn outcome(self, success: bool, response: String, failure: Option<Failure>) -> RunOutcome {
        RunOutcome {
            success,
            response,
            failure,
            steps: self.steps,
            state: self.state,
            format_recoveries: self.guards.format_recoveries(),
            history: self.history,
        }
    }
}

/// What to do after a step.
enum Flow {
    Continue,
    Done {
        success: bool,
        response: String,
        failure: Option<Failure>,
    },
}

pub struct AgentLoop<'a> {
    llm: &'a (dyn LlmClient + Send + Sync),
    tool_host: Arc<dyn ToolHost + Send + Sync>,
    config: AgentConfig,
    model: String,
    temperature: Option<f32>,
    event_cb: Option<EventSink>,
    observer: Option<Arc<Observer>>,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        llm: &'a (dyn LlmClient + Send + Sync),
        tool_host: Arc<dyn ToolHost + Send + Sync>,
        config: AgentConfig,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            tool_host,
            config,
            model: model.into(),
            temperature: None,
            event_cb: None,
            observer: None,
        }
    }

    pub fn set_event_callback(&mut self, cb: EventSink) {
        self.event_cb = Some(cb);
    }

    pub fn set_observer(&mut self, observer: Arc<Observer>) {
        self.observer = Some(observer);
    }

    /// Overrides the client's configured sampling temperature.
    pub fn set_temperature(&mut self, temperature: f32) {
        self.temperature = Some(temperature);
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(cb) = &self.event_cb {
            cb(event);
        }
    }

    fn verbose(&self, msg: &str) {
        if let Some(obs) = &self.observer {
            obs.verbose_log(msg);
        }
    }

    fn warn(&self, msg: &str) {
        if let Some(obs) = &self.observer {
            obs.warn_log(msg);
        }
    }

    fn record(&self, kind: &str, message: &str, metadata: Option<&Value>) {
        if let Some(obs) = &self.observer {
            obs.record_error(kind, message, metadata);
        }
    }

    /// Runs the request to completion.
    ///
    /// Guard trips and the step limit are `Ok` outcomes with
    /// `success == false`. Transport failures and cancellation before a
    /// model call are `Err`, after an `Error` event.
    pub fn run(&mut self, req: RunRequest) -> Result<RunOutcome> {
        let mut run = self.start(req);
        let max_steps = if self.config.max_steps == 0 {
            DEFAULT_MAX_STEPS
        } else {
            self.config.max_steps
        };
        for step in 1..=max_steps {
            run.steps = step;
            if let Flow::Done {
                success,
                response,
                failure,
            } = self.step(&mut run, step)?
            {
                return Ok(run.outcome(success, response, failure));
            }
        }
        let reason = format!("Agent reached the {max_steps}-step limit without finishing.");
        self.record("STEP_LIMIT", &reason, Some(&json!({ "steps": max_steps })));
        self.emit(AgentEvent::Failed {
            reason: reason.clone(),
        });
        Ok(run.outcome(false, reason, Some(Failure::StepLimit)))
    }

    fn start(&self, req: RunRequest) -> Run {
        let task = req.task().to_string();
        let tags = parse_tags(&task);
        let policy = PathPolicy::new(&req.workspace);
        let requested = tags.target_folder.clone().or_else(|| req.target_folder.clone());
        let pinned = requested.and_then(|folder| {
            let resolved = policy.resolve_target_folder(&folder);
            if resolved.is_none() {
                self.warn(&format!("ignoring target folder \"{folder}\""));
            }
            resolved.map(|path| (folder.trim_matches(['/', '\\']).to_string(), path))
        });
        let (target, base) = match pinned {
            Some((folder, path)) => (Some(folder), path),
            None => (None, policy.root().to_path_buf()),
        };
        let kind = if req.review || tags.mode == Some(ModeKind::Review) {
            ModeKind::Review
        } else {
            ModeKind::Generate
        };
        let mode = Mode::new(kind, req.fast, &self.config, target.as_deref());
        let rejected_before = req
            .messages
            .iter()
            .any(|m| m.content().contains(VERDICT_FAIL));
        let mut history = Vec::with_capacity(req.messages.len() + 1);
        history.push(ChatMessage::system(mode.system_prompt()));
        history.extend(req.messages.iter().cloned());
        self.verbose(&format!(
            "run started: mode={kind:?} fast={} target={}",
            req.fast,
            target.as_deref().unwrap_or(".")
        ));
        Run {
            guards: GuardBank::new(mode.guards, self.config.guards.clone()),
            mode,
            history,
            state: AgentState::default(),
            injector: Injector::default(),
            policy,
            base,
            target,
            task,
            rejected_before,
            req,
            steps: 0,
        }
    }

    fn step(&self, run: &mut Run, step: usize) -> Result<Flow> {
        let dropped = prune_history(&mut run.history, &self.config);
        if dropped > 0 {
            self.verbose(&format!("pruned {dropped} turns from history"));
        }
        if run.req.cancel.is_cancelled() {
            let err = TransportError::Cancelled;
            self.emit(AgentEvent::Error {
                message: err.to_string(),
            });
            return Err(err.into());
        }

        let raw = match self.stream_turn(run) {
            Ok(raw) => raw,
            Err(err) => {
                let message = match TransportError::find(&err) {
                    Some(TransportError::Cancelled) => err.to_string(),
                    Some(TransportError::Stalled(secs)) => {
                        self.warn(&format!("model stream stalled after {secs}s at step {step}"));
                        format!("API Error: {err}")
                    }
                    _ => format!("API Error: {err}"),
                };
                self.record("TRANSPORT_ERROR", &message, Some(&json!({ "step": step })));
                self.emit(AgentEvent::Error { message });
                return Err(err);
            }
        };
        run.history.push(ChatMessage::assistant(raw.as_str()));

        let parsed = parse_reply(&raw, &run.mode);
        if let Some(thought) = parsed.thought.as_deref().filter(|t| !t.trim().is_empty()) {
            self.emit(AgentEvent::Thought {
                content: thought.to_string(),
            });
        }

        let tool = match parsed.action {
            Some(Action::Tool(tool)) => Some(tool),
            Some(Action::Finish) => None,
            Some(Action::ChainError) | None => {
                return Ok(self.chain_error(run, &parsed, &raw, step));
            }
        };
        run.guards.parsed_ok();
        if parsed.partial {
            self.verbose("parameters were salvaged field by field");
        }

        match tool {
            Some(tool) => self.tool_step(run, tool, parsed, step),
            None => Ok(self.finish_step(run, parsed, step)),
        }
    }

    /// Streams one assistant turn through the display filter.
    fn stream_turn(&self, run: &Run) -> Result<String> {
        let filter = Arc::new(Mutex::new(StreamFilter::new()));
        let sink = self.event_cb.clone();
        let cb_filter = Arc::clone(&filter);
        let cb: StreamCallback = Arc::new(move |chunk| {
            let StreamChunk::ContentDelta(text) = chunk else {
                return;
            };
            let events = match cb_filter.lock() {
                Ok(mut f) => f.push(&text),
                Err(poisoned) => poisoned.into_inner().push(&text),
            };
            if let Some(sink) = &sink {
                for event in events {
                    sink(event);
                }
            }
        });
        let request = ChatRequest {
            model: run.req.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: run.history.clone(),
            temperature: self.temperature,
        };
        let text = self.llm.complete_streaming(&request, &run.req.cancel, cb)?;
        let rest = match filter.lock() {
            Ok(mut f) => f.finish(),
            Err(poisoned) => poisoned.into_inner().finish(),
        };
        for event in rest {
            self.emit(event);
        }
        Ok(text)
    }

    fn chain_error(&self, run: &mut Run, parsed: &ParsedReply, raw: &str, step: usize) -> Flow {
        let error = parsed.error.as_deref().unwrap_or(EMPTY_REPLY_ERROR);
        self.record(
            "PARSE_ERROR",
            error,
            Some(&json!({
                "step": step,
                "garbled": parsed.is_garbled,
                "raw": truncate_chars(raw, RAW_PREVIEW_CHARS, "..."),
            })),
        );
        match run.guards.chain_error(parsed.is_garbled, error, run.mode.fast) {
            Verdict::Recover { attempt } => {
                run.injector.format_recovery(&mut run.history, run.mode.fast);
                self.emit(AgentEvent::FormatRecovery { attempt });
                Flow::Continue
            }
            Verdict::Nudge { kind, directive } => {
                self.nudge(run, kind, &directive);
                Flow::Continue
            }
            Verdict::Trip { kind, reason } => self.fail(run, kind, reason),
            Verdict::Pass => {
                run.history.push(ChatMessage::user(format!("Error: {error}")));
                Flow::Continue
            }
        }
    }

    fn nudge(&self, run: &mut Run, kind: GuardKind, directive: &str) {
        self.verbose(&format!("guard {kind}: nudging"));
        self.emit(AgentEvent::Warning {
            message: directive.to_string(),
        });
        run.injector.nudge(&mut run.history, kind, directive);
    }

    fn fail(&self, run: &Run, kind: GuardKind, reason: String) -> Flow {
        self.record(
            "GUARD_CEILING",
            &reason,
            Some(&json!({ "guard": kind.as_str(), "step": run.steps, "state": run.state })),
        );
        self.emit(AgentEvent::Failed {
            reason: reason.clone(),
        });
        Flow::Done {
            success: false,
            response: reason,
            failure: Some(Failure::Guard(kind)),
        }
    }

    fn succeed(&self, response: String) -> Flow {
        self.emit(AgentEvent::Response {
            content: response.clone(),
        });
        Flow::Done {
            success: true,
            response,
            failure: None,
        }
    }

    fn finish_step(&self, run: &mut Run, parsed: ParsedReply, step: usize) -> Flow {
        let response = parsed.response.unwrap_or_default();
        let verdict = run.guards.finish(&FinishContext {
            step,
            response: &response,
            state: &run.state,
            task: &run.task,
            rejected_before: run.rejected_before,
            report_file: run.mode.report_file(),
        });
        match verdict {
            Verdict::Nudge { kind, directive } => {
                self.nudge(run, kind, &directive);
                Flow::Continue
            }
            Verdict::Trip { kind, reason } => self.fail(run, kind, reason),
            Verdict::Pass | Verdict::Recover { .. } => self.succeed(response),
        }
    }

    fn tool_step(&self, run: &mut Run, tool: ToolName, parsed: ParsedReply, step: usize) -> Result<Flow> {
        let mut params = parsed.parameters;
        if let Some(folder) = run.target.as_deref() {
            strip_pinned_prefix(&mut params, folder);
        }
        let signature = action_signature(tool.as_api_name(), &params);
        match run.guards.duplicate(tool.as_api_name(), &signature) {
            Verdict::Nudge { kind, directive } => {
                self.record("LOOP_GUARD", &directive, Some(&json!({ "step": step, "tool": tool.as_api_name() })));
                self.nudge(run, kind, &directive);
                return Ok(Flow::Continue);
            }
            Verdict::Trip { kind, reason } => return Ok(self.fail(run, kind, reason)),
            Verdict::Pass | Verdict::Recover { .. } => {}
        }

        let params = Value::Object(params);
        self.emit(AgentEvent::ToolCall {
            tool: tool.to_string(),
            parameters: params.clone(),
        });

        if run.mode.is_review() && tool.is_mutating() && !writes_report(tool, &params, &run.mode) {
            let verdict = run.guards.review_write(tool, run.mode.report_file());
            if verdict != Verdict::Pass {
                self.emit(AgentEvent::ToolError {
                    tool: tool.to_string(),
                    error: format!("Tool \"{tool}\" is disabled in REVIEW mode."),
                });
            }
            match verdict {
                Verdict::Nudge { kind, directive } => {
                    self.nudge(run, kind, &directive);
                    return Ok(Flow::Continue);
                }
                Verdict::Trip { kind, reason } => return Ok(self.fail(run, kind, reason)),
                Verdict::Pass | Verdict::Recover { .. } => {}
            }
        }

        let result = self.tool_host.execute(&ToolCall {
            name: tool,
            params: params.clone(),
            workspace: run.base.clone(),
        });
        match result.error_message() {
            None => self.emit(AgentEvent::ToolResult {
                tool: tool.to_string(),
                result: result.output.clone(),
            }),
            Some(error) => {
                self.record("TOOL_ERROR", error, Some(&json!({ "tool": tool.as_api_name(), "parameters": &params })));
                self.emit(AgentEvent::ToolError {
                    tool: tool.to_string(),
                    error: error.to_string(),
                });
            }
        }
        run.state.record(tool, &params, &result, &run.mode);
        let summary = summarize(tool, &params, &result, &run.mode);

        if run.req.cancel.is_cancelled() {
            self.verbose("stopped after tool execution");
            return Ok(self.succeed(summary));
        }

        let mut turn = tool_result_turn(tool, &summary, &result, self.config.max_result_chars);
        if tool == ToolName::ReplaceInFile
            && let Some(context) = self.replace_context(run, &params, &result)
        {
            turn.push_str("\n\n");
            turn.push_str(&context);
        }
        run.history.push(ChatMessage::user(turn));

        if let Verdict::Nudge { kind, directive } = run.guards.progress(tool, step) {
            self.nudge(run, kind, &directive);
        }
        Ok(Flow::Continue)
    }

    /// Current contents of the file a failed replace targeted.
    fn replace_context(&self, run: &Run, params: &Value, result: &ToolResult) -> Option<String> {
        if result.success {
            return None;
        }
        let path = PathParams::from_value(params).path;
        let resolved = run.policy.resolve_in(&run.base, &path).ok()?;
        let content = std::fs::read_to_string(resolved).ok()?;
        Some(replace_failure_context(
            &path,
            &content,
            self.config.max_file_echo_chars,
        ))
    }
}

/// The report file is the one write a review may make.
fn writes_report(tool: ToolName, params: &Value, mode: &Mode) -> bool {
    matches!(tool, ToolName::WriteFile | ToolName::ReplaceInFile)
        && mode.is_report_path(&PathParams::from_value(params).path)
}
