//! Loop guards.
//!
//! Each guard is armed, then nudged a bounded number of times, then tripped.
//! A nudge injects a corrective directive and restarts the step; a trip ends
//! the run as a failure. Counters live here, outside the conversation, so
//! history pruning never resets them.

use crate::mode::GuardSet;
use crate::state::AgentState;
use forge_core::{GuardCeilings, ToolName, VERDICT_FAIL, VERDICT_PASS};
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;

/// Text-bearing fields compared without whitespace in action signatures.
const TEXT_FIELDS: &[&str] = &["content", "replace", "search", "text", "blueprint"];
const SIGNATURE_TEXT_LIMIT: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKind {
    Duplicate,
    NoProgress,
    ChainError,
    PrematureFinish,
    ReviewWriteBlock,
    ReviewReport,
    ReviewVerdict,
    ReviewRequest,
    FollowUp,
}

impl GuardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate_action",
            Self::NoProgress => "no_progress",
            Self::ChainError => "chain_error",
            Self::PrematureFinish => "premature_finish",
            Self::ReviewWriteBlock => "review_write_block",
            Self::ReviewReport => "review_report_missing",
            Self::ReviewVerdict => "review_verdict_missing",
            Self::ReviewRequest => "review_request_missing",
            Self::FollowUp => "follow_up_after_rejection",
        }
    }

    /// Assistant line injected ahead of the directive.
    pub fn acknowledgement(&self) -> &'static str {
        match self {
            Self::Duplicate => "I repeated the same action. I will change my approach.",
            Self::NoProgress => "I have gathered enough context. I will start making changes.",
            Self::ChainError => "My last reply was not in the required format. I will fix it.",
            Self::PrematureFinish => "The task is not implemented yet. I will continue.",
            Self::ReviewWriteBlock => "I must not modify files during a review.",
            Self::ReviewReport => "I still need to save the review report.",
            Self::ReviewVerdict => "My final response needs a verdict tag.",
            Self::ReviewRequest => "I still need to request a review.",
            Self::FollowUp => "I still need to address the rejected review.",
        }
    }
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// Inject a directive and let the model try again.
    Nudge { kind: GuardKind, directive: String },
    /// Garbled output: rewrite the last turn and show a worked example.
    Recover { attempt: u32 },
    Trip { kind: GuardKind, reason: String },
}

/// Inputs to the finish gates, in the order they are checked.
pub struct FinishContext<'a> {
    pub step: usize,
    pub response: &'a str,
    pub state: &'a AgentState,
    /// The task text from the caller's latest user turn.
    pub task: &'a str,
    /// The incoming conversation already held a failing verdict.
    pub rejected_before: bool,
    pub report_file: &'a str,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    last_signature: Option<String>,
    repeats: u32,
    no_progress: u32,
    chain_error: u32,
    format_recovery: u32,
    premature_finish: u32,
    review_write_block: u32,
    review_report: u32,
    review_verdict: u32,
    review_request: u32,
    follow_up: u32,
}

pub struct GuardBank {
    armed: GuardSet,
    ceilings: GuardCeilings,
    counters: Counters,
}

fn update_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(generat\w*|updat\w*|modif\w*|fix\w*|add(?:s|ed|ing)?\b|creat\w*|implement\w*)")
            .expect("valid keyword regex")
    })
}

/// Whether a task asks for files to change.
pub fn asks_for_changes(task: &str) -> bool {
    update_keyword_re().is_match(task)
}

/// `action|normalized-params`. Text fields lose all whitespace and are cut at
/// 5000 chars; keys serialize sorted, so key order never matters.
pub fn action_signature(action: &str, params: &Map<String, Value>) -> String {
    let normalized = params
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) if TEXT_FIELDS.contains(&key.as_str()) => Value::String(
                    text.chars()
                        .filter(|c| !c.is_whitespace())
                        .take(SIGNATURE_TEXT_LIMIT)
                        .collect(),
                ),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect::<std::collections::BTreeMap<_, _>>();
    format!(
        "{action}|{}",
        serde_json::to_string(&normalized).unwrap_or_default()
    )
}

fn has_verdict(response: &str) -> bool {
    let upper = response.to_ascii_uppercase();
    upper.contains(VERDICT_PASS) || upper.contains(VERDICT_FAIL)
}

impl GuardBank {
    pub fn new(armed: GuardSet, ceilings: GuardCeilings) -> Self {
        Self {
            armed,
            ceilings,
            counters: Counters::default(),
        }
    }

    pub fn format_recoveries(&self) -> u32 {
        self.counters.format_recovery
    }

    /// Unreadable or unknown action. Consecutive failures share one budget.
    pub fn chain_error(&mut self, garbled: bool, error: &str, fast: bool) -> Verdict {
        if !self.armed.chain_error {
            return Verdict::Pass;
        }
        if self.counters.chain_error >= self.ceilings.chain_error {
            return Verdict::Trip {
                kind: GuardKind::ChainError,
                reason: format!(
                    "The model produced {} unreadable replies in a row. Last error: {error}",
                    self.counters.chain_error + 1
                ),
            };
        }
        self.counters.chain_error += 1;
        if garbled {
            self.counters.format_recovery += 1;
            return Verdict::Recover {
                attempt: self.counters.format_recovery,
            };
        }
        let markers = if fast {
            "ACTION and PARAMETERS"
        } else {
            "THOUGHT, ACTION and PARAMETERS"
        };
        Verdict::Nudge {
            kind: GuardKind::ChainError,
            directive: format!("{error} Reply with {markers}, each marker on its own line."),
        }
    }

    /// A reply parsed into a real action.
    pub fn parsed_ok(&mut self) {
        self.counters.chain_error = 0;
    }

    pub fn duplicate(&mut self, action: &str, signature: &str) -> Verdict {
        if !self.armed.duplicate {
            return Verdict::Pass;
        }
        if self.counters.last_signature.as_deref() == Some(signature) {
            self.counters.repeats += 1;
        } else {
            self.counters.last_signature = Some(signature.to_string());
            self.counters.repeats = 1;
        }
        let repeats = self.counters.repeats;
        if repeats < self.ceilings.duplicate_trigger {
            return Verdict::Pass;
        }
        if repeats > self.ceilings.duplicate {
            return Verdict::Trip {
                kind: GuardKind::Duplicate,
                reason: format!(
                    "Agent stuck in a loop: \"{action}\" repeated {repeats} times with functionally identical parameters."
                ),
            };
        }
        Verdict::Nudge {
            kind: GuardKind::Duplicate,
            directive: format!(
                "You called \"{action}\" {repeats} times in a row with identical parameters. The call already ran and repeating it changes nothing. Change your approach, supply the real content, or finish if the task is complete."
            ),
        }
    }

    /// Runs after a tool executes; only counts once the run is past
    /// `no_progress_after_step`.
    pub fn progress(&mut self, tool: ToolName, step: usize) -> Verdict {
        if !self.armed.no_progress {
            return Verdict::Pass;
        }
        if tool.is_mutating() {
            self.counters.no_progress = 0;
            return Verdict::Pass;
        }
        if !tool.is_read_only() || step <= self.ceilings.no_progress_after_step {
            return Verdict::Pass;
        }
        self.counters.no_progress += 1;
        if self.counters.no_progress < self.ceilings.no_progress_trigger {
            return Verdict::Pass;
        }
        Verdict::Nudge {
            kind: GuardKind::NoProgress,
            directive: format!(
                "You have only read or listed files for {} steps in a row. You have enough context: write the plan or implement the change now.",
                self.counters.no_progress
            ),
        }
    }

    /// A mutating call in review mode aimed at anything but the report file.
    /// The second violation ends the run.
    pub fn review_write(&mut self, tool: ToolName, report_file: &str) -> Verdict {
        if !self.armed.review_write_block {
            return Verdict::Pass;
        }
        self.counters.review_write_block += 1;
        if self.counters.review_write_block >= self.ceilings.review_write_block {
            return Verdict::Trip {
                kind: GuardKind::ReviewWriteBlock,
                reason: format!(
                    "Review stopped: \"{tool}\" tried to modify the workspace {} times in REVIEW mode.",
                    self.counters.review_write_block
                ),
            };
        }
        Verdict::Nudge {
            kind: GuardKind::ReviewWriteBlock,
            directive: format!(
                "Tool \"{tool}\" is disabled in REVIEW mode. You are a code auditor: analyse and advise only. The only file you may write is {report_file}. Another write attempt ends the review."
            ),
        }
    }

    /// Finish gates, first failing gate wins.
    pub fn finish(&mut self, ctx: &FinishContext<'_>) -> Verdict {
        let armed = self.armed;
        let ceilings = self.ceilings.clone();
        if armed.premature_finish
            && !ctx.state.code_modified
            && ctx.step < ceilings.premature_finish_before_step
            && asks_for_changes(ctx.task)
        {
            return bump(
                &mut self.counters.premature_finish,
                ceilings.premature_finish,
                GuardKind::PrematureFinish,
                "This task asks for changes but no source file has been modified yet. Implement it now with write_file or replace_in_file. Do not finish yet.".to_string(),
            );
        }
        if armed.review_report && !ctx.state.report_saved {
            return bump(
                &mut self.counters.review_report,
                ceilings.review_report,
                GuardKind::ReviewReport,
                format!(
                    "Before finishing, save your full review to {} with write_file.",
                    ctx.report_file
                ),
            );
        }
        if armed.review_verdict && !has_verdict(ctx.response) {
            return bump(
                &mut self.counters.review_verdict,
                ceilings.review_verdict,
                GuardKind::ReviewVerdict,
                format!(
                    "Your final response must contain {VERDICT_PASS} or {VERDICT_FAIL}. Finish again with the verdict tag."
                ),
            );
        }
        if armed.review_request && !ctx.state.review_requested {
            return bump(
                &mut self.counters.review_request,
                ceilings.review_request,
                GuardKind::ReviewRequest,
                "Call request_review with a short summary of your changes before finishing."
                    .to_string(),
            );
        }
        if armed.follow_up
            && ctx.rejected_before
            && !(ctx.state.report_read && ctx.state.code_modified)
        {
            return bump(
                &mut self.counters.follow_up,
                ceilings.follow_up,
                GuardKind::FollowUp,
                format!(
                    "The previous review was rejected with {VERDICT_FAIL}. Read {}, fix every issue it lists, then finish.",
                    ctx.report_file
                ),
            );
        }
        Verdict::Pass
    }
}

fn bump(count: &mut u32, ceiling: u32, kind: GuardKind, directive: String) -> Verdict {
    if *count >= ceiling {
        return Verdict::Trip {
            kind,
            reason: format!("Run ended after {} attempts: {directive}", *count + 1),
        };
    }
    *count += 1;
    Verdict::Nudge { kind, directive }
}
