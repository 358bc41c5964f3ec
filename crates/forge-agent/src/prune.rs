use crate::nudge::{DIRECTIVE_PREFIX, REJECTED_MARKER};
use forge_core::{AgentConfig, ChatMessage, VERDICT_FAIL, VERDICT_PASS};
use forge_tools::{INSTRUCTIONS_MARKER, REVIEW_REQUESTED_MARKER};

/// Turns always kept at the front: the system prompt and the task.
const HEAD_TURNS: usize = 2;

fn is_evidence(message: &ChatMessage, cfg: &AgentConfig) -> bool {
    let text = message.content();
    [
        VERDICT_PASS,
        VERDICT_FAIL,
        REJECTED_MARKER,
        DIRECTIVE_PREFIX,
        REVIEW_REQUESTED_MARKER,
        INSTRUCTIONS_MARKER,
        cfg.report_file.as_str(),
        cfg.plan_file.as_str(),
    ]
    .iter()
    .any(|needle| text.contains(needle))
}

/// Shrinks a history that grew past `prune_threshold`: the head, up to
/// `prune_evidence_cap` of the most recent evidence turns from the middle,
/// and the last `prune_window` turns, in their original order. Returns the
/// number of turns dropped.
pub fn prune_history(history: &mut Vec<ChatMessage>, cfg: &AgentConfig) -> usize {
    let len = history.len();
    if len <= cfg.prune_threshold || len <= HEAD_TURNS + cfg.prune_window {
        return 0;
    }
    let tail_start = len - cfg.prune_window;
    let mut evidence = (HEAD_TURNS..tail_start)
        .filter(|&i| is_evidence(&history[i], cfg))
        .collect::<Vec<_>>();
    let skip = evidence.len().saturating_sub(cfg.prune_evidence_cap);
    evidence.drain(..skip);

    let old = std::mem::take(history);
    *history = old
        .into_iter()
        .enumerate()
        .filter(|(i, _)| *i < HEAD_TURNS || *i >= tail_start || evidence.binary_search(i).is_ok())
        .map(|(_, message)| message)
        .collect();
    len - history.len()
}
