use crate::guards::GuardKind;
use forge_core::ChatMessage;

pub const REJECTED_MARKER: &str = "[REJECTED: unparseable output removed]";
pub const DIRECTIVE_PREFIX: &str = "[SYSTEM DIRECTIVE #";

const RECOVERY_EXAMPLE: &str =
    "THOUGHT: I need to see the project files first.\n\nACTION: list_files\n\nPARAMETERS: {\"path\": \".\"}";
const FAST_RECOVERY_EXAMPLE: &str = "ACTION: list_files\n\nPARAMETERS: {\"path\": \".\"}";

/// Writes corrective turns into the conversation. Directives are numbered
/// per run.
#[derive(Debug, Default)]
pub struct Injector {
    issued: u32,
}

impl Injector {
    pub fn issued(&self) -> u32 {
        self.issued
    }

    fn directive(&mut self, text: &str) -> String {
        self.issued += 1;
        format!("{DIRECTIVE_PREFIX}{}] {text}", self.issued)
    }

    /// Assistant acknowledgement plus a numbered user directive.
    pub fn nudge(&mut self, history: &mut Vec<ChatMessage>, kind: GuardKind, text: &str) {
        history.push(ChatMessage::assistant(kind.acknowledgement()));
        let directive = self.directive(text);
        history.push(ChatMessage::user(directive));
    }

    /// Blanks the unreadable assistant turn and shows the exact format.
    pub fn format_recovery(&mut self, history: &mut Vec<ChatMessage>, fast: bool) {
        if let Some(last) = history.iter_mut().rev().find(|m| m.is_assistant()) {
            last.set_content(REJECTED_MARKER);
        }
        let example = if fast {
            FAST_RECOVERY_EXAMPLE
        } else {
            RECOVERY_EXAMPLE
        };
        let directive = self.directive(&format!(
            "Your last reply could not be read: the markers were fused together. Reply EXACTLY in this format, each marker on its own line:\n\n{example}"
        ));
        history.push(ChatMessage::user(directive));
    }
}
