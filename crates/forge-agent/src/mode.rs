use crate::prompts::{PromptInputs, build_system_prompt};
use forge_core::{AgentConfig, ToolName};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Generate,
    Review,
}

/// Which guards a mode arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuardSet {
    pub duplicate: bool,
    pub no_progress: bool,
    pub chain_error: bool,
    pub premature_finish: bool,
    pub review_write_block: bool,
    pub review_report: bool,
    pub review_verdict: bool,
    pub review_request: bool,
    pub follow_up: bool,
}

/// Fixed for the whole run: prompt, tool allow-list and armed guards.
#[derive(Debug, Clone)]
pub struct Mode {
    pub kind: ModeKind,
    pub fast: bool,
    pub guards: GuardSet,
    tools: Vec<ToolName>,
    report_file: String,
    plan_file: String,
    system_prompt: String,
}

impl Mode {
    pub fn new(kind: ModeKind, fast: bool, cfg: &AgentConfig, target_folder: Option<&str>) -> Self {
        let review = kind == ModeKind::Review;
        let tools = if review {
            vec![
                ToolName::ReadFile,
                ToolName::ListFiles,
                ToolName::BulkRead,
                ToolName::WriteFile,
                ToolName::ReplaceInFile,
                ToolName::LogInstructions,
            ]
        } else {
            ToolName::ALL.to_vec()
        };
        let guards = if review {
            GuardSet {
                duplicate: true,
                chain_error: true,
                review_write_block: true,
                review_report: true,
                review_verdict: true,
                ..GuardSet::default()
            }
        } else {
            GuardSet {
                duplicate: true,
                no_progress: true,
                chain_error: true,
                premature_finish: true,
                review_request: cfg.require_review_request,
                follow_up: true,
                ..GuardSet::default()
            }
        };
        let system_prompt = build_system_prompt(&PromptInputs {
            review,
            fast,
            tools: &tools,
            report_file: &cfg.report_file,
            plan_file: &cfg.plan_file,
            target_folder,
        });
        Self {
            kind,
            fast,
            guards,
            tools,
            report_file: cfg.report_file.clone(),
            plan_file: cfg.plan_file.clone(),
            system_prompt,
        }
    }

    pub fn is_review(&self) -> bool {
        self.kind == ModeKind::Review
    }

    pub fn tools(&self) -> &[ToolName] {
        &self.tools
    }

    /// Review mode still parses mutating calls so the write-block guard can
    /// count them.
    pub fn accepts(&self, tool: ToolName) -> bool {
        self.tools.contains(&tool) || (self.is_review() && tool.is_mutating())
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn report_file(&self) -> &str {
        &self.report_file
    }

    pub fn plan_file(&self) -> &str {
        &self.plan_file
    }

    pub fn is_report_path(&self, path: &str) -> bool {
        file_name_is(path, &self.report_file)
    }

    pub fn is_plan_path(&self, path: &str) -> bool {
        file_name_is(path, &self.plan_file)
    }
}

fn file_name_is(path: &str, name: &str) -> bool {
    Path::new(path.trim())
        .file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|f| f.eq_ignore_ascii_case(name))
}
