use crate::mode::Mode;
use forge_core::{ToolName, ToolResult};
use forge_tools::params::PathParams;
use serde::Serialize;
use serde_json::Value;

/// Facts established by successful tool results during one run. Flags only
/// ever flip to `true`; guards read these instead of scanning history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentState {
    pub report_saved: bool,
    pub review_requested: bool,
    pub code_modified: bool,
    pub plan_written: bool,
    pub report_read: bool,
}

impl AgentState {
    pub fn record(&mut self, tool: ToolName, params: &Value, result: &ToolResult, mode: &Mode) {
        if !result.success {
            return;
        }
        match tool {
            ToolName::WriteFile | ToolName::ReplaceInFile => {
                self.mark_written(&PathParams::from_value(params).path, mode);
            }
            ToolName::BulkWrite | ToolName::ApplyBlueprint => {
                for path in succeeded_paths(&result.output) {
                    self.mark_written(path, mode);
                }
            }
            ToolName::ScaffoldProject => {
                self.code_modified = true;
                let files = result.output["files_created"].as_array();
                if files
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str)
                    .any(|path| mode.is_plan_path(path))
                {
                    self.plan_written = true;
                }
            }
            ToolName::ReadFile => {
                if mode.is_report_path(&PathParams::from_value(params).path) {
                    self.report_read = true;
                }
            }
            ToolName::BulkRead => {
                if succeeded_paths(&result.output).any(|path| mode.is_report_path(path)) {
                    self.report_read = true;
                }
            }
            ToolName::RequestReview => self.review_requested = true,
            ToolName::ListFiles | ToolName::LogInstructions => {}
        }
    }

    fn mark_written(&mut self, path: &str, mode: &Mode) {
        if mode.is_report_path(path) {
            self.report_saved = true;
        } else if mode.is_plan_path(path) {
            self.plan_written = true;
        } else if !path.trim().is_empty() {
            self.code_modified = true;
        }
    }
}

/// Paths of the per-file entries in a bulk result that came back clean.
fn succeeded_paths(output: &Value) -> impl Iterator<Item = &str> {
    output["results"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|entry| entry.get("error").is_none())
        .filter_map(|entry| entry["path"].as_str())
}
