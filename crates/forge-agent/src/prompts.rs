//! System prompts for the ReAct loop.
//!
//! One prompt is assembled per run from the mode: the visible tool list,
//! the rigid THOUGHT / ACTION / PARAMETERS call format, and the rules that
//! go with generate or review work.

use forge_core::ToolName;

const GENERATE_ROLE: &str = "Your primary goal is to MODIFY THE FILESYSTEM using tools. Never just describe code.";
const REVIEW_ROLE: &str = "You are in REVIEW MODE. Your goal is to AUDIT the codebase and give expert advice. You do not change source files.";

const CALL_FORMAT: &str = r#"TOOL CALL FORMAT (MANDATORY):
THOUGHT: your reasoning first

ACTION: the exact tool name only

PARAMETERS: one valid JSON object for that tool

Never merge these markers. Put a blank line between them."#;

const FAST_CALL_FORMAT: &str = r#"TOOL CALL FORMAT (MANDATORY):
ACTION: the exact tool name only

PARAMETERS: one valid JSON object for that tool

Never merge these markers. Put a blank line between them."#;

const FINISH_FORMAT: &str = r#"FINISH FORMAT:
ACTION: finish

PARAMETERS: {"response": "A readable markdown summary with headers and bullet points."}"#;

const GENERATE_RULES: &str = r#"RULES:
1. Never stop after list_files or read_file. Work in order: scan, read, plan, implement.
2. Always use tools to create or edit files. Never output code blocks as plain text.
3. Update the plan file first, then implement it.
4. Do not call finish until the implementation is complete.
5. Write complete files. No placeholders such as "implementation goes here".
6. If a tool returns an error, change your parameters or approach. Never repeat a failed call."#;

fn review_rules(report_file: &str) -> String {
    format!(
        r#"RULES:
1. Do not modify source files. Writes are disabled except for {report_file}.
2. Analyse the workspace file by file: explain purpose and logic, then give concrete advice with short code examples.
3. Save the full review to {report_file} with write_file before finishing.
4. The finish response must contain exactly one verdict tag: [VERDICT: PASS] or [VERDICT: FAIL].
5. If a tool returns an error, change your parameters or approach. Never repeat a failed call."#
    )
}

pub struct PromptInputs<'a> {
    pub review: bool,
    pub fast: bool,
    pub tools: &'a [ToolName],
    pub report_file: &'a str,
    pub plan_file: &'a str,
    pub target_folder: Option<&'a str>,
}

fn tool_lines(tools: &[ToolName], review: bool, report_file: &str) -> String {
    tools
        .iter()
        .map(|tool| {
            let note = if review && tool.is_mutating() {
                format!("  ({report_file} only)")
            } else {
                String::new()
            };
            format!(
                "  {:<18} {}{note}",
                tool.as_api_name(),
                tool.parameter_shape()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the system prompt for one run.
pub fn build_system_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut parts = vec![format!(
        "You are an expert agentic software developer.\n{}",
        if inputs.review { REVIEW_ROLE } else { GENERATE_ROLE }
    )];
    if let Some(folder) = inputs.target_folder {
        parts.push(format!(
            "CURRENT WORKSPACE ROOT: \"{folder}\" (tool paths are relative to this folder)"
        ));
    }
    parts.push(format!(
        "TOOLS:\n{}",
        tool_lines(inputs.tools, inputs.review, inputs.report_file)
    ));
    parts.push(if inputs.fast { FAST_CALL_FORMAT } else { CALL_FORMAT }.to_string());
    parts.push(FINISH_FORMAT.to_string());
    if inputs.review {
        parts.push(review_rules(inputs.report_file));
    } else {
        parts.push(GENERATE_RULES.replace("the plan file", inputs.plan_file));
    }
    parts.join("\n\n")
}
