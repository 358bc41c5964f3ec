//! Short, model-facing summaries of tool results.
//!
//! The summary tells the model what happened and what to do next. Read and
//! list actions also carry the raw payload so the model can see the content.

use crate::mode::Mode;
use forge_core::{ToolName, ToolResult};
use forge_tools::params::PathParams;
use serde_json::Value;

pub const TRUNCATION_NOTICE: &str = "\n\n... [TRUNCATED - output too large] ...";
const FILE_ECHO_NOTICE: &str = "\n... [TRUNCATED]";

/// Cuts `text` at `limit` characters, appending `notice` when it did.
pub fn truncate_chars(text: &str, limit: usize, notice: &str) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{notice}", &text[..cut]),
        None => text.to_string(),
    }
}

fn error_advice(error: &str) -> &'static str {
    let lower = error.to_ascii_lowercase();
    if lower.contains("is a directory") {
        "The path you provided is a DIRECTORY. Provide a specific file name (for example index.js) inside that directory."
    } else if lower.contains("not found") {
        "Check the path carefully. Use list_files to verify the directory structure."
    } else {
        "Check your parameters and try a different approach."
    }
}

fn results(output: &Value) -> &[Value] {
    output["results"].as_array().map(Vec::as_slice).unwrap_or_default()
}

pub fn summarize(tool: ToolName, params: &Value, result: &ToolResult, mode: &Mode) -> String {
    if let Some(error) = result.error_message() {
        return format!("**Error**: {error}\n\n**ADVICE**: {}", error_advice(error));
    }
    let review = mode.is_review();
    let output = &result.output;
    let path = PathParams::from_value(params).path;
    match tool {
        ToolName::ScaffoldProject => {
            let rows = output["files_created"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .map(|f| format!("| {f} | Created |"))
                .collect::<Vec<_>>()
                .join("\n");
            let steps = output["next_steps"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .map(|s| format!("- `{s}`"))
                .collect::<Vec<_>>();
            let mut out = format!(
                "### Project Scaffolding Complete\n\nProject **{}** created successfully.\n\n| File | Status |\n| :--- | :--- |\n{rows}",
                output["name"].as_str().unwrap_or_default()
            );
            if !steps.is_empty() {
                out.push_str("\n\n**Next Steps:**\n");
                out.push_str(&steps.join("\n"));
            }
            out
        }
        ToolName::BulkWrite | ToolName::ApplyBlueprint => {
            let entries = results(output);
            let ok = entries.iter().filter(|r| r.get("error").is_none()).count();
            let rows = entries
                .iter()
                .map(|r| {
                    let status = match r["error"].as_str() {
                        Some(err) => format!("Failed: {err}"),
                        None => "Success".to_string(),
                    };
                    format!("| {} | {status} |", r["path"].as_str().unwrap_or("unknown"))
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "### Bulk Updates Complete\n\nSuccessfully processed **{ok}** files.\n\n| File | Result |\n| :--- | :--- |\n{rows}"
            )
        }
        ToolName::WriteFile => {
            let next = if review {
                "Analyze the changes and continue your review."
            } else if mode.is_plan_path(&path) {
                "**PLAN UPDATED. PROCEED IMMEDIATELY TO IMPLEMENTATION. DO NOT STOP.**"
            } else {
                "CONTINUE to the next file or FINISH if the task is complete."
            };
            format!("### File Updated\nFile **{path}** written successfully.\n\n{next}")
        }
        ToolName::ReplaceInFile => {
            let next = if review {
                "Analyze the modification and continue your review."
            } else {
                "CONTINUE to the next modification or FINISH if the task is complete."
            };
            format!("### Edit Complete\nFile **{path}** modified successfully.\n\n{next}")
        }
        ToolName::ReadFile => {
            let next = if review {
                "Content retrieved. ANALYZE and provide feedback."
            } else {
                "Content retrieved. ANALYZE and proceed to PLAN or IMPLEMENT."
            };
            format!("### File Read\n{next}")
        }
        ToolName::BulkRead => {
            let count = results(output)
                .iter()
                .filter(|r| r.get("error").is_none())
                .count();
            if review {
                format!("### Bulk Read Complete\nRetrieved **{count}** files. ANALYZE the context and GIVE ADVICE now.")
            } else {
                format!(
                    "### Bulk Read Complete\nRetrieved **{count}** files. ANALYZE the context and UPDATE {} now.",
                    mode.plan_file()
                )
            }
        }
        ToolName::ListFiles => {
            let count = output["files_list"].as_array().map_or(0, Vec::len);
            if review {
                format!("### Folders Scanned\nFound **{count}** files. READ the relevant files now to begin your audit.")
            } else {
                format!("### Folders Scanned\nFound **{count}** files. READ the relevant files now to build context.")
            }
        }
        ToolName::LogInstructions => "### Instructions Logged\nCONTINUE with the task.".to_string(),
        ToolName::RequestReview => {
            "### Review Requested\nThe changes are queued for review. FINISH with a summary of your work."
                .to_string()
        }
    }
}

/// The user turn that carries a tool result back to the model.
pub fn tool_result_turn(
    tool: ToolName,
    summary: &str,
    result: &ToolResult,
    max_chars: usize,
) -> String {
    let mut turn = format!("Tool result ({tool}):\n{summary}");
    if tool.is_read_only() && result.success {
        let payload = serde_json::to_string_pretty(&result.output).unwrap_or_default();
        turn.push_str("\n\n");
        turn.push_str(&truncate_chars(&payload, max_chars, TRUNCATION_NOTICE));
    }
    turn
}

/// Shown after a failed `replace_in_file` so the next search block can be
/// built from the real file.
pub fn replace_failure_context(path: &str, content: &str, max_chars: usize) -> String {
    let shown = truncate_chars(content, max_chars, FILE_ECHO_NOTICE);
    format!(
        "CURRENT FILE CONTENT OF \"{path}\":\n```\n{shown}\n```\n\nINSTRUCTION: Your search block was NOT found. Use the current file content above and either:\n  1. Fix your search block to match exactly, OR\n  2. Use write_file with the COMPLETE corrected file content instead."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeKind;
    use forge_core::AgentConfig;
    use serde_json::json;

    fn mode(kind: ModeKind) -> Mode {
        Mode::new(kind, false, &AgentConfig::default(), None)
    }

    #[test]
    fn errors_carry_advice() {
        let result = ToolResult::from_output(json!({"error": "src is a directory; use list_files."}));
        let text = summarize(ToolName::ReadFile, &json!({"path": "src"}), &result, &mode(ModeKind::Generate));
        assert!(text.starts_with("**Error**: src is a directory"));
        assert!(text.contains("DIRECTORY"));

        let result = ToolResult::from_output(json!({"error": "File not found: a.js"}));
        let text = summarize(ToolName::ReadFile, &json!({}), &result, &mode(ModeKind::Generate));
        assert!(text.contains("Use list_files"));
    }

    #[test]
    fn plan_writes_push_to_implementation() {
        let ok = ToolResult::from_output(json!({"success": true}));
        let text = summarize(
            ToolName::WriteFile,
            &json!({"path": "implementation.md"}),
            &ok,
            &mode(ModeKind::Generate),
        );
        assert!(text.contains("PLAN UPDATED"));
        let text = summarize(
            ToolName::WriteFile,
            &json!({"path": "REVIEW_REPORT.md"}),
            &ok,
            &mode(ModeKind::Review),
        );
        assert!(text.contains("continue your review"));
    }

    #[test]
    fn bulk_table_counts_successes() {
        let result = ToolResult::from_output(json!({"success": true, "results": [
            {"path": "a.js", "success": true},
            {"path": "b.js", "error": "Write aborted"},
        ]}));
        let text = summarize(ToolName::BulkWrite, &json!({}), &result, &mode(ModeKind::Generate));
        assert!(text.contains("Successfully processed **1** files."));
        assert!(text.contains("| b.js | Failed: Write aborted |"));
    }

    #[test]
    fn read_results_attach_truncated_payload() {
        let big = "x".repeat(200);
        let result = ToolResult::from_output(json!({"path": "a.txt", "content": big}));
        let turn = tool_result_turn(ToolName::ReadFile, "### File Read", &result, 50);
        assert!(turn.starts_with("Tool result (read_file):\n### File Read\n\n{"));
        assert!(turn.ends_with(TRUNCATION_NOTICE));

        let ok = ToolResult::from_output(json!({"success": true}));
        let turn = tool_result_turn(ToolName::WriteFile, "done", &ok, 50);
        assert_eq!(turn, "Tool result (write_file):\ndone");
    }

    #[test]
    fn replace_failure_echo_is_capped() {
        let text = replace_failure_context("a.js", &"y".repeat(20), 10);
        assert!(text.contains("```\nyyyyyyyyyy\n... [TRUNCATED]\n```"));
        assert!(text.contains("search block was NOT found"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2, "~"), "hé~");
        assert_eq!(truncate_chars("hi", 2, "~"), "hi");
    }
}
