use anyhow::{Result, bail};
use chrono::Utc;
use serde_json::{Value, json};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Marker a reviewer (or the history pruner) looks for.
pub const REVIEW_REQUESTED_MARKER: &str = "[REVIEW_REQUESTED]";
pub const INSTRUCTIONS_MARKER: &str = "[INSTRUCTIONS]";

fn append(log_path: &Path, marker: &str, text: &str) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    writeln!(f, "[{}] {marker} {}", Utc::now().to_rfc3339(), text.trim())?;
    Ok(())
}

pub fn log_instructions(log_path: &Path, instructions: Option<&str>) -> Result<Value> {
    let Some(text) = instructions else {
        bail!("\"instructions\" parameter is required.");
    };
    append(log_path, INSTRUCTIONS_MARKER, text)?;
    Ok(json!({
        "success": true,
        "logged": INSTRUCTIONS_MARKER,
        "chars": text.chars().count(),
    }))
}

pub fn request_review(log_path: &Path, summary: Option<&str>) -> Result<Value> {
    let summary = summary.unwrap_or("Ready for review.");
    append(log_path, REVIEW_REQUESTED_MARKER, summary)?;
    Ok(json!({
        "success": true,
        "logged": REVIEW_REQUESTED_MARKER,
        "summary": summary,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_appended_with_markers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join(".forge/handoff.log");
        log_instructions(&log, Some("Run npm install first")).expect("log");
        request_review(&log, None).expect("review");
        let text = fs::read_to_string(&log).expect("read");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[INSTRUCTIONS] Run npm install first"));
        assert!(lines[1].ends_with("[REVIEW_REQUESTED] Ready for review."));
        assert!(log_instructions(&log, None).is_err());
    }
}
