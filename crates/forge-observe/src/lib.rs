use anyhow::Result;
use chrono::Utc;
use forge_core::runtime_dir;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const ERROR_LOG_FILE: &str = "agent-errors.log";

pub struct Observer {
    log_path: PathBuf,
    verbose: bool,
}

impl Observer {
    pub fn new(workspace: &Path) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: dir.join(ERROR_LOG_FILE),
            verbose: false,
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Enable or disable verbose logging to stderr.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Log a message to stderr with `[forge]` prefix when verbose mode is on.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[forge] {msg}");
        }
    }

    /// Log a warning: always written to the log file and to stderr.
    pub fn warn_log(&self, msg: &str) {
        eprintln!("[forge WARN] {msg}");
        let _ = self.append_log_line(&format!("[{}] [WARN] {msg}\n", Utc::now().to_rfc3339()));
    }

    /// Append `[ts] [KIND] message` plus optional pretty-printed metadata.
    /// Failures to write are reported on stderr and otherwise swallowed so a
    /// full disk never takes a run down.
    pub fn record_error(&self, kind: &str, message: &str, metadata: Option<&Value>) {
        let mut entry = format!(
            "[{}] [{}] {message}\n",
            Utc::now().to_rfc3339(),
            kind.to_ascii_uppercase()
        );
        if let Some(meta) = metadata {
            let pretty = serde_json::to_string_pretty(meta).unwrap_or_else(|_| meta.to_string());
            entry.push_str(&format!("      Metadata: {pretty}\n"));
        }
        if let Err(err) = self.append_log_line(&entry) {
            eprintln!("[forge] failed to write {}: {err}", self.log_path.display());
        }
        self.verbose_log(&format!("{kind}: {message}"));
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}
