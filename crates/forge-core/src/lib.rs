use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

pub const DEFAULT_BASE_URL: &str = "http://localhost:1234";
pub const DEFAULT_CHAT_PATH: &str = "/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-20b";
pub const DEFAULT_REPORT_FILE: &str = "REVIEW_REPORT.md";
pub const DEFAULT_PLAN_FILE: &str = "implementation.md";

/// Verdict tags a review must end with.
pub const VERDICT_PASS: &str = "[VERDICT: PASS]";
pub const VERDICT_FAIL: &str = "[VERDICT: FAIL]";

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".forge")
}

// ── Conversation ─────────────────────────────────────────────────────────────

/// A message in a multi-turn conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
    #[serde(rename = "assistant")]
    Assistant { content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content } => {
                content
            }
        }
    }

    pub fn set_content(&mut self, text: impl Into<String>) {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content } => {
                *content = text.into();
            }
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }
}

/// Streaming chat request sent to the completion API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// A single chunk emitted during streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// A content text delta.
    ContentDelta(String),
    /// Streaming is done.
    Done,
}

/// Callback type for receiving streaming chunks.
pub type StreamCallback = Arc<dyn Fn(StreamChunk) + Send + Sync>;

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared between a run and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The underlying flag, for signal handlers that set it directly.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Tools ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ReadFile,
    WriteFile,
    ReplaceInFile,
    BulkWrite,
    ApplyBlueprint,
    ListFiles,
    BulkRead,
    ScaffoldProject,
    LogInstructions,
    RequestReview,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown tool `{0}`")]
pub struct UnknownTool(pub String);

impl ToolName {
    pub const ALL: [ToolName; 10] = [
        ToolName::ReadFile,
        ToolName::WriteFile,
        ToolName::ReplaceInFile,
        ToolName::BulkWrite,
        ToolName::ApplyBlueprint,
        ToolName::ListFiles,
        ToolName::BulkRead,
        ToolName::ScaffoldProject,
        ToolName::LogInstructions,
        ToolName::RequestReview,
    ];

    pub fn from_api_name(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_api_name().eq_ignore_ascii_case(s.trim()))
    }

    pub fn as_api_name(&self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ReplaceInFile => "replace_in_file",
            Self::BulkWrite => "bulk_write",
            Self::ApplyBlueprint => "apply_blueprint",
            Self::ListFiles => "list_files",
            Self::BulkRead => "bulk_read",
            Self::ScaffoldProject => "scaffold_project",
            Self::LogInstructions => "log_instructions",
            Self::RequestReview => "request_review",
        }
    }

    /// Parameter shape shown to the model in the system prompt.
    pub fn parameter_shape(&self) -> &'static str {
        match self {
            Self::ReadFile => "{path}",
            Self::WriteFile => "{path, content}",
            Self::ReplaceInFile => "{path, search, replace}",
            Self::BulkWrite => "{files:[{path,content}]}",
            Self::ApplyBlueprint => "{content}",
            Self::ListFiles => "{path}",
            Self::BulkRead => "{paths:[]}",
            Self::ScaffoldProject => "{type, name, flat?}",
            Self::LogInstructions => "{instructions}",
            Self::RequestReview => "{summary?}",
        }
    }

    /// Tools that change files inside the workspace. The log tools only
    /// append to the runtime log and are not counted as mutations.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::WriteFile
                | Self::ReplaceInFile
                | Self::BulkWrite
                | Self::ApplyBlueprint
                | Self::ScaffoldProject
        )
    }

    /// Read/list tools: the ones the no-progress guard counts.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadFile | Self::ListFiles | Self::BulkRead)
    }

    /// Whether a call is meaningful without a PARAMETERS block.
    pub fn params_optional(&self) -> bool {
        matches!(self, Self::ListFiles | Self::RequestReview)
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: *self,
            parameter_shape: self.parameter_shape(),
            is_mutating: self.is_mutating(),
        }
    }
}

impl FromStr for ToolName {
    type Err = UnknownTool;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_api_name(s).ok_or_else(|| UnknownTool(s.to_string()))
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: ToolName,
    pub parameter_shape: &'static str,
    pub is_mutating: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: ToolName,
    pub params: Value,
    /// Directory the call resolves paths against (root or pinned sub-folder).
    pub workspace: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
}

impl ToolResult {
    pub fn from_output(output: Value) -> Self {
        let success = output.get("error").is_none();
        Self { success, output }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.output.get("error").and_then(|v| v.as_str())
    }
}

pub trait ToolHost {
    /// Never fails: expected and unexpected failures both come back as
    /// `{"error": ...}` outputs.
    fn execute(&self, call: &ToolCall) -> ToolResult;
}

// ── Events ───────────────────────────────────────────────────────────────────

/// Progress and outcome events delivered to the run's sink. Every run emits
/// exactly one of `Response`, `Failed` or `Error`, and it is the last event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Chunk { content: String },
    Status { text: String },
    Thought { content: String },
    ToolCall { tool: String, parameters: Value },
    ToolResult { tool: String, result: Value },
    ToolError { tool: String, error: String },
    Warning { message: String },
    FormatRecovery { attempt: u32 },
    Response { content: String },
    Failed { reason: String },
    Error { message: String },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Response { .. } | Self::Failed { .. } | Self::Error { .. }
        )
    }
}

pub type EventSink = Arc<dyn Fn(AgentEvent) + Send + Sync>;

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".forge/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    /// Defaults, then `config.toml`, then user/project/local settings JSON,
    /// then environment overrides.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        let mut cfg = Self::load_layers(&Self::legacy_toml_path(workspace), &paths)?;
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    fn load_layers(legacy_toml: &Path, json_layers: &[PathBuf]) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        if legacy_toml.exists() {
            let raw = fs::read_to_string(legacy_toml)?;
            let legacy_cfg: AppConfig = toml::from_str(&raw)?;
            merge_json_value(&mut merged, &serde_json::to_value(legacy_cfg)?);
        }

        for path in json_layers {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: Value = serde_json::from_str(&raw)
                .map_err(|err| anyhow::anyhow!("invalid settings file {}: {err}", path.display()))?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup("LM_STUDIO_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.llm.base_url = base_url.trim().trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("LM_STUDIO_MODEL").filter(|v| !v.trim().is_empty()) {
            self.llm.model = model.trim().to_string();
        }
        if let Some(steps) = lookup("AGENT_MAX_STEPS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|steps| *steps > 0)
        {
            self.agent.max_steps = steps;
        }
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_obj), Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub chat_path: String,
    pub model: String,
    pub temperature: Option<f32>,
    /// Absolute limit for one streamed completion.
    pub timeout_seconds: u64,
    /// Longest silence tolerated between two received chunks.
    pub stall_timeout_seconds: u64,
    pub api_key: Option<String>,
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            timeout_seconds: 120,
            stall_timeout_seconds: 45,
            api_key: None,
            api_key_env: "LM_STUDIO_API_KEY".to_string(),
        }
    }
}

impl LlmConfig {
    pub fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.chat_path
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps: usize,
    /// History length (turns) that triggers pruning.
    pub prune_threshold: usize,
    /// Most recent turns kept by pruning.
    pub prune_window: usize,
    /// Older evidence turns (verdicts, report/plan mentions) kept by pruning.
    pub prune_evidence_cap: usize,
    pub max_result_chars: usize,
    pub max_file_echo_chars: usize,
    pub report_file: String,
    pub plan_file: String,
    /// Generate mode must call `request_review` before `finish`.
    pub require_review_request: bool,
    pub guards: GuardCeilings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            prune_threshold: 50,
            prune_window: 30,
            prune_evidence_cap: 8,
            max_result_chars: 10_000,
            max_file_echo_chars: 6_000,
            report_file: DEFAULT_REPORT_FILE.to_string(),
            plan_file: DEFAULT_PLAN_FILE.to_string(),
            require_review_request: false,
            guards: GuardCeilings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardCeilings {
    /// Consecutive identical actions that trigger the duplicate guard.
    pub duplicate_trigger: u32,
    /// Consecutive identical actions still answered with a nudge.
    pub duplicate: u32,
    pub no_progress_trigger: u32,
    pub no_progress_after_step: usize,
    pub chain_error: u32,
    pub premature_finish: u32,
    /// Finish is only considered premature before this step.
    pub premature_finish_before_step: usize,
    pub review_write_block: u32,
    pub review_report: u32,
    pub review_verdict: u32,
    pub review_request: u32,
    pub follow_up: u32,
}

impl Default for GuardCeilings {
    fn default() -> Self {
        Self {
            duplicate_trigger: 3,
            duplicate: 4,
            no_progress_trigger: 3,
            no_progress_after_step: 5,
            chain_error: 3,
            premature_finish: 3,
            premature_finish_before_step: 10,
            review_write_block: 2,
            review_report: 3,
            review_verdict: 3,
            review_request: 3,
            follow_up: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub list_skip_dirs: Vec<String>,
    pub list_max_depth: usize,
    pub bulk_read_limit: usize,
    /// File name of the hand-off log inside the runtime directory.
    pub handoff_log: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            list_skip_dirs: [
                "node_modules",
                ".git",
                "dist",
                ".nuxt",
                ".output",
                ".vite",
                ".next",
                ".cache",
                "build",
                "coverage",
                "bower_components",
                ".forge",
            ]
            .into_iter()
            .map(ToString::to_string)
            .collect(),
            list_max_depth: 5,
            bulk_read_limit: 20,
            handoff_log: "handoff.log".to_string(),
        }
    }
}
