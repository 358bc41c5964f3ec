use anyhow::Result;
use forge_core::{CancelToken, ChatRequest, LlmConfig, StreamCallback, StreamChunk};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::error::Error as StdError;
use std::io::BufRead;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// How often the waiting side re-checks cancellation and the stall window.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait LlmClient {
    /// Stream one assistant turn. `cb` receives every content delta as it
    /// arrives, then [`StreamChunk::Done`]. Returns the assembled text.
    ///
    /// Fails with a [`TransportError`] (inside the `anyhow::Error`) when the
    /// token is cancelled, the stream stalls, or the server is unusable.
    fn complete_streaming(
        &self,
        req: &ChatRequest,
        cancel: &CancelToken,
        cb: StreamCallback,
    ) -> Result<String>;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Agent stopped by user.")]
    Cancelled,
    #[error("Model stream stalled: no data received for {0}s.")]
    Stalled(u64),
    #[error("Model request timed out ({0}s limit).")]
    Timeout(u64),
    #[error("Cannot reach the model server at {0}. Make sure it is running.")]
    Unreachable(String),
    #[error("Model server error (HTTP {status}): {detail}")]
    Status { status: u16, detail: String },
    #[error("Stream read error: {0}")]
    Stream(String),
}

impl TransportError {
    /// Find a transport error inside an `anyhow` chain.
    pub fn find(err: &anyhow::Error) -> Option<&TransportError> {
        err.chain().find_map(|cause| cause.downcast_ref::<TransportError>())
    }
}

/// Client for OpenAI-compatible local servers (LM Studio, llama.cpp, vLLM).
#[derive(Debug, Clone)]
pub struct LocalClient {
    cfg: LlmConfig,
    client: Client,
}

enum StreamEvent {
    Connected,
    Line(String),
    End,
    Failed(TransportError),
}

impl LocalClient {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self { cfg, client })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.cfg
    }

    fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.cfg.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.cfg.api_key.clone().filter(|key| !key.trim().is_empty()))
    }

    fn build_payload(&self, req: &ChatRequest) -> Value {
        let model = if req.model.trim().is_empty() {
            self.cfg.model.clone()
        } else {
            req.model.clone()
        };
        let messages = req
            .messages
            .iter()
            .map(|m| json!({"role": m.role(), "content": m.content()}))
            .collect::<Vec<_>>();
        let mut payload = json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });
        if let Some(temperature) = req.temperature.or(self.cfg.temperature) {
            payload["temperature"] = json!(temperature);
        }
        payload
    }

    /// Issue the request on a helper thread that forwards body lines. The
    /// thread ends on its own once the receiver is dropped.
    fn spawn_reader(&self, payload: Value) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let endpoint = self.cfg.endpoint();
        let base_url = self.cfg.base_url.clone();
        let timeout_seconds = self.cfg.timeout_seconds;
        let api_key = self.resolve_api_key();

        thread::spawn(move || {
            let mut request = client.post(&endpoint).json(&payload);
            if let Some(key) = api_key {
                request = request.bearer_auth(key);
            }
            let resp = match request.send() {
                Ok(resp) => resp,
                Err(err) => {
                    let _ = tx.send(StreamEvent::Failed(format_transport_error(
                        &err,
                        &base_url,
                        timeout_seconds,
                    )));
                    return;
                }
            };
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().unwrap_or_default();
                let _ = tx.send(StreamEvent::Failed(TransportError::Status {
                    status: status.as_u16(),
                    detail: api_error_detail(&body),
                }));
                return;
            }
            if tx.send(StreamEvent::Connected).is_err() {
                return;
            }
            let reader = std::io::BufReader::new(resp);
            for line_result in reader.lines() {
                let event = match line_result {
                    Ok(line) => StreamEvent::Line(line),
                    Err(err) => {
                        let _ = tx.send(StreamEvent::Failed(format_read_error(
                            &err,
                            timeout_seconds,
                        )));
                        return;
                    }
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamEvent::End);
        });
        rx
    }
}

impl LlmClient for LocalClient {
    fn complete_streaming(
        &self,
        req: &ChatRequest,
        cancel: &CancelToken,
        cb: StreamCallback,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled.into());
        }
        let stall = Duration::from_secs(self.cfg.stall_timeout_seconds.max(1));
        let rx = self.spawn_reader(self.build_payload(req));

        let mut text = String::new();
        let mut last_activity: Option<Instant> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled.into());
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(StreamEvent::Connected) => last_activity = Some(Instant::now()),
                Ok(StreamEvent::Line(line)) => {
                    last_activity = Some(Instant::now());
                    match parse_sse_line(&line) {
                        Some(SseFrame::Delta(delta)) => {
                            text.push_str(&delta);
                            cb(StreamChunk::ContentDelta(delta));
                        }
                        Some(SseFrame::Done) => break,
                        None => {}
                    }
                }
                Ok(StreamEvent::End) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(StreamEvent::Failed(err)) => return Err(err.into()),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(at) = last_activity
                        && at.elapsed() >= stall
                    {
                        return Err(TransportError::Stalled(stall.as_secs()).into());
                    }
                }
            }
        }
        cb(StreamChunk::Done);
        Ok(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SseFrame {
    Delta(String),
    Done,
}

/// Decode one SSE line. Non-data lines, empty deltas and frames whose JSON
/// does not parse (a truncated final frame) yield `None`.
fn parse_sse_line(line: &str) -> Option<SseFrame> {
    let trimmed = line.trim();
    let data = trimmed.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseFrame::Done);
    }
    let value: Value = serde_json::from_str(data).ok()?;
    extract_delta(&value).map(SseFrame::Delta)
}

/// Pull the text delta out of the response shapes local servers emit:
/// chat-completion deltas, full messages, or a structured `output` array.
pub fn extract_delta(value: &Value) -> Option<String> {
    if let Some(choice) = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
    {
        let text = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
            .or_else(|| {
                choice
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_str())
            });
        return text.filter(|t| !t.is_empty()).map(ToString::to_string);
    }

    if let Some(output) = value.get("output").and_then(|v| v.as_array()) {
        let message = output
            .iter()
            .find(|block| block.get("type").and_then(|t| t.as_str()) == Some("message"))
            .and_then(|block| block.get("content"))
            .map(content_text)
            .filter(|t| !t.is_empty());
        if message.is_some() {
            return message;
        }
        let joined = output
            .iter()
            .filter_map(|block| block.get("content"))
            .map(content_text)
            .collect::<String>();
        let joined = joined.trim();
        return (!joined.is_empty()).then(|| joined.to_string());
    }

    ["output", "response", "text", "content"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| {
                part.get("text")
                    .and_then(|t| t.as_str())
                    .or_else(|| part.as_str())
            })
            .collect(),
        _ => String::new(),
    }
}

fn api_error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(ToString::to_string))
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Map a send failure to the user-facing transport taxonomy.
fn format_transport_error(
    err: &reqwest::Error,
    base_url: &str,
    timeout_seconds: u64,
) -> TransportError {
    let inner_msg = err
        .source()
        .map(|e| e.to_string())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let is_dns = inner_msg.contains("dns")
        || inner_msg.contains("resolve")
        || inner_msg.contains("name or service not known")
        || inner_msg.contains("no such host")
        || inner_msg.contains("getaddrinfo");

    if err.is_timeout() {
        TransportError::Timeout(timeout_seconds)
    } else if is_dns || err.is_connect() {
        TransportError::Unreachable(base_url.to_string())
    } else {
        TransportError::Stream(err.to_string())
    }
}

fn format_read_error(err: &std::io::Error, timeout_seconds: u64) -> TransportError {
    let message = err.to_string();
    if err.kind() == std::io::ErrorKind::TimedOut || message.to_ascii_lowercase().contains("timed out")
    {
        TransportError::Timeout(timeout_seconds)
    } else {
        TransportError::Stream(message)
    }
}
