//! Shared fixtures for agent, transport and CLI tests: a scripted model, an
//! event recorder, scratch workspaces, and a local SSE server that speaks
//! just enough HTTP/1.1 for the blocking client.

use anyhow::{Result, anyhow};
use forge_core::{AgentEvent, CancelToken, ChatRequest, EventSink, StreamCallback, StreamChunk};
use forge_llm::{LlmClient, TransportError};
use serde_json::json;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

// ── Scripted model ──

/// Replays canned assistant turns in order and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, TransportError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock_replies().push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, err: TransportError) {
        self.lock_replies().push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, TransportError>>> {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LlmClient for ScriptedLlm {
    fn complete_streaming(
        &self,
        req: &ChatRequest,
        cancel: &CancelToken,
        cb: StreamCallback,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled.into());
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(req.clone());
        }
        let reply = self
            .lock_replies()
            .pop_front()
            .ok_or_else(|| anyhow!("no more scripted responses"))?;
        let text = reply?;
        for piece in split_chunks(&text, 24) {
            cb(StreamChunk::ContentDelta(piece));
        }
        cb(StreamChunk::Done);
        Ok(text)
    }
}

/// Split on char boundaries into pieces of at most `size` chars.
pub fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let chars = text.chars().collect::<Vec<_>>();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

// ── Event recorder ──

#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<AgentEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> EventSink {
        let events = Arc::clone(&self.events);
        Arc::new(move |event| {
            if let Ok(mut guard) = events.lock() {
                guard.push(event);
            }
        })
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn terminal_events(&self) -> Vec<AgentEvent> {
        self.events()
            .into_iter()
            .filter(AgentEvent::is_terminal)
            .collect()
    }

    /// Concatenated text of every chunk event, as a UI would render it.
    pub fn streamed_text(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AgentEvent::Chunk { content } => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&AgentEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

// ── Workspaces ──

pub fn temp_workspace() -> Result<tempfile::TempDir> {
    Ok(tempfile::Builder::new().prefix("forge-ws-").tempdir()?)
}

pub fn write_file(root: &Path, relative: &str, content: &str) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

pub fn read_file(root: &Path, relative: &str) -> Result<String> {
    Ok(std::fs::read_to_string(root.join(relative))?)
}

// ── Mock SSE server ──

#[derive(Debug, Clone)]
pub struct MockSseResponse {
    pub status: u16,
    /// Raw body pieces, each written and flushed separately.
    pub frames: Vec<String>,
    /// Hold the connection open this long after the last frame.
    pub pause_before_close: Option<Duration>,
}

impl MockSseResponse {
    pub fn ok(frames: Vec<String>) -> Self {
        Self {
            status: 200,
            frames,
            pause_before_close: None,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            frames: vec![body.to_string()],
            pause_before_close: None,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause_before_close = Some(pause);
        self
    }
}

pub fn sse_delta_frame(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": text}}]})
    )
}

/// A complete streamed assistant turn: `text` in small deltas, then `[DONE]`.
pub fn sse_reply(text: &str) -> MockSseResponse {
    let mut frames = split_chunks(text, 16)
        .iter()
        .map(|piece| sse_delta_frame(piece))
        .collect::<Vec<_>>();
    frames.push("data: [DONE]\n\n".to_string());
    MockSseResponse::ok(frames)
}

#[derive(Debug, Clone)]
struct RecordedRequest {
    path: String,
    body: String,
}

pub struct MockSseServer {
    pub base_url: String,
    request_count: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockSseServer {
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn request_bodies(&self) -> Vec<String> {
        self.recorded
            .lock()
            .map(|r| r.iter().map(|req| req.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn request_paths(&self) -> Vec<String> {
        self.recorded
            .lock()
            .map(|r| r.iter().map(|req| req.path.clone()).collect())
            .unwrap_or_default()
    }
}

impl Drop for MockSseServer {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Serve `responses` in order, one per connection; the last one repeats.
pub fn start_mock_sse_server(responses: Vec<MockSseResponse>) -> MockSseServer {
    let scripted = if responses.is_empty() {
        vec![MockSseResponse::status(500, r#"{"error":"empty_script"}"#)]
    } else {
        responses
    };
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock sse server");
    listener
        .set_nonblocking(true)
        .expect("set nonblocking listener");
    let addr = listener.local_addr().expect("addr");
    let request_count = Arc::new(AtomicUsize::new(0));
    let request_count_thread = Arc::clone(&request_count);
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let recorded_thread = Arc::clone(&recorded);
    let (tx, rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        loop {
            if rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((mut stream, _)) => {
                    let _ = stream.set_nonblocking(false);
                    let request = consume_http_request(&mut stream).unwrap_or(RecordedRequest {
                        path: String::new(),
                        body: String::new(),
                    });
                    if let Ok(mut guard) = recorded_thread.lock() {
                        guard.push(request);
                    }
                    let idx = request_count_thread.fetch_add(1, Ordering::SeqCst);
                    let selected = scripted
                        .get(idx)
                        .cloned()
                        .or_else(|| scripted.last().cloned())
                        .expect("scripted response");
                    write_response(&mut stream, &selected);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(2));
                }
                Err(_) => break,
            }
        }
    });
    MockSseServer {
        base_url: format!("http://{addr}"),
        request_count,
        recorded,
        stop_tx: Some(tx),
        handle: Some(handle),
    }
}

fn write_response(stream: &mut TcpStream, response: &MockSseResponse) {
    let status_text = match response.status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    };
    let headers = if response.status == 200 {
        format!(
            "HTTP/1.1 200 {status_text}\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n"
        )
    } else {
        let len = response.frames.iter().map(String::len).sum::<usize>();
        format!(
            "HTTP/1.1 {} {status_text}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n",
            response.status
        )
    };
    if stream.write_all(headers.as_bytes()).is_err() {
        return;
    }
    let _ = stream.flush();
    for frame in &response.frames {
        if stream.write_all(frame.as_bytes()).is_err() {
            return;
        }
        let _ = stream.flush();
    }
    if let Some(pause) = response.pause_before_close {
        thread::sleep(pause);
    }
    let _ = stream.shutdown(std::net::Shutdown::Both);
}

fn consume_http_request(stream: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    let mut header_end = None;
    while header_end.is_none() {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = find_subsequence(&buffer, b"\r\n\r\n").map(|idx| idx + 4);
        if buffer.len() > 1_048_576 {
            break;
        }
    }
    let header_len = header_end.unwrap_or(buffer.len());
    let headers = String::from_utf8_lossy(&buffer[..header_len]).to_string();
    let content_length = parse_content_length(&headers);
    let mut body = buffer[header_len..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    let path = headers
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();
    Ok(RecordedRequest {
        path,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn parse_content_length(headers: &str) -> usize {
    for line in headers.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or_default().trim();
        if key.eq_ignore_ascii_case("content-length")
            && let Some(value) = parts.next()
            && let Ok(parsed) = value.trim().parse::<usize>()
        {
            return parsed;
        }
    }
    0
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
