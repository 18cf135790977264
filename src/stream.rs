//! Streaming invocation engine.
//!
//! Unlike the batch engine, streams deliver output incrementally as the
//! tool emits NDJSON events. Each stream owns its own child process and
//! delivers [`StreamChunk`]s over a channel; exactly one terminal chunk
//! (`done == true`) closes every stream that runs to completion or fails,
//! while a cancelled stream ends silently with no terminal chunk at all.
//! A heartbeat task logs liveness while the tool is quiet, and a hard
//! timeout kills the process with SIGTERM→SIGKILL escalation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::classify::{classify, classify_spawn_error, ErrorKind, GenerationError};
use crate::config::StreamingConfig;
use crate::framer::LineFramer;
use crate::generate::extract_text_fragments;
use crate::models::{GenerationRequest, StreamChunk};
use crate::proc::{self, EnvPolicy};
use crate::sanitize::{sanitize_context, sanitize_prompt};

/// Caller-side handle to a running stream.
#[derive(Clone, Debug)]
pub struct StreamHandle {
    pub stream_id: String,
    cancel: Arc<Notify>,
}

impl StreamHandle {
    /// Terminate the stream's process. No terminal chunk is delivered; the
    /// channel simply closes.
    pub fn cancel(&self) {
        self.cancel.notify_waiters();
    }
}

/// Spawns one tool process per stream. Streams are independent; the
/// single-flight rule of the batch engine does not apply here.
#[derive(Clone)]
pub struct StreamEngine {
    config: StreamingConfig,
}

impl StreamEngine {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }

    /// Start a stream for `request`.
    ///
    /// Sanitization failures surface here, before any process is spawned.
    /// Everything after that — including spawn failures — arrives on the
    /// returned channel, ending with the terminal chunk.
    pub fn start(
        &self,
        mut request: GenerationRequest,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamChunk>)> {
        request.prompt = sanitize_prompt(&request.prompt).context("invalid prompt")?;
        request.context = request
            .context
            .as_deref()
            .map(sanitize_context)
            .filter(|c| !c.is_empty());

        let stream_id = uuid::Uuid::new_v4().to_string();
        let cancel = Arc::new(Notify::new());
        let (tx, rx) = mpsc::channel(256);

        let handle = StreamHandle {
            stream_id: stream_id.clone(),
            cancel: Arc::clone(&cancel),
        };

        let config = self.config.clone();
        tokio::spawn(run_stream(config, request, stream_id, tx, cancel));

        Ok((handle, rx))
    }
}

struct ChunkSender {
    stream_id: String,
    sequence: u64,
    tx: mpsc::Sender<StreamChunk>,
}

impl ChunkSender {
    /// Deliver a content chunk. Returns `false` when the receiver is gone.
    async fn content(&mut self, content: String) -> bool {
        let chunk = StreamChunk {
            stream_id: self.stream_id.clone(),
            sequence: self.sequence,
            content,
            done: false,
            error: None,
        };
        self.sequence += 1;
        self.tx.send(chunk).await.is_ok()
    }

    async fn terminal(mut self, error: Option<GenerationError>) {
        let chunk = StreamChunk {
            stream_id: self.stream_id.clone(),
            sequence: self.sequence,
            content: String::new(),
            done: true,
            error,
        };
        self.sequence += 1;
        let _ = self.tx.send(chunk).await;
    }
}

async fn run_stream(
    config: StreamingConfig,
    request: GenerationRequest,
    stream_id: String,
    tx: mpsc::Sender<StreamChunk>,
    cancel: Arc<Notify>,
) {
    let mut sender = ChunkSender {
        stream_id: stream_id.clone(),
        sequence: 0,
        tx,
    };

    let mut args = config.args.clone();
    args.push(request.prompt.clone());
    if let Some(ref context) = request.context {
        args.push(context.clone());
    }

    let env = if config.inherit_env {
        EnvPolicy::Inherit
    } else {
        EnvPolicy::Restricted(vec!["PATH".to_string(), "HOME".to_string()])
    };

    let mut child = match proc::build_command(&config.command, &args, &env).spawn() {
        Ok(c) => c,
        Err(e) => {
            sender.terminal(Some(classify_spawn_error(&e))).await;
            return;
        }
    };

    let mut stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            sender
                .terminal(Some(GenerationError::new(
                    ErrorKind::Unknown,
                    "tool process has no stdout pipe",
                    false,
                )))
                .await;
            return;
        }
    };
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut err = String::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut err).await;
        }
        err
    });

    let grace = Duration::from_millis(config.kill_grace_ms);
    let timeout = request
        .timeout
        .unwrap_or(Duration::from_secs(config.timeout_secs));
    let deadline = tokio::time::Instant::now() + timeout;

    let mut heartbeat = tokio::time::interval(Duration::from_secs(config.heartbeat_secs.max(1)));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await; // first tick fires immediately

    let mut framer = LineFramer::new();
    let mut buf = [0u8; 4096];
    let mut last_activity = Instant::now();

    // One registration for the whole loop, so a cancel arriving between
    // select iterations is not lost.
    let cancelled = cancel.notified();
    tokio::pin!(cancelled);

    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    last_activity = Instant::now();
                    let piece = String::from_utf8_lossy(&buf[..n]).into_owned();
                    for line in framer.push(&piece) {
                        for text in parse_line(&line) {
                            if !sender.content(text).await {
                                // Receiver gone; treat like cancellation.
                                debug!(stream_id = %stream_id, "stream receiver dropped, killing tool");
                                proc::kill_with_grace(&mut child, grace).await;
                                return;
                            }
                        }
                    }
                }
            },
            _ = heartbeat.tick() => {
                let quiet = last_activity.elapsed();
                if quiet.as_secs() >= config.heartbeat_secs {
                    warn!(stream_id = %stream_id, quiet_secs = quiet.as_secs(), "stream quiet");
                } else {
                    debug!(stream_id = %stream_id, "stream alive");
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(stream_id = %stream_id, timeout_secs = timeout.as_secs(), "stream timed out, killing tool");
                proc::kill_with_grace(&mut child, grace).await;
                sender
                    .terminal(Some(classify(
                        &format!("stream timed out after {}s", timeout.as_secs()),
                        None,
                    )))
                    .await;
                return;
            }
            _ = &mut cancelled => {
                debug!(stream_id = %stream_id, "stream cancelled, killing tool");
                proc::kill_with_grace(&mut child, grace).await;
                // Cancelled streams end silently: no terminal chunk.
                return;
            }
        }
    }

    if let Some(tail) = framer.finish() {
        for text in parse_line(&tail) {
            if !sender.content(text).await {
                proc::kill_with_grace(&mut child, grace).await;
                return;
            }
        }
    }

    let status = tokio::select! {
        waited = child.wait() => waited,
        _ = &mut cancelled => {
            proc::kill_with_grace(&mut child, grace).await;
            return;
        }
    };
    let stderr_text = stderr_task.await.unwrap_or_default();

    match status {
        Ok(status) if status.success() => {
            debug!(stream_id = %stream_id, chunks = sender.sequence, "stream completed");
            sender.terminal(None).await;
        }
        Ok(status) => {
            let raw = if stderr_text.trim().is_empty() {
                match status.code() {
                    Some(code) => format!("tool exited with code {}", code),
                    None => "tool terminated by signal".to_string(),
                }
            } else {
                stderr_text.trim().to_string()
            };
            sender.terminal(Some(classify(&raw, None))).await;
        }
        Err(e) => {
            sender
                .terminal(Some(classify(
                    &format!("failed waiting for tool process: {}", e),
                    None,
                )))
                .await;
        }
    }
}

/// Parse one NDJSON line into zero or more text fragments. Unparsable
/// lines are skipped.
fn parse_line(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => extract_text_fragments(&value),
        Err(_) => Vec::new(),
    }
}
