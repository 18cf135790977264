//! Single-flight invocation engine for the external generation tool.
//!
//! Requests are queued and served strictly in submission order by one
//! worker task, so at most one tool process is alive at a time no matter
//! how many callers submit concurrently. Each run spawns the tool with a
//! restricted environment, accumulates its line-delimited JSON output,
//! and classifies any failure; retryable failures are retried with the
//! shared backoff policy. `cancel()` terminates only the currently active
//! process — queued requests still run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::classify::{classify, classify_spawn_error, GenerationError};
use crate::config::GenerationConfig;
use crate::framer::LineFramer;
use crate::models::{GenerationRequest, GenerationResponse};
use crate::proc::{self, EnvPolicy};
use crate::sanitize::{sanitize_context, sanitize_prompt};

struct Job {
    request: GenerationRequest,
    reply: oneshot::Sender<GenerationResponse>,
}

/// The scheduler owning the FIFO queue and the handle to the currently
/// running process. Cloneable; all clones share one worker.
#[derive(Clone)]
pub struct InvocationEngine {
    jobs: mpsc::UnboundedSender<Job>,
    cancel: Arc<Notify>,
}

enum RunOutcome {
    Success(String),
    Failed(GenerationError),
    Cancelled(String),
}

impl InvocationEngine {
    /// Create an engine and start its worker task.
    pub fn new(config: GenerationConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(Notify::new());
        tokio::spawn(worker_loop(config, rx, Arc::clone(&cancel)));
        Self { jobs: tx, cancel }
    }

    /// Submit a request and wait for its outcome.
    ///
    /// Sanitization failures surface here synchronously, before anything
    /// is queued or spawned. Tool failures come back classified inside the
    /// [`GenerationResponse`].
    pub async fn generate(&self, mut request: GenerationRequest) -> Result<GenerationResponse> {
        request.prompt = sanitize_prompt(&request.prompt).context("invalid prompt")?;
        request.context = request
            .context
            .as_deref()
            .map(sanitize_context)
            .filter(|c| !c.is_empty());

        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(Job {
                request,
                reply: reply_tx,
            })
            .map_err(|_| anyhow::anyhow!("invocation engine worker is gone"))?;

        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("invocation engine dropped the request"))
    }

    /// Terminate the currently active tool process, if any.
    ///
    /// Queued-but-unstarted requests are unaffected and will still run.
    pub fn cancel(&self) {
        self.cancel.notify_waiters();
    }
}

async fn worker_loop(
    config: GenerationConfig,
    mut rx: mpsc::UnboundedReceiver<Job>,
    cancel: Arc<Notify>,
) {
    while let Some(job) = rx.recv().await {
        let response = run_with_retries(&config, &job.request, &cancel).await;
        // Caller may have given up; nothing to do if the reply fails.
        let _ = job.reply.send(response);
    }
}

async fn run_with_retries(
    config: &GenerationConfig,
    request: &GenerationRequest,
    cancel: &Notify,
) -> GenerationResponse {
    let backoff = BackoffPolicy::new(Duration::from_millis(config.retry_base_ms));
    let mut last_error: Option<GenerationError> = None;

    for attempt in 0..config.max_attempts {
        if attempt > 0 {
            let delay = last_error
                .as_ref()
                .and_then(|e| e.retry_after)
                .unwrap_or_else(|| backoff.delay(attempt - 1));
            debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying generation");
            tokio::time::sleep(delay).await;
        }

        match run_once(config, request, cancel).await {
            RunOutcome::Success(content) => {
                return GenerationResponse {
                    content,
                    partial: false,
                    error: None,
                }
            }
            RunOutcome::Cancelled(content) => {
                let mut err = GenerationError::new(
                    crate::classify::ErrorKind::Unknown,
                    "generation cancelled before completion",
                    false,
                );
                err.partial_content = (!content.is_empty()).then(|| content.clone());
                return GenerationResponse {
                    partial: !content.is_empty(),
                    content,
                    error: Some(err),
                };
            }
            RunOutcome::Failed(err) => {
                let retryable = err.retryable;
                last_error = Some(err);
                if !retryable {
                    break;
                }
            }
        }
    }

    let err = last_error.unwrap_or_else(|| {
        GenerationError::new(
            crate::classify::ErrorKind::Unknown,
            "generation failed without a classified error",
            false,
        )
    });
    let content = err.partial_content.clone().unwrap_or_default();
    GenerationResponse {
        partial: !content.is_empty(),
        content,
        error: Some(err),
    }
}

async fn run_once(
    config: &GenerationConfig,
    request: &GenerationRequest,
    cancel: &Notify,
) -> RunOutcome {
    let mut args = config.args.clone();
    args.push(request.prompt.clone());
    if let Some(ref context) = request.context {
        args.push(context.clone());
    }

    let env = EnvPolicy::Restricted(config.env_passthrough.clone());
    let mut child = match proc::build_command(&config.command, &args, &env).spawn() {
        Ok(c) => c,
        Err(e) => return RunOutcome::Failed(classify_spawn_error(&e)),
    };

    // Pipes are taken into owned reader tasks so the child handle stays
    // free for waiting and killing.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut content = String::new();
        if let Some(mut pipe) = stdout {
            let mut framer = LineFramer::new();
            let mut buf = [0u8; 4096];
            loop {
                match pipe.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let piece = String::from_utf8_lossy(&buf[..n]).into_owned();
                        for line in framer.push(&piece) {
                            append_line_content(&line, &mut content);
                        }
                    }
                }
            }
            if let Some(tail) = framer.finish() {
                append_line_content(&tail, &mut content);
            }
        }
        content
    });

    let stderr_task = tokio::spawn(async move {
        let mut err = String::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut err).await;
        }
        err
    });

    let timeout = request
        .timeout
        .unwrap_or(Duration::from_secs(config.timeout_secs));
    let grace = Duration::from_millis(500);

    let status = tokio::select! {
        waited = tokio::time::timeout(timeout, child.wait()) => match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let content = stdout_task.await.unwrap_or_default();
                return RunOutcome::Failed(classify(
                    &format!("failed waiting for tool process: {}", e),
                    (!content.is_empty()).then_some(content),
                ));
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "generation timed out, killing tool");
                proc::kill_with_grace(&mut child, grace).await;
                let content = stdout_task.await.unwrap_or_default();
                return RunOutcome::Failed(classify(
                    &format!("generation timed out after {}s", timeout.as_secs()),
                    (!content.is_empty()).then_some(content),
                ));
            }
        },
        _ = cancel.notified() => {
            debug!("cancel requested, terminating active tool process");
            proc::kill_with_grace(&mut child, grace).await;
            let content = stdout_task.await.unwrap_or_default();
            return RunOutcome::Cancelled(content);
        }
    };

    let content = stdout_task.await.unwrap_or_default();
    let stderr_text = stderr_task.await.unwrap_or_default();

    if status.success() {
        // Exit 0 wins even when stderr carried warnings.
        return RunOutcome::Success(content);
    }

    let raw = if stderr_text.trim().is_empty() {
        match status.code() {
            Some(code) => format!("tool exited with code {}", code),
            None => "tool terminated by signal".to_string(),
        }
    } else {
        stderr_text.trim().to_string()
    };
    RunOutcome::Failed(classify(&raw, (!content.is_empty()).then_some(content)))
}

/// Parse one output line as JSON and append any generated text it carries.
///
/// Accepts a top-level `content` string as well as the assistant-message
/// shape with an array of `text` content blocks. Malformed lines are
/// skipped, not fatal.
fn append_line_content(line: &str, content: &mut String) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return,
    };
    for text in extract_text_fragments(&value) {
        content.push_str(&text);
    }
}

/// Pull generated text out of one parsed NDJSON event.
pub(crate) fn extract_text_fragments(value: &serde_json::Value) -> Vec<String> {
    let mut fragments = Vec::new();

    if let Some(text) = value.get("content").and_then(|c| c.as_str()) {
        fragments.push(text.to_string());
        return fragments;
    }

    // Assistant message shape: {"message": {"content": [{"type": "text", "text": ...}]}}
    let blocks = value
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| value.get("content"))
        .and_then(|c| c.as_array());
    if let Some(blocks) = blocks {
        for block in blocks {
            let is_text = block
                .get("type")
                .and_then(|t| t.as_str())
                .map(|t| t == "text")
                .unwrap_or(false);
            if is_text {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    fragments.push(text.to_string());
                }
            }
        }
    }
    fragments
}
