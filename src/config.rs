use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where uploaded vault files live. The filesystem store is the built-in
/// backend; remote object stores plug in through the `ObjectStore` trait.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/vault")
}

/// Settings for the non-streaming invocation engine.
///
/// The engine spawns `command` with a restricted environment: everything is
/// cleared except the variables named in `env_passthrough`. The streaming
/// engine has its own environment policy (see [`StreamingConfig`]).
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_tool_command")]
    pub command: String,
    /// Flags selecting line-delimited JSON output. Appended before the
    /// prompt argument on every invocation.
    #[serde(default = "default_tool_args")]
    pub args: Vec<String>,
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            command: default_tool_command(),
            args: default_tool_args(),
            env_passthrough: default_env_passthrough(),
            timeout_secs: default_tool_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_tool_command() -> String {
    "claude".to_string()
}
fn default_tool_args() -> Vec<String> {
    vec![
        "--print".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
    ]
}
fn default_env_passthrough() -> Vec<String> {
    vec![
        "PATH".to_string(),
        "HOME".to_string(),
        "ANTHROPIC_API_KEY".to_string(),
    ]
}
fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1000
}

/// Settings for the streaming invocation engine.
///
/// Unlike the batch engine, the streaming path passes the full process
/// environment through by default (`inherit_env = true`) so the tool can
/// resolve its own installation paths. The asymmetry is intentional
/// configuration, not an accident of the implementation.
#[derive(Debug, Deserialize, Clone)]
pub struct StreamingConfig {
    #[serde(default = "default_tool_command")]
    pub command: String,
    #[serde(default = "default_tool_args")]
    pub args: Vec<String>,
    #[serde(default = "default_inherit_env")]
    pub inherit_env: bool,
    #[serde(default = "default_stream_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            command: default_tool_command(),
            args: default_tool_args(),
            inherit_env: default_inherit_env(),
            timeout_secs: default_stream_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

fn default_inherit_env() -> bool {
    true
}
fn default_stream_timeout_secs() -> u64 {
    300
}
fn default_heartbeat_secs() -> u64 {
    10
}
fn default_kill_grace_ms() -> u64 {
    2000
}

/// Token budget for assembled prompt context.
#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_max_context_tokens")]
    pub max_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_context_tokens(),
        }
    }
}

fn default_max_context_tokens() -> usize {
    8000
}

/// Settings for the extraction dispatcher.
#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// When `true`, PDFs first go through the structured extractor
    /// subprocess; any failure falls back to the embedded library.
    #[serde(default)]
    pub structured_pdf: bool,
    #[serde(default = "default_python_bin")]
    pub python_bin: String,
    #[serde(default = "default_pdf_script")]
    pub pdf_script: PathBuf,
    #[serde(default = "default_extract_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            structured_pdf: false,
            python_bin: default_python_bin(),
            pdf_script: default_pdf_script(),
            timeout_secs: default_extract_timeout_secs(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

fn default_python_bin() -> String {
    "python3".to_string()
}
fn default_pdf_script() -> PathBuf {
    PathBuf::from("./scripts/extract_pdf.py")
}
fn default_extract_timeout_secs() -> u64 {
    60
}

/// Character-based chunking parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_max_size")]
    pub max_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
    #[serde(default = "default_chunk_min_size")]
    pub min_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: default_chunk_max_size(),
            overlap: default_chunk_overlap(),
            min_size: default_chunk_min_size(),
        }
    }
}

fn default_chunk_max_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_chunk_min_size() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_embed_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embed_endpoint(),
            model: default_embed_model(),
            api_key_env: default_embed_api_key_env(),
            batch_size: default_embed_batch_size(),
            max_retries: default_embed_max_retries(),
            max_chars: default_embed_max_chars(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_embed_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embed_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_embed_batch_size() -> usize {
    20
}
fn default_embed_max_retries() -> u32 {
    3
}
fn default_embed_max_chars() -> usize {
    8000
}
fn default_embed_timeout_secs() -> u64 {
    30
}

impl Config {
    /// A minimal in-memory config for commands and tests that do not need
    /// a config file on disk.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/inkvault.sqlite"),
            },
            ..Default::default()
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_size == 0 {
        anyhow::bail!("chunking.max_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.max_size");
    }

    if config.generation.command.trim().is_empty() {
        anyhow::bail!("generation.command must not be empty");
    }
    if config.generation.max_attempts == 0 {
        anyhow::bail!("generation.max_attempts must be >= 1");
    }

    if config.streaming.command.trim().is_empty() {
        anyhow::bail!("streaming.command must not be empty");
    }
    if config.streaming.timeout_secs == 0 {
        anyhow::bail!("streaming.timeout_secs must be > 0");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.context.max_tokens == 0 {
        anyhow::bail!("context.max_tokens must be > 0");
    }

    Ok(config)
}
