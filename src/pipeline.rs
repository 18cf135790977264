//! Vault ingestion pipeline.
//!
//! Takes an uploaded file from the object store to embedded chunks in
//! SQLite through a persisted state machine:
//!
//! `pending → downloading → extracting → chunking → embedding → success`
//!
//! Every transition is written to the item row before the phase runs, so
//! an item found mid-state after a crash tells you exactly which phase
//! died. `success`, `partial`, and `failed` are terminal. An extraction
//! that produced too little text (or no chunks) ends `partial` with a
//! zero chunk count rather than `failed`: the file was readable, it just
//! had nothing useful in it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::chunk::chunk_sections;
use crate::config::Config;
use crate::embed::{get_embeddings, vec_to_blob, EmbeddingClient};
use crate::extract::{extract_by_type, FileKind};
use crate::models::{ExtractionStatus, TextChunk, VaultItem};

/// Minimum usable extracted text length; anything shorter ends `partial`.
pub const MIN_EXTRACTED_LEN: usize = 10;

/// Where uploaded file bytes live, keyed by storage path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// Filesystem-backed object store rooted at a directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.root.join(key);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }
}

/// The ingestion pipeline. Cheap to clone; all clones share the pool,
/// store, and embedding transport.
#[derive(Clone)]
pub struct Pipeline {
    pool: SqlitePool,
    store: Arc<dyn ObjectStore>,
    embedder: Arc<dyn EmbeddingClient>,
    config: Config,
}

impl Pipeline {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn ObjectStore>,
        embedder: Arc<dyn EmbeddingClient>,
        config: Config,
    ) -> Self {
        Self {
            pool,
            store,
            embedder,
            config,
        }
    }

    /// Upload a local file into the vault and run extraction on it.
    ///
    /// The declared type falls back to the file extension. Returns the
    /// item row in its terminal state.
    pub async fn ingest_file(&self, path: &Path, file_type: Option<&str>) -> Result<VaultItem> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .ok_or_else(|| anyhow::anyhow!("path has no usable file name: {}", path.display()))?;

        let declared = match file_type {
            Some(t) => t.to_string(),
            None => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .ok_or_else(|| {
                    anyhow::anyhow!("cannot determine file type for {}", path.display())
                })?,
        };
        if FileKind::parse(&declared).is_none() {
            bail!("unsupported file type: {}", declared);
        }

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let storage_path = format!("{}/{}", id, file_name);
        self.store.put(&storage_path, &bytes).await?;

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO vault_items
                (id, file_name, file_type, storage_path, extraction_status, chunk_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&file_name)
        .bind(&declared)
        .bind(&storage_path)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(item_id = %id, file = %file_name, "vault item created");
        self.run_extraction(&id).await?;
        get_item(&self.pool, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("vault item {} disappeared during extraction", id))
    }

    /// Drive one item through the extraction state machine to a terminal
    /// status. Infrastructure errors (the database itself failing)
    /// propagate; everything else lands in the item row.
    pub async fn run_extraction(&self, item_id: &str) -> Result<ExtractionStatus> {
        let item = get_item(&self.pool, item_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no vault item with id {}", item_id))?;

        let kind = match FileKind::parse(&item.file_type) {
            Some(k) => k,
            None => {
                let msg = format!("unsupported file type: {}", item.file_type);
                return self.mark_failed(item_id, &msg).await;
            }
        };

        self.set_status(item_id, ExtractionStatus::Downloading).await?;
        let bytes = match self.store.get(&item.storage_path).await {
            Ok(b) => b,
            Err(e) => {
                return self
                    .mark_failed(item_id, &format!("download failed: {}", e))
                    .await;
            }
        };

        self.set_status(item_id, ExtractionStatus::Extracting).await?;
        let extraction = match extract_by_type(kind, &bytes, &self.config.extraction).await {
            Ok(x) => x,
            Err(e) => return self.mark_failed(item_id, &e.to_string()).await,
        };

        if extraction.text.trim().len() < MIN_EXTRACTED_LEN {
            warn!(item_id, "extracted text too short, marking partial");
            return self.mark_partial(item_id, 0).await;
        }

        self.set_status(item_id, ExtractionStatus::Chunking).await?;
        let chunks = chunk_sections(&extraction.sections, &extraction.text, &self.config.chunking);
        if chunks.is_empty() {
            warn!(item_id, "chunking produced nothing, marking partial");
            return self.mark_partial(item_id, 0).await;
        }
        debug!(item_id, chunks = chunks.len(), "document chunked");

        self.set_status(item_id, ExtractionStatus::Embedding).await?;
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = match get_embeddings(self.embedder.as_ref(), &self.config.embedding, &texts).await
        {
            Ok(v) => v,
            Err(e) => {
                return self
                    .mark_failed(item_id, &format!("embedding failed: {}", e))
                    .await;
            }
        };

        if let Err(e) = self.insert_chunks(item_id, &chunks, &vectors).await {
            return self
                .mark_failed(item_id, &format!("failed to persist chunks: {}", e))
                .await;
        }

        let chunk_count = chunks.len() as i64;
        sqlx::query(
            "UPDATE vault_items SET extraction_status = 'success', extraction_error = NULL, chunk_count = ?, updated_at = ? WHERE id = ?",
        )
        .bind(chunk_count)
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        info!(item_id, chunks = chunk_count, "extraction succeeded");
        Ok(ExtractionStatus::Success)
    }

    async fn insert_chunks(
        &self,
        item_id: &str,
        chunks: &[TextChunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        // Re-running an item replaces its chunks wholesale.
        sqlx::query("DELETE FROM vault_chunks WHERE vault_item_id = ?")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO vault_chunks (id, vault_item_id, chunk_index, content, heading_context, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(item_id)
            .bind(chunk.index as i64)
            .bind(&chunk.content)
            .bind(chunk.heading_context.as_deref())
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_status(&self, item_id: &str, status: ExtractionStatus) -> Result<()> {
        debug!(item_id, status = %status, "extraction phase");
        sqlx::query("UPDATE vault_items SET extraction_status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, item_id: &str, message: &str) -> Result<ExtractionStatus> {
        warn!(item_id, error = message, "extraction failed");
        sqlx::query(
            "UPDATE vault_items SET extraction_status = 'failed', extraction_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(message)
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(ExtractionStatus::Failed)
    }

    async fn mark_partial(&self, item_id: &str, chunk_count: i64) -> Result<ExtractionStatus> {
        sqlx::query(
            "UPDATE vault_items SET extraction_status = 'partial', extraction_error = NULL, chunk_count = ?, updated_at = ? WHERE id = ?",
        )
        .bind(chunk_count)
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(ExtractionStatus::Partial)
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<VaultItem> {
    let status_str: String = row.try_get("extraction_status")?;
    let extraction_status = ExtractionStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown extraction status in database: {}", status_str))?;
    Ok(VaultItem {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        file_type: row.try_get("file_type")?,
        storage_path: row.try_get("storage_path")?,
        extraction_status,
        extraction_error: row.try_get("extraction_error")?,
        chunk_count: row.try_get("chunk_count")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn get_item(pool: &SqlitePool, id: &str) -> Result<Option<VaultItem>> {
    let row = sqlx::query("SELECT * FROM vault_items WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_item).transpose()
}

pub async fn list_items(pool: &SqlitePool) -> Result<Vec<VaultItem>> {
    let rows = sqlx::query("SELECT * FROM vault_items ORDER BY updated_at DESC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_item).collect()
}
