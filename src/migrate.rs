use anyhow::Result;
use sqlx::SqlitePool;

/// Create the vault schema if it does not exist yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vault_items (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            file_type TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            extraction_status TEXT NOT NULL DEFAULT 'pending',
            extraction_error TEXT,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vault_chunks (
            id TEXT PRIMARY KEY,
            vault_item_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            heading_context TEXT,
            embedding BLOB,
            UNIQUE(vault_item_id, chunk_index),
            FOREIGN KEY (vault_item_id) REFERENCES vault_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vault_chunks_item_id ON vault_chunks(vault_item_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vault_items_status ON vault_items(extraction_status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
