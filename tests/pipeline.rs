//! Library-level end-to-end tests of the ingestion pipeline with a stub
//! embedding transport.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

use inkvault::config::Config;
use inkvault::db;
use inkvault::embed::{blob_to_vec, EmbedError, EmbeddingClient, IndexedEmbedding};
use inkvault::migrate;
use inkvault::models::ExtractionStatus;
use inkvault::pipeline::{list_items, FsObjectStore, Pipeline};

struct StubEmbedder;

#[async_trait]
impl EmbeddingClient for StubEmbedder {
    async fn embed_batch(
        &self,
        _model: &str,
        texts: &[String],
    ) -> Result<Vec<IndexedEmbedding>, EmbedError> {
        Ok(texts
            .iter()
            .enumerate()
            .map(|(i, t)| IndexedEmbedding {
                index: i,
                embedding: vec![t.len() as f32, 1.0, 2.0],
            })
            .collect())
    }
}

async fn test_pipeline(dir: &tempfile::TempDir) -> Pipeline {
    let mut config = Config::minimal();
    config.db.path = dir.path().join("data/vault.sqlite");
    config.storage.root = dir.path().join("store");
    let pool = db::connect(&config.db).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = Arc::new(FsObjectStore::new(config.storage.root.clone()));
    Pipeline::new(pool.clone(), store, Arc::new(StubEmbedder), config)
}

fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    let mut body = String::new();
    for p in paragraphs {
        body.push_str(&format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p));
    }
    let xml = format!(
        r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>{}</w:body>
</w:document>"#,
        body
    );

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

#[tokio::test]
async fn markdown_file_is_chunked_and_embedded() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = test_pipeline(&dir).await;

    let doc = dir.path().join("essay.md");
    let body = "## Notes\n\nA full sentence about the research topic. ".repeat(120);
    std::fs::write(&doc, &body).unwrap();

    let item = pipeline.ingest_file(&doc, None).await.unwrap();
    assert_eq!(item.extraction_status, ExtractionStatus::Success);
    assert!(item.chunk_count > 1);

    // Every persisted chunk carries a decodable embedding blob.
    let pool = db::connect(&pipeline_config(&dir).db).await.unwrap();
    let rows: Vec<(i64, String, Vec<u8>)> = sqlx::query_as(
        "SELECT chunk_index, content, embedding FROM vault_chunks WHERE vault_item_id = ? ORDER BY chunk_index",
    )
    .bind(&item.id)
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(rows.len() as i64, item.chunk_count);
    for (i, (index, content, blob)) in rows.iter().enumerate() {
        assert_eq!(*index, i as i64);
        let vector = blob_to_vec(blob);
        assert_eq!(vector.len(), 3);
        assert_eq!(vector[0], content.len() as f32);
    }
}

#[tokio::test]
async fn docx_file_extracts_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = test_pipeline(&dir).await;

    let paragraphs: Vec<String> = (0..40)
        .map(|i| format!("Paragraph {} holds a complete sentence about the draft.", i))
        .collect();
    let refs: Vec<&str> = paragraphs.iter().map(|s| s.as_str()).collect();
    let doc = dir.path().join("chapter.docx");
    std::fs::write(&doc, minimal_docx(&refs)).unwrap();

    let item = pipeline.ingest_file(&doc, None).await.unwrap();
    assert_eq!(item.extraction_status, ExtractionStatus::Success);
    assert!(item.chunk_count >= 1);
    assert_eq!(item.file_type, "docx");
}

#[tokio::test]
async fn listing_orders_by_recency() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = test_pipeline(&dir).await;

    let a = dir.path().join("a.txt");
    std::fs::write(&a, "A meaningful first document body. ".repeat(20)).unwrap();
    pipeline.ingest_file(&a, None).await.unwrap();

    let b = dir.path().join("b.txt");
    std::fs::write(&b, "A meaningful second document body. ".repeat(20)).unwrap();
    pipeline.ingest_file(&b, None).await.unwrap();

    let pool = db::connect(&pipeline_config(&dir).db).await.unwrap();
    let items = list_items(&pool).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items[0].updated_at >= items[1].updated_at);
    for item in items {
        assert_eq!(item.extraction_status, ExtractionStatus::Success);
    }
}

fn pipeline_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::minimal();
    config.db.path = dir.path().join("data/vault.sqlite");
    config.storage.root = dir.path().join("store");
    config
}
