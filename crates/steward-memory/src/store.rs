//! SQLite-backed vector store. One table per collection; vectors are stored
//! as little-endian f32 blobs and searched brute-force, which is more than
//! fast enough for a single principal's memory volume.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::embed::{l2_distance, Embedder};
use crate::error::{MemoryError, Result};
use crate::types::SearchHit;

#[derive(Clone)]
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
    table: String,
    collection: String,
    embedder: Arc<dyn Embedder>,
}

impl VectorStore {
    /// Open (or create) a collection on a shared connection.
    ///
    /// Verifies the embedder pin: a collection written by one model must not
    /// be read or written with another.
    pub fn open(
        conn: Arc<Mutex<Connection>>,
        collection: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let table = format!("vs_{}", sanitize(collection));
        {
            let db = conn.lock().unwrap();
            db.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id         TEXT PRIMARY KEY,
                    text       TEXT NOT NULL,
                    metadata   TEXT NOT NULL,
                    embedding  BLOB NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS vs_collections (
                    collection     TEXT PRIMARY KEY,
                    embedder_model TEXT NOT NULL
                );"
            ))?;

            let stored: Option<String> = db
                .query_row(
                    "SELECT embedder_model FROM vs_collections WHERE collection = ?1",
                    [collection],
                    |row| row.get(0),
                )
                .ok();
            match stored {
                Some(model) if model != embedder.model_id() => {
                    return Err(MemoryError::EmbedderMismatch {
                        collection: collection.to_string(),
                        stored: model,
                        requested: embedder.model_id().to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    db.execute(
                        "INSERT INTO vs_collections (collection, embedder_model) VALUES (?1, ?2)",
                        rusqlite::params![collection, embedder.model_id()],
                    )?;
                }
            }
        }

        Ok(Self {
            conn,
            table,
            collection: collection.to_string(),
            embedder,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Store text with its embedding. A caller-supplied id upserts
    /// (delete-then-insert); otherwise a fresh UUID is assigned.
    pub async fn store(&self, text: &str, metadata: Value, id: Option<&str>) -> Result<String> {
        let doc_id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let vector = self.embedder.embed(text).await?;
        let blob = encode_vector(&vector);
        let meta_json = serde_json::to_string(&metadata)?;
        let now = chrono::Utc::now().to_rfc3339();

        let db = self.conn.lock().unwrap();
        db.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.table),
            [&doc_id],
        )?;
        db.execute(
            &format!(
                "INSERT INTO {} (id, text, metadata, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                self.table
            ),
            rusqlite::params![doc_id, text, meta_json, blob, now],
        )?;

        debug!(collection = %self.collection, id = %doc_id, "stored document");
        Ok(doc_id)
    }

    /// Semantic search ordered by L2 distance. Failures degrade to an empty
    /// result with a debug log — retrieval must never take a turn down.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&Value>,
        max_distance: Option<f32>,
    ) -> Vec<SearchHit> {
        let query_vec = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                debug!(collection = %self.collection, error = %e, "query embedding failed");
                return Vec::new();
            }
        };

        let mut hits = match self.scan_rows(filter) {
            Ok(rows) => rows
                .into_iter()
                .map(|(id, text, metadata, vector)| SearchHit {
                    distance: l2_distance(&query_vec, &vector),
                    id,
                    text,
                    metadata,
                })
                .collect::<Vec<_>>(),
            Err(e) => {
                debug!(collection = %self.collection, error = %e, "search scan failed");
                return Vec::new();
            }
        };

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        if let Some(max) = max_distance {
            hits.retain(|h| h.distance <= max);
        }
        hits
    }

    /// Most-recent documents by insertion time, optionally filtered. Used for
    /// episode retrieval and drift analysis where recency beats similarity.
    pub fn recent(&self, filter: Option<&Value>, limit: usize) -> Vec<SearchHit> {
        let rows = match self.scan_rows_ordered(filter, limit) {
            Ok(rows) => rows,
            Err(e) => {
                debug!(collection = %self.collection, error = %e, "recent scan failed");
                return Vec::new();
            }
        };
        rows.into_iter()
            .map(|(id, text, metadata, _)| SearchHit {
                id,
                text,
                metadata,
                distance: 0.0,
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        let db = self.conn.lock().unwrap();
        db.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as usize)
        .unwrap_or(0)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.conn.lock().unwrap();
        db.execute(&format!("DELETE FROM {} WHERE id = ?1", self.table), [id])?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let db = self.conn.lock().unwrap();
        db.execute(&format!("DELETE FROM {}", self.table), [])?;
        Ok(())
    }

    // --- private helpers ---------------------------------------------------

    #[allow(clippy::type_complexity)]
    fn scan_rows(&self, filter: Option<&Value>) -> Result<Vec<(String, String, Value, Vec<f32>)>> {
        let db = self.conn.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT id, text, metadata, embedding FROM {}",
            self.table
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(id, text, meta_json, blob)| {
                let metadata: Value = serde_json::from_str(&meta_json).ok()?;
                if !matches_filter(&metadata, filter) {
                    return None;
                }
                Some((id, text, metadata, decode_vector(&blob)))
            })
            .collect();
        Ok(rows)
    }

    #[allow(clippy::type_complexity)]
    fn scan_rows_ordered(
        &self,
        filter: Option<&Value>,
        limit: usize,
    ) -> Result<Vec<(String, String, Value, String)>> {
        let db = self.conn.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT id, text, metadata, created_at FROM {} ORDER BY created_at DESC",
            self.table
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(id, text, meta_json, created_at)| {
                let metadata: Value = serde_json::from_str(&meta_json).ok()?;
                if !matches_filter(&metadata, filter) {
                    return None;
                }
                Some((id, text, metadata, created_at))
            })
            .take(limit)
            .collect();
        Ok(rows)
    }
}

/// Conjunctive exact-match over metadata fields.
fn matches_filter(metadata: &Value, filter: Option<&Value>) -> bool {
    let Some(Value::Object(wanted)) = filter else {
        return true;
    };
    let Value::Object(meta) = metadata else {
        return wanted.is_empty();
    };
    wanted.iter().all(|(k, v)| meta.get(k) == Some(v))
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;

    fn test_store(collection: &str) -> VectorStore {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        VectorStore::open(conn, collection, Arc::new(HashEmbedder::default())).unwrap()
    }

    #[tokio::test]
    async fn store_and_count() {
        let store = test_store("notes");
        for i in 0..5 {
            store
                .store(&format!("note {i}"), serde_json::json!({}), None)
                .await
                .unwrap();
        }
        assert_eq!(store.count(), 5);
    }

    #[tokio::test]
    async fn delete_removes_from_search() {
        let store = test_store("notes");
        let id = store
            .store("remember the milk", serde_json::json!({}), None)
            .await
            .unwrap();
        store
            .store("water the plants", serde_json::json!({}), None)
            .await
            .unwrap();

        store.delete(&id).unwrap();
        let hits = store.search("remember the milk", 10, None, None).await;
        assert!(hits.iter().all(|h| h.id != id));
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn explicit_id_upserts() {
        let store = test_store("notes");
        store
            .store("version one", serde_json::json!({}), Some("doc-1"))
            .await
            .unwrap();
        store
            .store("version two", serde_json::json!({}), Some("doc-1"))
            .await
            .unwrap();
        assert_eq!(store.count(), 1);
        let hits = store.search("version", 1, None, None).await;
        assert_eq!(hits[0].text, "version two");
    }

    #[tokio::test]
    async fn metadata_filter_is_conjunctive() {
        let store = test_store("notes");
        store
            .store(
                "telegram turn",
                serde_json::json!({"type": "conversation", "channel": "telegram"}),
                None,
            )
            .await
            .unwrap();
        store
            .store(
                "email turn",
                serde_json::json!({"type": "conversation", "channel": "email"}),
                None,
            )
            .await
            .unwrap();

        let filter = serde_json::json!({"type": "conversation", "channel": "email"});
        let hits = store.search("turn", 10, Some(&filter), None).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["channel"], "email");
    }

    #[tokio::test]
    async fn results_are_distance_ordered() {
        let store = test_store("notes");
        store
            .store("calendar meeting with bob", serde_json::json!({}), None)
            .await
            .unwrap();
        store
            .store("polymer extrusion yields", serde_json::json!({}), None)
            .await
            .unwrap();

        let hits = store.search("meeting with bob calendar", 10, None, None).await;
        assert_eq!(hits[0].text, "calendar meeting with bob");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn max_distance_drops_far_matches() {
        let store = test_store("notes");
        store
            .store("alpha beta gamma", serde_json::json!({}), None)
            .await
            .unwrap();
        let hits = store
            .search("completely unrelated query words", 10, None, Some(0.01))
            .await;
        assert!(hits.is_empty());
    }

    #[test]
    fn embedder_pin_is_enforced() {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let _first =
            VectorStore::open(Arc::clone(&conn), "pinned", Arc::new(HashEmbedder::default()))
                .unwrap();

        struct OtherModel;
        #[async_trait::async_trait]
        impl Embedder for OtherModel {
            fn model_id(&self) -> &str {
                "other-model"
            }
            async fn embed(&self, _text: &str) -> crate::error::Result<Vec<f32>> {
                Ok(vec![0.0; 4])
            }
        }

        let err = VectorStore::open(conn, "pinned", Arc::new(OtherModel));
        assert!(matches!(err, Err(MemoryError::EmbedderMismatch { .. })));
    }
}
