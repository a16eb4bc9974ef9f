//! SQLite Vector Index - 정확한 코사인 k-NN 검색
//!
//! 청크 ID를 키로 하는 SQLite 테이블에 벡터를 저장하고, 질의 시 전수 비교로
//! 코사인 유사도를 계산합니다. AUTOINCREMENT 순번이 삽입 순서이며
//! 동점 관련도의 결정적 순서로 사용됩니다.
//! 저장 위치: ~/.docgap-rag/vectors.db

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};

use super::vector::{
    cosine_distance, distance_to_relevance, Chunk, IndexEntry, RetrievalResult, RetrievedChunk,
    VectorIndex,
};
use crate::error::{IndexError, KbError, KbResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id TEXT NOT NULL UNIQUE,
    document_id TEXT NOT NULL,
    sequence_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    source_label TEXT NOT NULL,
    page_hint INTEGER,
    embedder_id TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
"#;

const SELECT_ENTRIES: &str = "SELECT chunk_id, document_id, sequence_index, text, source_label, \
     page_hint, embedder_id, vector FROM chunks ORDER BY seq";

// ============================================================================
// SqliteVectorIndex
// ============================================================================

/// SQLite 벡터 인덱스 구현
///
/// 모든 변경은 트랜잭션 안에서 실행되고, 블로킹 작업은 `spawn_blocking`으로
/// 런타임 워커를 막지 않습니다.
#[derive(Clone)]
pub struct SqliteVectorIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVectorIndex {
    /// 인덱스 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로
    pub fn open(path: &Path) -> KbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    KbError::Storage(format!("failed to create index directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(IndexError::from)?;

        Self::initialize(conn)
    }

    /// 메모리 인덱스 (테스트용)
    pub fn open_in_memory() -> KbResult<Self> {
        let conn = Connection::open_in_memory().map_err(IndexError::from)?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> KbResult<Self> {
        conn.execute_batch(SCHEMA).map_err(IndexError::from)?;
        tracing::debug!("Vector index initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 블로킹 스레드에서 커넥션 작업 실행
    async fn with_conn<T, F>(&self, f: F) -> KbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> KbResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| KbError::Storage(format!("Lock error: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| KbError::Storage(format!("index task failed: {}", e)))?
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn insert_batch(&self, entries: &[IndexEntry]) -> KbResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let entries = entries.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(IndexError::from)?;
            let inserted = insert_entries(&tx, &entries)?;
            tx.commit().map_err(IndexError::from)?;
            Ok(inserted)
        })
        .await
    }

    async fn delete_by_document(&self, document_id: &str) -> KbResult<usize> {
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(IndexError::from)?;
            let removed = tx
                .execute(
                    "DELETE FROM chunks WHERE document_id = ?1",
                    params![document_id],
                )
                .map_err(IndexError::from)?;
            tx.commit().map_err(IndexError::from)?;
            tracing::debug!("Removed {} vectors for document {}", removed, document_id);
            Ok(removed)
        })
        .await
    }

    async fn query(&self, vector: &[f32], k: usize) -> KbResult<RetrievalResult> {
        let query = vector.to_vec();
        self.with_conn(move |conn| {
            let entries = load_entries(conn)?;
            if entries.is_empty() {
                return Ok(vec![]);
            }

            let expected = entries[0].vector.len();
            if query.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                }
                .into());
            }

            let k = k.clamp(1, entries.len());

            let mut scored: Vec<(f32, IndexEntry)> = entries
                .into_iter()
                .map(|entry| {
                    let relevance = distance_to_relevance(cosine_distance(&query, &entry.vector));
                    (relevance, entry)
                })
                .collect();

            // 안정 정렬: 동점이면 삽입 순서 유지
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);

            Ok(scored
                .into_iter()
                .map(|(relevance_score, entry)| RetrievedChunk {
                    content: entry.chunk.text,
                    source_label: entry.chunk.source_label,
                    relevance_score,
                    chunk_id: entry.chunk_id,
                    document_id: entry.chunk.document_id,
                    page_hint: entry.chunk.page_hint,
                })
                .collect())
        })
        .await
    }

    async fn count(&self) -> KbResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                .map_err(IndexError::from)?;
            Ok(count as usize)
        })
        .await
    }

    async fn has_document(&self, document_id: &str) -> KbResult<bool> {
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
                    params![document_id],
                    |row| row.get(0),
                )
                .map_err(IndexError::from)?;
            Ok(count > 0)
        })
        .await
    }

    async fn dimension(&self) -> KbResult<Option<usize>> {
        self.with_conn(|conn| stored_dimension(conn).map_err(KbError::from))
            .await
    }

    async fn entries(&self) -> KbResult<Vec<IndexEntry>> {
        self.with_conn(|conn| load_entries(conn)).await
    }

    async fn replace_all(&self, entries: &[IndexEntry]) -> KbResult<usize> {
        let entries = entries.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(IndexError::from)?;
            tx.execute("DELETE FROM chunks", []).map_err(IndexError::from)?;
            let inserted = insert_entries(&tx, &entries)?;
            tx.commit().map_err(IndexError::from)?;
            tracing::info!("Replaced index contents with {} vectors", inserted);
            Ok(inserted)
        })
        .await
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 트랜잭션 안에서 엔트리 삽입 (차원/중복 검사 포함)
fn insert_entries(tx: &Transaction<'_>, entries: &[IndexEntry]) -> KbResult<usize> {
    let mut expected = stored_dimension(tx)?;

    for entry in entries {
        let actual = entry.vector.len();
        match expected {
            Some(dim) if dim != actual => {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    actual,
                }
                .into());
            }
            None => expected = Some(actual),
            _ => {}
        }

        let exists = tx
            .query_row(
                "SELECT 1 FROM chunks WHERE chunk_id = ?1",
                params![entry.chunk_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(IndexError::from)?
            .is_some();
        if exists {
            return Err(IndexError::DuplicateKey(entry.chunk_id.clone()).into());
        }

        tx.execute(
            "INSERT INTO chunks (chunk_id, document_id, sequence_index, text, source_label,
                                 page_hint, embedder_id, dimension, vector)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.chunk_id,
                entry.chunk.document_id,
                entry.chunk.sequence_index as i64,
                entry.chunk.text,
                entry.chunk.source_label,
                entry.chunk.page_hint.map(|p| p as i64),
                entry.embedder_id,
                actual as i64,
                encode_vector(&entry.vector),
            ],
        )
        .map_err(IndexError::from)?;
    }

    Ok(entries.len())
}

/// 저장된 벡터 차원 (비어 있으면 None)
fn stored_dimension(conn: &Connection) -> Result<Option<usize>, IndexError> {
    let dim: Option<i64> = conn
        .query_row("SELECT dimension FROM chunks ORDER BY seq LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(dim.map(|d| d as usize))
}

/// 모든 엔트리 로드 (삽입 순서)
fn load_entries(conn: &Connection) -> KbResult<Vec<IndexEntry>> {
    let mut stmt = conn.prepare(SELECT_ENTRIES).map_err(IndexError::from)?;
    let rows = stmt
        .query_map([], |row| {
            let page_hint: Option<i64> = row.get(5)?;
            let blob: Vec<u8> = row.get(7)?;
            Ok(IndexEntry {
                chunk_id: row.get(0)?,
                chunk: Chunk {
                    document_id: row.get(1)?,
                    sequence_index: row.get::<_, i64>(2)? as usize,
                    text: row.get(3)?,
                    source_label: row.get(4)?,
                    page_hint: page_hint.map(|p| p as usize),
                },
                embedder_id: row.get(6)?,
                vector: decode_vector(&blob),
            })
        })
        .map_err(IndexError::from)?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row.map_err(IndexError::from)?);
    }
    Ok(entries)
}

/// f32 벡터 → little-endian 바이트
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// little-endian 바이트 → f32 벡터
fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
