//! Document Store - 업로드 문서 메타데이터 저장소
//!
//! 메타데이터는 JSON 파일 하나(`documents/metadata.json`)에 저장하고,
//! 업로드 원본은 `documents/<document_id>/<filename>`에 보관합니다.
//! 모든 쓰기는 같은 디렉토리의 임시 파일에 쓴 뒤 rename하는 원자적 교체입니다.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{KbError, KbResult};

// ============================================================================
// Types
// ============================================================================

/// 문서 메타데이터 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    pub num_chunks: usize,
    pub file_size: u64,
    pub file_path: PathBuf,
}

/// 저장소 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentStats {
    pub document_count: usize,
    pub total_chunks: usize,
    pub total_bytes: u64,
}

// ============================================================================
// Atomic JSON persistence
// ============================================================================

/// JSON 파일 읽기 (없으면 None)
pub fn read_json<T: DeserializeOwned>(path: &Path) -> KbResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)
        .map_err(|e| KbError::Storage(format!("failed to read {}: {}", path.display(), e)))?;
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| KbError::Storage(format!("corrupt file {}: {}", path.display(), e)))?;
    Ok(Some(value))
}

/// JSON 파일 원자적 교체
///
/// 같은 디렉토리에 임시 파일을 만든 뒤 rename하므로 중간 상태가 보이지 않습니다.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> KbResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| KbError::Storage(format!("no parent directory for {}", path.display())))?;
    std::fs::create_dir_all(dir)
        .map_err(|e| KbError::Storage(format!("failed to create {}: {}", dir.display(), e)))?;

    let storage = |e: std::io::Error| KbError::Storage(format!("failed to write {}: {}", path.display(), e));

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(storage)?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), value)
        .map_err(|e| KbError::Storage(format!("failed to serialize {}: {}", path.display(), e)))?;
    tmp.as_file_mut().flush().map_err(storage)?;
    tmp.persist(path).map_err(|e| storage(e.error))?;
    Ok(())
}

// ============================================================================
// DocumentStore
// ============================================================================

/// 문서 메타데이터 저장소
pub struct DocumentStore {
    metadata_path: PathBuf,
    upload_dir: PathBuf,
    records: Mutex<BTreeMap<String, DocumentRecord>>,
}

impl DocumentStore {
    /// 저장소 열기 (메타데이터 파일이 없으면 빈 저장소)
    pub fn open(metadata_path: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> KbResult<Self> {
        let metadata_path = metadata_path.into();
        let records: BTreeMap<String, DocumentRecord> =
            read_json(&metadata_path)?.unwrap_or_default();

        tracing::debug!(
            "Document store loaded {} records from {:?}",
            records.len(),
            metadata_path
        );

        Ok(Self {
            metadata_path,
            upload_dir: upload_dir.into(),
            records: Mutex::new(records),
        })
    }

    fn lock(&self) -> KbResult<std::sync::MutexGuard<'_, BTreeMap<String, DocumentRecord>>> {
        self.records
            .lock()
            .map_err(|e| KbError::Storage(format!("Lock error: {}", e)))
    }

    /// 업로드 원본 저장, 저장된 경로 반환
    ///
    /// 파일명은 마지막 경로 구성요소만 사용합니다.
    pub fn save_file(&self, document_id: &str, filename: &str, bytes: &[u8]) -> KbResult<PathBuf> {
        let name = safe_filename(filename)?;
        let dir = self.upload_dir.join(document_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| KbError::Storage(format!("failed to create {}: {}", dir.display(), e)))?;
        let path = dir.join(name);
        std::fs::write(&path, bytes)
            .map_err(|e| KbError::Storage(format!("failed to write {}: {}", path.display(), e)))?;
        Ok(path)
    }

    /// 문서의 업로드 디렉토리 삭제 (없으면 무시)
    pub fn remove_files(&self, document_id: &str) -> KbResult<()> {
        let dir = self.upload_dir.join(document_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .map_err(|e| KbError::Storage(format!("failed to remove {}: {}", dir.display(), e)))?;
        }
        Ok(())
    }

    /// 레코드 추가 (같은 ID는 덮어씀)
    pub fn insert(&self, record: DocumentRecord) -> KbResult<()> {
        let mut records = self.lock()?;
        let id = record.document_id.clone();
        let previous = records.insert(id.clone(), record);

        if let Err(e) = write_json_atomic(&self.metadata_path, &*records) {
            match previous {
                Some(prev) => records.insert(id, prev),
                None => records.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }

    /// 레코드 삭제, 삭제된 레코드 반환
    pub fn remove(&self, document_id: &str) -> KbResult<Option<DocumentRecord>> {
        let mut records = self.lock()?;
        let Some(removed) = records.remove(document_id) else {
            return Ok(None);
        };

        if let Err(e) = write_json_atomic(&self.metadata_path, &*records) {
            records.insert(document_id.to_string(), removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    /// ID로 조회
    pub fn get(&self, document_id: &str) -> KbResult<Option<DocumentRecord>> {
        Ok(self.lock()?.get(document_id).cloned())
    }

    /// 전체 목록 (최근 업로드 먼저)
    pub fn list(&self) -> KbResult<Vec<DocumentRecord>> {
        let mut list: Vec<DocumentRecord> = self.lock()?.values().cloned().collect();
        list.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
        Ok(list)
    }

    /// 통계
    pub fn stats(&self) -> KbResult<DocumentStats> {
        let records = self.lock()?;
        Ok(DocumentStats {
            document_count: records.len(),
            total_chunks: records.values().map(|r| r.num_chunks).sum(),
            total_bytes: records.values().map(|r| r.file_size).sum(),
        })
    }
}

/// 경로 구성요소를 제거한 파일명
fn safe_filename(filename: &str) -> KbResult<&str> {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| KbError::Validation(format!("invalid filename: '{}'", filename)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, filename: &str, chunks: usize) -> DocumentRecord {
        DocumentRecord {
            document_id: id.into(),
            filename: filename.into(),
            upload_date: Utc::now(),
            num_chunks: chunks,
            file_size: 10,
            file_path: PathBuf::from(filename),
        }
    }

    fn open(dir: &TempDir) -> DocumentStore {
        DocumentStore::open(
            dir.path().join("documents/metadata.json"),
            dir.path().join("documents"),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_reload() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.insert(record("a", "a.txt", 3)).unwrap();
            store.insert(record("b", "b.md", 2)).unwrap();
        }

        let store = open(&dir);
        assert_eq!(store.get("a").unwrap().unwrap().num_chunks, 3);
        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.total_chunks, 5);
        assert_eq!(stats.total_bytes, 20);
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.insert(record("a", "a.txt", 1)).unwrap();

        assert!(store.remove("a").unwrap().is_some());
        assert!(store.remove("a").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_remove_files() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let path = store.save_file("doc-1", "../../etc/notes.txt", b"hello").unwrap();
        assert_eq!(path, dir.path().join("documents/doc-1/notes.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");

        store.remove_files("doc-1").unwrap();
        assert!(!path.exists());
        // 두 번째 삭제는 무시
        store.remove_files("doc-1").unwrap();
    }

    #[test]
    fn test_invalid_filename() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        assert!(matches!(
            store.save_file("doc", "..", b"x"),
            Err(KbError::Validation(_))
        ));
    }

    #[test]
    fn test_corrupt_metadata_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            DocumentStore::open(&path, dir.path()),
            Err(KbError::Storage(_))
        ));
    }

    #[test]
    fn test_write_json_atomic_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/value.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        write_json_atomic(&path, &vec![4]).unwrap();
        let value: Option<Vec<i32>> = read_json(&path).unwrap();
        assert_eq!(value, Some(vec![4]));
    }
}
