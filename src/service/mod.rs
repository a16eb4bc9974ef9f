//! 지식 서비스 - 업로드, 질의, 피드백 파이프라인
//!
//! 쓰기 경로: 로더 → 청커 → 임베더 → 벡터 인덱스 (+ 메타데이터)
//! 읽기 경로: 질의 → 임베더 → 벡터 인덱스 → 프로바이더 체인 → 완전성 평가

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::answer::{AnswerVerdict, CompletenessEvaluator};
use crate::config::AppConfig;
use crate::embedding::Embedder;
use crate::error::{IndexError, KbError, KbResult};
use crate::extractor::{self, LoadedPage};
use crate::feedback::{FeedbackEntry, FeedbackStats, FeedbackStore, NewFeedback};
use crate::knowledge::{
    recursive_chunker, Chunk, Chunker, DocumentRecord, DocumentStats, DocumentStore, IndexEntry,
    SqliteVectorIndex, VectorIndex,
};
use crate::provider::{Generated, GenerationRequest, ProviderChain, ProviderInfo};

/// 기본 검색 개수
pub const DEFAULT_TOP_K: usize = 5;
/// 최대 검색 개수
pub const MAX_TOP_K: usize = 20;
/// 인덱스와 임베더 차원이 다를 때 답변에 붙는 안내
pub const STALE_INDEX_NOTICE: &str =
    "Knowledge base was indexed with a different embedding model; run `reindex` to search it again";

// ============================================================================
// Types
// ============================================================================

/// 업로드 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub filename: String,
    pub chunk_count: usize,
}

/// 시스템 통계
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub indexed_chunks: usize,
    pub index_dimension: Option<usize>,
    pub documents: DocumentStats,
    pub feedback: FeedbackStats,
    pub provider: ProviderInfo,
    pub embedder_id: String,
}

// ============================================================================
// KnowledgeService
// ============================================================================

/// 지식 서비스
pub struct KnowledgeService {
    chunker: Box<dyn Chunker>,
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    documents: DocumentStore,
    feedback: FeedbackStore,
    providers: ProviderChain,
    evaluator: CompletenessEvaluator,
}

impl KnowledgeService {
    /// 설정대로 모든 구성요소를 열기 (파일 기반 인덱스)
    pub fn open(config: &AppConfig) -> KbResult<Self> {
        let index = SqliteVectorIndex::open(&config.index_path())?;
        Self::with_parts(
            config,
            Embedder::from_config(config),
            Arc::new(index),
            ProviderChain::from_config(config),
        )
    }

    /// 임베더, 인덱스, 프로바이더를 직접 지정
    pub fn with_parts(
        config: &AppConfig,
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
        providers: ProviderChain,
    ) -> KbResult<Self> {
        config.chunk.validate()?;
        Ok(Self {
            chunker: recursive_chunker(config.chunk.clone()),
            embedder,
            index,
            documents: DocumentStore::open(config.metadata_path(), config.upload_dir())?,
            feedback: FeedbackStore::open(config.feedback_path())?,
            providers,
            evaluator: CompletenessEvaluator,
        })
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// 문서 업로드
    ///
    /// 파일 저장 이후 어느 단계에서든 실패하면 파일, 메타데이터, 인덱스 엔트리를
    /// 모두 되돌립니다.
    pub async fn ingest(&self, bytes: &[u8], filename: &str) -> KbResult<IngestReport> {
        let document_id = Uuid::new_v4().to_string();
        let file_path = self.documents.save_file(&document_id, filename, bytes)?;

        match self.index_document(&document_id, filename, bytes).await {
            Ok(chunk_count) => {
                let record = DocumentRecord {
                    document_id: document_id.clone(),
                    filename: filename.to_string(),
                    upload_date: chrono::Utc::now(),
                    num_chunks: chunk_count,
                    file_size: bytes.len() as u64,
                    file_path,
                };
                if let Err(e) = self.documents.insert(record) {
                    self.rollback(&document_id).await;
                    return Err(e);
                }

                tracing::info!(
                    "Indexed '{}' as {} ({} chunks)",
                    filename,
                    document_id,
                    chunk_count
                );
                Ok(IngestReport {
                    document_id,
                    filename: filename.to_string(),
                    chunk_count,
                })
            }
            Err(e) => {
                tracing::warn!("Upload of '{}' failed: {}", filename, e);
                self.rollback(&document_id).await;
                Err(e)
            }
        }
    }

    async fn index_document(&self, document_id: &str, filename: &str, bytes: &[u8]) -> KbResult<usize> {
        // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
        let owned = bytes.to_vec();
        let name = filename.to_string();
        let pages = tokio::task::spawn_blocking(move || extractor::load(&owned, &name))
            .await
            .map_err(|e| KbError::Content(format!("loader task failed: {}", e)))??;

        let chunks = self.chunk_pages(document_id, filename, &pages)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batch = self.embedder.embed_batch(&texts).await;

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(batch.vectors)
            .map(|(chunk, vector)| IndexEntry::new(chunk, vector, batch.embedder_id.as_str()))
            .collect();

        self.index.insert_batch(&entries).await
    }

    /// 페이지별 청킹 (순번은 문서 전체에서 연속)
    fn chunk_pages(&self, document_id: &str, filename: &str, pages: &[LoadedPage]) -> KbResult<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for page in pages {
            for text in self.chunker.split(&page.text)? {
                chunks.push(Chunk {
                    document_id: document_id.to_string(),
                    sequence_index: chunks.len(),
                    text,
                    source_label: filename.to_string(),
                    page_hint: page.page_hint,
                });
            }
        }

        if chunks.is_empty() {
            return Err(KbError::Content(format!("'{}' produced no chunks", filename)));
        }
        Ok(chunks)
    }

    async fn rollback(&self, document_id: &str) {
        if let Err(e) = self.index.delete_by_document(document_id).await {
            tracing::warn!("Rollback: failed to remove vectors for {}: {}", document_id, e);
        }
        if let Err(e) = self.documents.remove(document_id) {
            tracing::warn!("Rollback: failed to remove metadata for {}: {}", document_id, e);
        }
        if let Err(e) = self.documents.remove_files(document_id) {
            tracing::warn!("Rollback: failed to remove files for {}: {}", document_id, e);
        }
    }

    /// 문서 삭제 (청크, 메타데이터, 원본 파일)
    ///
    /// 메타데이터를 먼저 지우고, 인덱스 삭제가 실패하면 레코드를 복원합니다.
    /// 남은 업로드 파일은 경고만 남깁니다. 존재하지 않는 문서면 false.
    pub async fn delete_document(&self, document_id: &str) -> KbResult<bool> {
        let record = self.documents.remove(document_id)?;

        let removed_vectors = match self.index.delete_by_document(document_id).await {
            Ok(count) => count,
            Err(e) => {
                if let Some(record) = record {
                    if let Err(restore) = self.documents.insert(record) {
                        tracing::warn!(
                            "Failed to restore metadata for {} after index error: {}",
                            document_id,
                            restore
                        );
                    }
                }
                return Err(e);
            }
        };

        if let Err(e) = self.documents.remove_files(document_id) {
            tracing::warn!("Leftover upload files for {}: {}", document_id, e);
        }

        let existed = removed_vectors > 0 || record.is_some();
        if existed {
            tracing::info!("Deleted document {} ({} chunks)", document_id, removed_vectors);
        }
        Ok(existed)
    }

    pub fn list_documents(&self) -> KbResult<Vec<DocumentRecord>> {
        self.documents.list()
    }

    pub fn get_document(&self, document_id: &str) -> KbResult<Option<DocumentRecord>> {
        self.documents.get(document_id)
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 질문에 답하고 완전성을 판정
    pub async fn ask(&self, query: &str, top_k: usize) -> KbResult<AnswerVerdict> {
        let query = query.trim();
        if query.is_empty() {
            return Err(KbError::Validation("question must not be empty".into()));
        }
        if !(1..=MAX_TOP_K).contains(&top_k) {
            return Err(KbError::Validation(format!(
                "top_k must be between 1 and {}, got {}",
                MAX_TOP_K, top_k
            )));
        }

        let vector = self.embedder.embed_query(query).await;
        let (retrieved, stale_index) = match self.index.query(&vector, top_k).await {
            Ok(retrieved) => (retrieved, false),
            Err(KbError::Index(IndexError::DimensionMismatch { expected, actual })) => {
                tracing::warn!(
                    "Index holds {}-d vectors but the active embedder produces {}-d; \
                     answering without context until `reindex` runs",
                    expected,
                    actual
                );
                (Vec::new(), true)
            }
            Err(e) => return Err(e),
        };
        tracing::debug!("Retrieved {} chunks for query", retrieved.len());

        let mut generated = self
            .providers
            .generate(&GenerationRequest::new(query, &retrieved))
            .await;
        if stale_index {
            mark_stale_index(&mut generated);
        }
        let verdict = self.evaluator.finalize(query, generated);

        tracing::info!(
            "Answered query {} via {} (confidence {:.2}, complete={})",
            verdict.query_id,
            verdict.provider,
            verdict.confidence,
            verdict.is_complete
        );
        Ok(verdict)
    }

    // ------------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------------

    pub fn submit_feedback(&self, input: NewFeedback) -> KbResult<FeedbackEntry> {
        self.feedback.submit(input)
    }

    pub fn recent_feedback(&self, limit: usize) -> KbResult<Vec<FeedbackEntry>> {
        self.feedback.recent(limit)
    }

    pub fn feedback_for_query(&self, query_id: &str) -> KbResult<Option<FeedbackEntry>> {
        self.feedback.by_query_id(query_id)
    }

    pub fn delete_feedback(&self, feedback_id: u64) -> KbResult<bool> {
        self.feedback.delete(feedback_id)
    }

    pub fn feedback_stats(&self) -> KbResult<FeedbackStats> {
        self.feedback.stats()
    }

    /// 피드백 CSV 내보내기
    pub fn export_feedback(&self, path: &Path) -> KbResult<usize> {
        self.feedback.export_csv(path)
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// 전체 통계
    pub async fn stats(&self) -> KbResult<ServiceStats> {
        Ok(ServiceStats {
            indexed_chunks: self.index.count().await?,
            index_dimension: self.index.dimension().await?,
            documents: self.documents.stats()?,
            feedback: self.feedback.stats()?,
            provider: self.providers.describe(),
            embedder_id: self.embedder.embedder_id(),
        })
    }

    /// 저장된 모든 청크를 현재 임베딩 전략으로 다시 임베딩
    ///
    /// 임베딩 전략이 바뀐 뒤(강등, 키 변경)에는 반드시 실행해야 합니다.
    pub async fn reembed_all(&self) -> KbResult<usize> {
        let entries = self.index.entries().await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = entries.iter().map(|e| e.chunk.text.clone()).collect();
        let batch = self.embedder.embed_batch(&texts).await;

        let replaced: Vec<IndexEntry> = entries
            .into_iter()
            .zip(batch.vectors)
            .map(|(entry, vector)| IndexEntry::new(entry.chunk, vector, batch.embedder_id.as_str()))
            .collect();

        let count = self.index.replace_all(&replaced).await?;
        tracing::info!("Re-embedded {} chunks with {}", count, batch.embedder_id);
        Ok(count)
    }

    pub fn embedder_id(&self) -> String {
        self.embedder.embedder_id()
    }
}

/// 인덱스 차원 불일치로 검색을 건너뛴 답변에 재색인 안내 추가
fn mark_stale_index(generated: &mut Generated) {
    let raw = &mut generated.raw;
    raw.is_complete = false;
    raw.missing_information
        .get_or_insert_with(Vec::new)
        .push(STALE_INDEX_NOTICE.to_string());
}

// ============================================================================
// Tests
// ============================================================================
