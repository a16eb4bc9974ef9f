//! Vector Index - 벡터 인덱스 트레이트 및 유틸리티
//!
//! 코사인 거리(0 = 동일, 2 = 반대)를 [0, 1] 관련도 점수로 변환해서만
//! 외부에 노출합니다. 원시 거리는 인덱스 밖으로 나가지 않습니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KbResult;

// ============================================================================
// Types
// ============================================================================

/// 문서에서 파생된 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 문서 ID
    pub document_id: String,
    /// 문서 내 순번 (0-based)
    pub sequence_index: usize,
    /// 청크 텍스트
    pub text: String,
    /// 출처 라벨 (업로드 파일명)
    pub source_label: String,
    /// 페이지 힌트 (PDF 등, 1부터 시작)
    pub page_hint: Option<usize>,
}

impl Chunk {
    /// 청크 ID (`{document_id}_{sequence_index}`)
    pub fn chunk_id(&self) -> String {
        format!("{}_{}", self.document_id, self.sequence_index)
    }
}

/// 인덱스 엔트리 (저장용)
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// 청크 ID
    pub chunk_id: String,
    /// 임베딩 벡터
    pub vector: Vec<f32>,
    /// 원본 청크
    pub chunk: Chunk,
    /// 벡터를 만든 임베딩 전략 ID
    pub embedder_id: String,
}

impl IndexEntry {
    /// 청크와 벡터로 엔트리 생성
    pub fn new(chunk: Chunk, vector: Vec<f32>, embedder_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk.chunk_id(),
            vector,
            chunk,
            embedder_id: embedder_id.into(),
        }
    }
}

/// 검색 결과 한 건
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// 청크 텍스트
    pub content: String,
    /// 출처 라벨
    pub source_label: String,
    /// 관련도 점수 (0.0 ~ 1.0)
    pub relevance_score: f32,
    /// 청크 ID
    pub chunk_id: String,
    /// 문서 ID
    pub document_id: String,
    /// 페이지 힌트
    pub page_hint: Option<usize>,
}

/// 관련도 내림차순 검색 결과 (비어 있으면 "인덱싱된 지식 없음")
pub type RetrievalResult = Vec<RetrievedChunk>;

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// VectorIndex 트레이트 (async)
///
/// 모든 벡터는 같은 차원이어야 하며, 다른 차원의 삽입/질의는 거부됩니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 엔트리 배치 삽입 (하나라도 실패하면 전체 롤백)
    async fn insert_batch(&self, entries: &[IndexEntry]) -> KbResult<usize>;

    /// 문서의 모든 엔트리 삭제, 삭제된 개수 반환
    async fn delete_by_document(&self, document_id: &str) -> KbResult<usize>;

    /// k-최근접 이웃 검색 (k는 [1, count]로 보정)
    async fn query(&self, vector: &[f32], k: usize) -> KbResult<RetrievalResult>;

    /// 엔트리 개수
    async fn count(&self) -> KbResult<usize>;

    /// 문서의 엔트리 존재 여부
    async fn has_document(&self, document_id: &str) -> KbResult<bool>;

    /// 저장된 벡터 차원 (비어 있으면 None)
    async fn dimension(&self) -> KbResult<Option<usize>>;

    /// 모든 엔트리 (삽입 순서)
    async fn entries(&self) -> KbResult<Vec<IndexEntry>>;

    /// 전체 내용을 원자적으로 교체 (재임베딩용)
    async fn replace_all(&self, entries: &[IndexEntry]) -> KbResult<usize>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// 코사인 거리 (0.0 ~ 2.0)
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// 거리를 관련도로 변환: `1 - distance / 2`, [0, 1]로 보정
pub fn distance_to_relevance(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

// ============================================================================
// Tests
// ============================================================================
