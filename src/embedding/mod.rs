//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 두 가지 전략을 제공합니다:
//! - 원격: Gemini 임베딩 API (`gemini.rs`)
//! - 로컬: 특징 해싱 모델 (`local.rs`), 항상 사용 가능
//!
//! [`Embedder`]는 원격 전략이 한 번이라도 실패하면 그 인스턴스가 사는 동안
//! 로컬 전략으로 영구 강등됩니다. 두 전략의 차원이 다르므로 전략이 바뀌면
//! 인덱스 전체를 재임베딩해야 합니다 (`KnowledgeService::reembed_all`).
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = Embedder::from_config(&config);
//! let vector = embedder.embed_query("Hello, world!").await;
//! ```

mod gemini;
mod local;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AppConfig;

pub use gemini::{GeminiEmbedding, DEFAULT_DIMENSION as GEMINI_DIMENSION};
pub use local::{HashEmbedding, DEFAULT_DIMENSION as LOCAL_DIMENSION};

// ============================================================================
// Errors
// ============================================================================

/// 임베딩 실패 (원격 전략에서만 발생)
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// 네트워크 전송 실패
    #[error("transport failure: {0}")]
    Transport(String),

    /// 자격 증명 거부 (401/403)
    #[error("credentials rejected ({status}): {message}")]
    Credentials { status: u16, message: String },

    /// 기타 API 에러 (429 재시도 소진 포함)
    #[error("embedding API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// 응답 파싱 실패
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩 (저장할 문서 청크)
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// 검색 질의 임베딩 (기본 구현: 문서와 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

/// 전략 식별자 (`이름:d차원`), 인덱스 엔트리에 기록됨
pub fn embedder_id(provider: &dyn EmbeddingProvider) -> String {
    format!("{}:d{}", provider.name(), provider.dimension())
}

// ============================================================================
// Embedder (원격 → 로컬 강등)
// ============================================================================

/// 임베딩 배치 결과
#[derive(Debug, Clone)]
pub struct EmbeddedBatch {
    /// 배치 전체를 만든 전략 ID
    pub embedder_id: String,
    /// 벡터 (입력 순서, 모두 같은 차원)
    pub vectors: Vec<Vec<f32>>,
}

/// 강등 가능한 임베더
///
/// 원격 호출 실패는 호출자에게 노출되지 않습니다. 실패 즉시 로컬로 강등되고
/// 이후 원격은 다시 호출하지 않습니다.
pub struct Embedder {
    remote: Option<Box<dyn EmbeddingProvider>>,
    local: HashEmbedding,
    demoted: AtomicBool,
}

impl Embedder {
    /// 원격 전략(선택)과 로컬 전략으로 생성
    pub fn new(remote: Option<Box<dyn EmbeddingProvider>>) -> Self {
        Self {
            remote,
            local: HashEmbedding::default(),
            demoted: AtomicBool::new(false),
        }
    }

    /// 로컬 전략만 사용
    pub fn local_only() -> Self {
        Self::new(None)
    }

    /// 설정에서 생성
    ///
    /// 원격 임베딩이 켜져 있고 Google API 키가 있으면 Gemini를 원격 전략으로 씁니다.
    pub fn from_config(config: &AppConfig) -> Self {
        let remote = match (&config.google_api_key, config.remote_embedding) {
            (Some(key), true) => match GeminiEmbedding::new(key.clone()) {
                Ok(gemini) => Some(Box::new(gemini) as Box<dyn EmbeddingProvider>),
                Err(e) => {
                    tracing::warn!("Remote embedding unavailable, using local model: {}", e);
                    None
                }
            },
            _ => None,
        };

        let embedder = Self::new(remote);
        tracing::info!("Using embedding strategy: {}", embedder.embedder_id());
        embedder
    }

    /// 현재 활성 전략
    pub fn active(&self) -> &dyn EmbeddingProvider {
        match &self.remote {
            Some(remote) if !self.is_demoted() => remote.as_ref(),
            _ => &self.local,
        }
    }

    /// 현재 활성 전략 ID
    pub fn embedder_id(&self) -> String {
        embedder_id(self.active())
    }

    /// 현재 활성 전략 차원
    pub fn dimension(&self) -> usize {
        self.active().dimension()
    }

    /// 강등 여부
    pub fn is_demoted(&self) -> bool {
        self.demoted.load(Ordering::SeqCst)
    }

    /// 원격 전략을 쓰는 중인지
    fn remote_active(&self) -> Option<&dyn EmbeddingProvider> {
        match &self.remote {
            Some(remote) if !self.is_demoted() => Some(remote.as_ref()),
            _ => None,
        }
    }

    fn demote(&self, provider: &str, error: &EmbeddingError) {
        if !self.demoted.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                "Remote embedding '{}' failed ({}); switching to local model {} for the rest of this session. \
                 Stored vectors from the previous strategy need `reindex`.",
                provider,
                error,
                embedder_id(&self.local)
            );
        }
    }

    /// 검색 질의 임베딩 (실패하지 않음)
    pub async fn embed_query(&self, text: &str) -> Vec<f32> {
        if let Some(remote) = self.remote_active() {
            match remote.embed_query(text).await {
                Ok(vector) => return vector,
                Err(e) => self.demote(remote.name(), &e),
            }
        }
        self.local.embed_text(text)
    }

    /// 배치 임베딩
    ///
    /// 배치 도중 강등되면 배치 전체를 로컬로 다시 계산해 차원을 통일합니다.
    pub async fn embed_batch(&self, texts: &[String]) -> EmbeddedBatch {
        if let Some(remote) = self.remote_active() {
            match remote.embed_batch(texts).await {
                Ok(vectors) => {
                    return EmbeddedBatch {
                        embedder_id: embedder_id(remote),
                        vectors,
                    }
                }
                Err(e) => self.demote(remote.name(), &e),
            }
        }

        EmbeddedBatch {
            embedder_id: embedder_id(&self.local),
            vectors: texts.iter().map(|t| self.local.embed_text(t)).collect(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// 항상 실패하는 원격 전략 (호출 횟수 기록)
    struct FailingRemote {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingProvider for FailingRemote {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EmbeddingError::Credentials {
                status: 401,
                message: "invalid key".into(),
            })
        }

        fn dimension(&self) -> usize {
            8
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// 고정 벡터를 돌려주는 원격 전략
    struct FixedRemote;

    #[async_trait]
    impl EmbeddingProvider for FixedRemote {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0; 8])
        }

        fn dimension(&self) -> usize {
            8
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// 질의/문서 호출을 구분해 기록하는 원격 전략
    #[derive(Default)]
    struct RecordingRemote {
        queries: Arc<AtomicUsize>,
        documents: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingRemote {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.documents.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.5; 4])
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.5; 4])
        }

        fn dimension(&self) -> usize {
            4
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_queries_and_chunks_use_separate_tasks() {
        let remote = RecordingRemote::default();
        let queries = Arc::clone(&remote.queries);
        let documents = Arc::clone(&remote.documents);
        let embedder = Embedder::new(Some(Box::new(remote)));

        embedder.embed_query("what is covered?").await;
        embedder.embed_batch(&["chunk one".into(), "chunk two".into()]).await;

        assert_eq!(queries.load(Ordering::SeqCst), 1);
        assert_eq!(documents.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_local_only() {
        let embedder = Embedder::local_only();
        let v = embedder.embed_query("hello world").await;
        assert_eq!(v.len(), LOCAL_DIMENSION);
        assert!(!embedder.is_demoted());
        assert_eq!(embedder.embedder_id(), format!("local-hash:d{}", LOCAL_DIMENSION));
    }

    #[tokio::test]
    async fn test_remote_used_while_healthy() {
        let embedder = Embedder::new(Some(Box::new(FixedRemote)));
        assert_eq!(embedder.embed_query("x").await, vec![1.0; 8]);
        let batch = embedder.embed_batch(&["a".into(), "b".into()]).await;
        assert_eq!(batch.embedder_id, "fixed:d8");
        assert_eq!(batch.vectors.len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_demotion_after_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Embedder::new(Some(Box::new(FailingRemote {
            calls: Arc::clone(&calls),
        })));

        let first = embedder.embed_query("first").await;
        assert_eq!(first.len(), LOCAL_DIMENSION);
        assert!(embedder.is_demoted());

        let _ = embedder.embed_query("second").await;
        let batch = embedder.embed_batch(&["third".into()]).await;

        // 원격은 한 번만 호출됨
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(batch.embedder_id.starts_with("local-hash"));
        assert_eq!(embedder.dimension(), LOCAL_DIMENSION);
    }

    #[tokio::test]
    async fn test_batch_demotion_keeps_single_dimension() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Embedder::new(Some(Box::new(FailingRemote { calls })));
        let batch = embedder
            .embed_batch(&["a".into(), "b".into(), "c".into()])
            .await;
        assert_eq!(batch.vectors.len(), 3);
        assert!(batch.vectors.iter().all(|v| v.len() == LOCAL_DIMENSION));
    }

    #[tokio::test]
    async fn test_from_config_without_key_is_local() {
        let config = AppConfig::offline("/tmp/unused");
        let embedder = Embedder::from_config(&config);
        assert_eq!(embedder.dimension(), LOCAL_DIMENSION);
    }
}
