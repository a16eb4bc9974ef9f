//! docgap-rag - 답변 완결성을 판정하는 문서 RAG
//!
//! 업로드한 문서를 청크 단위로 임베딩해 SQLite 벡터 인덱스에 보관하고,
//! 질문에 답하면서 지식베이스에 무엇이 빠져 있는지도 함께 알려줍니다.
//! 답변 프로바이더는 OpenAI → Gemini → 규칙 기반 순으로 대체됩니다.

pub mod answer;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod feedback;
pub mod knowledge;
pub mod provider;
pub mod service;

// Re-exports
pub use answer::{AnswerVerdict, CompletenessEvaluator, ConfidenceBand};
pub use config::AppConfig;
pub use embedding::{Embedder, EmbeddingError, EmbeddingProvider, GeminiEmbedding, HashEmbedding};
pub use error::{IndexError, KbError, KbResult};
pub use feedback::{FeedbackEntry, FeedbackStats, FeedbackStore, NewFeedback};
pub use knowledge::{
    Chunk, ChunkConfig, Chunker, DocumentRecord, DocumentStore, IndexEntry, RecursiveChunker,
    RetrievalResult, RetrievedChunk, SqliteVectorIndex, VectorIndex,
};
pub use provider::{EnrichmentSuggestion, Priority, ProviderChain, RawAnswer};
pub use service::{IngestReport, KnowledgeService, ServiceStats};
