//! Knowledge 모듈 - 문서 지식 저장소
//!
//! - Chunker: 계층적 구분자 텍스트 분할
//! - Vector: 인덱스 트레이트, 청크/검색 결과 타입
//! - SQLite: 벡터 인덱스 구현 (코사인 k-NN)
//! - Store: 업로드 문서 메타데이터

mod chunker;
mod sqlite_index;
mod store;
mod vector;

// Re-exports
pub use chunker::{recursive_chunker, ChunkConfig, Chunker, RecursiveChunker};
pub use sqlite_index::SqliteVectorIndex;
pub use store::{read_json, write_json_atomic, DocumentRecord, DocumentStats, DocumentStore};
pub use vector::{
    cosine_distance, cosine_similarity, distance_to_relevance, Chunk, IndexEntry,
    RetrievalResult, RetrievedChunk, VectorIndex,
};
