//! 에러 타입
//!
//! 호출자에게 노출되는 에러 분류입니다.
//! 원격 전송 실패와 응답 파싱 실패는 여기에 없습니다. 임베딩 강등과
//! 프로바이더 체인 폴백에서 내부적으로 복구되기 때문입니다.

use thiserror::Error;

/// 지식베이스 에러
#[derive(Debug, Error)]
pub enum KbError {
    /// 빈 문서, 지원하지 않는 형식, 추출 가능한 텍스트 없음
    #[error("Content error: {0}")]
    Content(String),

    /// 잘못된 요청 (평점 범위, 빈 질문 등)
    #[error("Validation error: {0}")]
    Validation(String),

    /// 영속화 실패 (메모리 상태는 이전으로 롤백됨)
    #[error("Storage error: {0}")]
    Storage(String),

    /// 벡터 인덱스 계약 위반
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    Config(String),
}

/// 벡터 인덱스 에러
#[derive(Debug, Error)]
pub enum IndexError {
    /// 저장된 벡터와 차원이 다름 (임베딩 전략 변경 시 `reindex` 필요)
    #[error("dimension mismatch: index holds {expected}-d vectors, got {actual}-d (run `reindex` after switching embedding strategy)")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 중복 청크 ID
    #[error("duplicate chunk id: {0}")]
    DuplicateKey(String),

    /// SQLite 백엔드 에러
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        IndexError::Backend(e.to_string())
    }
}

/// 라이브러리 결과 타입
pub type KbResult<T> = std::result::Result<T, KbError>;
