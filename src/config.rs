//! 설정 모듈
//!
//! 시작 시 한 번 생성되어 파이프라인 전체에 참조로 전달됩니다.
//! 모든 값은 환경변수에서 읽으며, 없으면 기본값을 사용합니다.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KbError, KbResult};
use crate::knowledge::ChunkConfig;

/// OpenAI 기본 모델
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

/// Gemini 기본 모델
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// 프로바이더 호출 기본 타임아웃 (초)
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.docgap-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docgap-rag")
}

// ============================================================================
// AppConfig
// ============================================================================

/// 애플리케이션 설정
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 데이터 저장 디렉토리
    pub data_dir: PathBuf,
    /// 청킹 설정
    pub chunk: ChunkConfig,
    /// OpenAI API 키 (`sk-`로 시작해야 사용)
    pub openai_api_key: Option<String>,
    /// OpenAI 모델
    pub openai_model: String,
    /// Google API 키 (Gemini 답변 생성 + 원격 임베딩)
    pub google_api_key: Option<String>,
    /// Gemini 모델
    pub gemini_model: String,
    /// 원격 임베딩 사용 여부 (키가 있어도 끌 수 있음)
    pub remote_embedding: bool,
    /// 원격 프로바이더 호출 타임아웃
    pub provider_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            chunk: ChunkConfig::default(),
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            google_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            remote_embedding: true,
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        }
    }
}

impl AppConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> KbResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로부터 설정 생성
    ///
    /// 빈 문자열은 설정되지 않은 것으로 취급합니다.
    pub fn from_lookup<F>(lookup: F) -> KbResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let data_dir = get("DOCGAP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let mut chunk = defaults.chunk;
        if let Some(v) = get("DOCGAP_CHUNK_SIZE") {
            chunk.max_characters = parse_number("DOCGAP_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("DOCGAP_CHUNK_OVERLAP") {
            chunk.overlap_characters = parse_number("DOCGAP_CHUNK_OVERLAP", &v)?;
        }
        chunk.validate()?;

        // 우선순위: GEMINI_API_KEY > GOOGLE_AI_API_KEY > GOOGLE_API_KEY
        let google_api_key = get("GEMINI_API_KEY")
            .or_else(|| get("GOOGLE_AI_API_KEY"))
            .or_else(|| get("GOOGLE_API_KEY"));

        let remote_embedding = match get("DOCGAP_REMOTE_EMBEDDING") {
            Some(v) => parse_bool("DOCGAP_REMOTE_EMBEDDING", &v)?,
            None => true,
        };

        let provider_timeout = match get("DOCGAP_PROVIDER_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_number("DOCGAP_PROVIDER_TIMEOUT_SECS", &v)? as u64),
            None => defaults.provider_timeout,
        };

        Ok(Self {
            data_dir,
            chunk,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            google_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            remote_embedding,
            provider_timeout,
        })
    }

    /// 지정된 데이터 디렉토리, 원격 호출 없는 설정 (테스트/오프라인용)
    pub fn offline(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            remote_embedding: false,
            ..Self::default()
        }
    }

    /// OpenAI 키가 유효한 형식인지
    pub fn openai_key(&self) -> Option<&str> {
        self.openai_api_key
            .as_deref()
            .filter(|k| k.starts_with("sk-"))
    }

    /// 문서 메타데이터 파일 경로
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("documents").join("metadata.json")
    }

    /// 업로드 파일 저장 디렉토리
    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("documents")
    }

    /// 피드백 파일 경로
    pub fn feedback_path(&self) -> PathBuf {
        self.data_dir.join("feedback").join("feedback.json")
    }

    /// 벡터 인덱스 DB 경로
    pub fn feedback_export_path(&self) -> PathBuf {
        self.data_dir.join("feedback").join("feedback_export.csv")
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("vectors.db")
    }
}

fn parse_number(key: &str, value: &str) -> KbResult<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| KbError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> KbResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(KbError::Config(format!("{} must be a boolean, got '{}'", key, value))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.chunk.max_characters, 800);
        assert_eq!(config.chunk.overlap_characters, 200);
        assert_eq!(config.openai_model, DEFAULT_OPENAI_MODEL);
        assert!(config.openai_key().is_none());
        assert!(config.google_api_key.is_none());
        assert_eq!(config.provider_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_google_key_priority() {
        let config = AppConfig::from_lookup(lookup(&[
            ("GOOGLE_API_KEY", "third"),
            ("GOOGLE_AI_API_KEY", "second"),
        ]))
        .unwrap();
        assert_eq!(config.google_api_key.as_deref(), Some("second"));

        let config = AppConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "first"),
            ("GOOGLE_API_KEY", "third"),
        ]))
        .unwrap();
        assert_eq!(config.google_api_key.as_deref(), Some("first"));
    }

    #[test]
    fn test_openai_key_requires_prefix() {
        let config = AppConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "not-a-key")])).unwrap();
        assert!(config.openai_key().is_none());

        let config = AppConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-abc")])).unwrap();
        assert_eq!(config.openai_key(), Some("sk-abc"));
    }

    #[test]
    fn test_invalid_chunk_config_rejected() {
        let result = AppConfig::from_lookup(lookup(&[
            ("DOCGAP_CHUNK_SIZE", "100"),
            ("DOCGAP_CHUNK_OVERLAP", "100"),
        ]));
        assert!(matches!(result, Err(KbError::Config(_))));

        let result = AppConfig::from_lookup(lookup(&[("DOCGAP_CHUNK_SIZE", "abc")]));
        assert!(matches!(result, Err(KbError::Config(_))));
    }

    #[test]
    fn test_remote_embedding_flag() {
        let config =
            AppConfig::from_lookup(lookup(&[("DOCGAP_REMOTE_EMBEDDING", "off")])).unwrap();
        assert!(!config.remote_embedding);
        assert!(AppConfig::from_lookup(lookup(&[("DOCGAP_REMOTE_EMBEDDING", "maybe")])).is_err());
    }

    #[test]
    fn test_paths_under_data_dir() {
        let config = AppConfig::offline("/tmp/kb");
        assert_eq!(config.index_path(), PathBuf::from("/tmp/kb/vectors.db"));
        assert_eq!(
            config.feedback_path(),
            PathBuf::from("/tmp/kb/feedback/feedback.json")
        );
        assert!(!config.remote_embedding);
    }
}
