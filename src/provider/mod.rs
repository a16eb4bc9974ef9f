//! 답변 생성 프로바이더 체인
//!
//! 우선순위는 시작 시 한 번 정해집니다: OpenAI → Gemini → 규칙 기반.
//! 원격 프로바이더의 실패(전송, 자격 증명, 타임아웃, 형식 오류)는 로그만 남기고
//! 다음 프로바이더로 넘어갑니다. 규칙 기반 프로바이더는 실패하지 않으므로
//! 체인은 항상 결과를 냅니다.

mod gemini;
mod openai;
mod rule_based;

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppConfig;
use crate::knowledge::RetrievedChunk;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use rule_based::RuleBasedProvider;

/// 생성 온도
const TEMPERATURE: f32 = 0.3;
/// 최대 출력 토큰
const MAX_TOKENS: u32 = 1500;

/// 모든 프로바이더가 공유하는 시스템 프롬프트
pub const SYSTEM_PROMPT: &str = r#"You are an intelligent knowledge base assistant. Your responsibilities:

1. Answer questions using ONLY the provided context from the knowledge base
2. Assess whether you have sufficient information (provide confidence score 0-1)
3. Identify specific information gaps when answer is incomplete
4. Suggest concrete enrichment actions to fill those gaps

IMPORTANT RULES:
- If context is relevant and complete: confidence > 0.7, is_complete = true
- If context is partial or vague: confidence 0.4-0.7, is_complete = false
- If context is irrelevant or missing: confidence < 0.4, is_complete = false
- Always cite which sources you used
- Be honest about uncertainties

Respond in valid JSON format with these exact fields:
{
  "answer": "Your detailed answer here",
  "confidence": 0.85,
  "sources_used": ["document1.pdf", "document2.txt"],
  "is_complete": true,
  "missing_information": ["specific gap 1", "specific gap 2"],
  "enrichment_suggestions": [
    {
      "missing_topic": "specific topic name",
      "suggested_action": "concrete action to get this info",
      "priority": "high"
    }
  ],
  "reasoning": "Explain why you're confident or not"
}"#;

/// 검색 결과가 없을 때의 컨텍스트 문구
pub const NO_CONTEXT: &str = "No relevant context found in the knowledge base.";

// ============================================================================
// Types
// ============================================================================

/// 보강 제안 우선순위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// 지식 공백을 메우기 위한 제안
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSuggestion {
    pub missing_topic: String,
    pub suggested_action: String,
    pub priority: Priority,
}

/// 프로바이더 원시 결과 (엄격한 스키마)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAnswer {
    pub answer: String,
    pub confidence: f64,
    pub sources_used: Vec<String>,
    pub is_complete: bool,
    #[serde(default)]
    pub missing_information: Option<Vec<String>>,
    #[serde(default)]
    pub enrichment_suggestions: Option<Vec<EnrichmentSuggestion>>,
    pub reasoning: String,
}

impl RawAnswer {
    /// 모델 출력 파싱
    ///
    /// 마크다운 코드 펜스는 허용합니다. 필드 누락, 타입 불일치, 범위 밖
    /// confidence, 알 수 없는 priority는 Malformed입니다.
    pub fn parse(text: &str) -> Result<Self, ProviderError> {
        let json = strip_code_fence(text);
        let parsed: RawAnswer =
            serde_json::from_str(json).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if !(0.0..=1.0).contains(&parsed.confidence) {
            return Err(ProviderError::Malformed(format!(
                "confidence {} outside [0, 1]",
                parsed.confidence
            )));
        }
        Ok(parsed)
    }
}

/// ```json ... ``` 펜스 제거
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // 언어 태그 줄 건너뛰기
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

// ============================================================================
// Errors
// ============================================================================

/// 원격 프로바이더 실패 (체인 내부에서 복구됨)
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("credentials rejected ({status}): {message}")]
    Credentials { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// reqwest 에러 분류
    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(error.to_string())
        }
    }

    /// 실패 상태 코드 분류
    pub(crate) fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message: String = body.chars().take(200).collect();
        match status.as_u16() {
            401 | 403 => ProviderError::Credentials {
                status: status.as_u16(),
                message,
            },
            code => ProviderError::Transport(format!("HTTP {}: {}", code, message)),
        }
    }
}

// ============================================================================
// Generation Request
// ============================================================================

/// 한 질의에 대한 생성 입력
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub query: &'a str,
    pub context: &'a [RetrievedChunk],
}

impl<'a> GenerationRequest<'a> {
    pub fn new(query: &'a str, context: &'a [RetrievedChunk]) -> Self {
        Self { query, context }
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    /// 컨텍스트와 질문을 합친 사용자 메시지
    pub fn user_message(&self) -> String {
        format!("Context:\n{}\n\nQuestion: {}", format_context(self.context), self.query)
    }
}

/// 검색 결과를 프롬프트용 텍스트로 변환
pub fn format_context(context: &[RetrievedChunk]) -> String {
    if context.is_empty() {
        return NO_CONTEXT.to_string();
    }

    let mut blocks = Vec::with_capacity(context.len());
    for (idx, chunk) in context.iter().enumerate() {
        let page = chunk
            .page_hint
            .map(|p| p.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let mut block = String::new();
        let _ = write!(
            block,
            "[Source {}: {} - Page {} (Relevance: {:.2})]\n{}\n",
            idx + 1,
            chunk.source_label,
            page,
            chunk.relevance_score,
            chunk.content
        );
        blocks.push(block);
    }
    blocks.join("\n")
}

// ============================================================================
// Provider Chain
// ============================================================================

/// 원격 프로바이더 (닫힌 집합)
pub enum RemoteProvider {
    OpenAi(OpenAiProvider),
    Gemini(GeminiProvider),
}

impl RemoteProvider {
    pub fn name(&self) -> String {
        match self {
            RemoteProvider::OpenAi(p) => p.name(),
            RemoteProvider::Gemini(p) => p.name(),
        }
    }

    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Result<RawAnswer, ProviderError> {
        match self {
            RemoteProvider::OpenAi(p) => p.generate(request).await,
            RemoteProvider::Gemini(p) => p.generate(request).await,
        }
    }
}

/// 체인 실행 결과
#[derive(Debug, Clone)]
pub struct Generated {
    pub raw: RawAnswer,
    /// 결과를 만든 프로바이더 이름
    pub provider: String,
}

/// 체인 상태 요약
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub provider_name: String,
    pub is_available: bool,
    pub chain: Vec<String>,
}

/// 프로바이더 체인
pub struct ProviderChain {
    remotes: Vec<RemoteProvider>,
    fallback: RuleBasedProvider,
}

impl ProviderChain {
    /// 원격 프로바이더 목록으로 생성 (규칙 기반은 항상 마지막)
    pub fn new(remotes: Vec<RemoteProvider>) -> Self {
        Self {
            remotes,
            fallback: RuleBasedProvider,
        }
    }

    /// 규칙 기반만
    pub fn rule_based_only() -> Self {
        Self::new(Vec::new())
    }

    /// 설정에서 생성
    pub fn from_config(config: &AppConfig) -> Self {
        let mut remotes = Vec::new();

        if let Some(key) = config.openai_key() {
            match OpenAiProvider::new(key, &config.openai_model, config.provider_timeout) {
                Ok(p) => remotes.push(RemoteProvider::OpenAi(p)),
                Err(e) => tracing::warn!("OpenAI provider disabled: {}", e),
            }
        } else if config.openai_api_key.is_some() {
            tracing::warn!("OPENAI_API_KEY does not start with 'sk-', skipping OpenAI");
        }

        if let Some(key) = &config.google_api_key {
            match GeminiProvider::new(key, &config.gemini_model, config.provider_timeout) {
                Ok(p) => remotes.push(RemoteProvider::Gemini(p)),
                Err(e) => tracing::warn!("Gemini provider disabled: {}", e),
            }
        }

        let chain = Self::new(remotes);
        tracing::info!("Provider chain: {}", chain.names().join(" -> "));
        chain
    }

    /// 순서대로 프로바이더 이름
    pub fn names(&self) -> Vec<String> {
        self.remotes
            .iter()
            .map(RemoteProvider::name)
            .chain(std::iter::once(self.fallback.name().to_string()))
            .collect()
    }

    /// 활성(첫 번째) 프로바이더 정보
    pub fn describe(&self) -> ProviderInfo {
        let chain = self.names();
        ProviderInfo {
            provider_name: chain.first().cloned().unwrap_or_default(),
            is_available: true,
            chain,
        }
    }

    /// 체인 실행
    ///
    /// 원격 실패는 호출자에게 전달되지 않습니다.
    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Generated {
        for remote in &self.remotes {
            match remote.generate(request).await {
                Ok(raw) => {
                    tracing::debug!("Provider '{}' answered", remote.name());
                    return Generated {
                        raw,
                        provider: remote.name(),
                    };
                }
                Err(e) => {
                    tracing::warn!("Provider '{}' failed, trying next: {}", remote.name(), e);
                }
            }
        }

        Generated {
            raw: self.fallback.generate(request),
            provider: self.fallback.name().to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// 요청 하나를 받아 200과 주어진 본문으로 응답하는 로컬 서버, 엔드포인트 반환
    async fn serve_once(body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    /// 헤더와 Content-Length만큼의 본문을 모두 읽음
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let len = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + len {
                    return;
                }
            }
        }
    }

    fn openai_chain(endpoint: String) -> ProviderChain {
        let openai = OpenAiProvider::new("sk-test", "gpt-3.5-turbo", Duration::from_secs(5))
            .unwrap()
            .with_endpoint(endpoint);
        ProviderChain::new(vec![RemoteProvider::OpenAi(openai)])
    }

    fn chat_envelope(content: &str) -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    fn chunk(source: &str, page: Option<usize>, score: f32, content: &str) -> RetrievedChunk {
        RetrievedChunk {
            content: content.into(),
            source_label: source.into(),
            relevance_score: score,
            chunk_id: format!("{}_0", source),
            document_id: source.into(),
            page_hint: page,
        }
    }

    const VALID: &str = r#"{
        "answer": "Twenty days.",
        "confidence": 0.85,
        "sources_used": ["policy.pdf"],
        "is_complete": true,
        "missing_information": null,
        "enrichment_suggestions": null,
        "reasoning": "Stated directly."
    }"#;

    #[test]
    fn test_parse_valid() {
        let raw = RawAnswer::parse(VALID).unwrap();
        assert_eq!(raw.answer, "Twenty days.");
        assert!(raw.is_complete);
        assert!(raw.missing_information.is_none());
    }

    #[test]
    fn test_parse_tolerates_code_fence() {
        let fenced = format!("```json\n{}\n```", VALID);
        assert!(RawAnswer::parse(&fenced).is_ok());
        let bare_fence = format!("```\n{}\n```", VALID);
        assert!(RawAnswer::parse(&bare_fence).is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        // 필드 누락
        assert!(matches!(
            RawAnswer::parse(r#"{"answer": "x", "confidence": 0.5}"#),
            Err(ProviderError::Malformed(_))
        ));
        // 범위 밖 confidence
        let out_of_range = VALID.replace("0.85", "1.5");
        assert!(matches!(
            RawAnswer::parse(&out_of_range),
            Err(ProviderError::Malformed(_))
        ));
        // 알 수 없는 priority
        let bad_priority = VALID.replace(
            r#""enrichment_suggestions": null"#,
            r#""enrichment_suggestions": [{"missing_topic": "a", "suggested_action": "b", "priority": "urgent"}]"#,
        );
        assert!(matches!(
            RawAnswer::parse(&bad_priority),
            Err(ProviderError::Malformed(_))
        ));
        // JSON 아님
        assert!(RawAnswer::parse("I think the answer is 20").is_err());
    }

    #[test]
    fn test_format_context() {
        let context = vec![
            chunk("a.pdf", Some(2), 0.876, "alpha"),
            chunk("b.txt", None, 0.5, "beta"),
        ];
        let text = format_context(&context);
        assert_eq!(
            text,
            "[Source 1: a.pdf - Page 2 (Relevance: 0.88)]\nalpha\n\n\
             [Source 2: b.txt - Page N/A (Relevance: 0.50)]\nbeta\n"
        );
        assert_eq!(format_context(&[]), NO_CONTEXT);
    }

    #[test]
    fn test_user_message_layout() {
        let request = GenerationRequest::new("What?", &[]);
        assert_eq!(
            request.user_message(),
            format!("Context:\n{}\n\nQuestion: What?", NO_CONTEXT)
        );
    }

    #[test]
    fn test_rule_based_only_describe() {
        let chain = ProviderChain::rule_based_only();
        let info = chain.describe();
        assert_eq!(info.provider_name, "Rule-Based Fallback");
        assert!(info.is_available);
        assert_eq!(info.chain.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_remotes_fall_through_to_rule_based() {
        let timeout = Duration::from_millis(500);
        let openai = OpenAiProvider::new("sk-test", "gpt-3.5-turbo", timeout)
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/v1/chat/completions");
        let gemini = GeminiProvider::new("fake", "gemini-2.5-flash", timeout)
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/generate");
        let chain = ProviderChain::new(vec![
            RemoteProvider::OpenAi(openai),
            RemoteProvider::Gemini(gemini),
        ]);

        assert_eq!(chain.describe().chain.len(), 3);
        assert_eq!(chain.describe().provider_name, "OpenAI (gpt-3.5-turbo)");

        let generated = chain
            .generate(&GenerationRequest::new("vacation policy", &[]))
            .await;
        assert_eq!(generated.provider, "Rule-Based Fallback");
        assert!((generated.raw.confidence - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_well_formed_remote_answer_is_used() {
        let chain = openai_chain(serve_once(chat_envelope(VALID)).await);
        let generated = chain
            .generate(&GenerationRequest::new("vacation policy", &[]))
            .await;
        assert_eq!(generated.provider, "OpenAI (gpt-3.5-turbo)");
        assert_eq!(generated.raw.answer, "Twenty days.");
    }

    #[tokio::test]
    async fn test_non_json_success_body_falls_back() {
        let chain = openai_chain(serve_once("<html>maintenance</html>".into()).await);
        let generated = chain
            .generate(&GenerationRequest::new("vacation policy", &[]))
            .await;
        assert_eq!(generated.provider, "Rule-Based Fallback");
        assert!(!generated.raw.is_complete);
    }

    #[tokio::test]
    async fn test_off_schema_content_falls_back() {
        let endpoint = serve_once(chat_envelope("I think the answer is 20 days")).await;
        let context = vec![chunk("policy.txt", None, 0.9, "Twenty vacation days.")];
        let generated = openai_chain(endpoint)
            .generate(&GenerationRequest::new("vacation policy", &context))
            .await;
        assert_eq!(generated.provider, "Rule-Based Fallback");
        assert!((generated.raw.confidence - 0.65).abs() < 1e-9);
        assert_eq!(generated.raw.sources_used, vec!["policy.txt".to_string()]);
    }

    #[test]
    fn test_from_config_skips_invalid_openai_key() {
        let mut config = AppConfig::offline("/tmp/unused");
        config.openai_api_key = Some("not-sk".into());
        let chain = ProviderChain::from_config(&config);
        assert_eq!(chain.names(), vec!["Rule-Based Fallback".to_string()]);

        config.openai_api_key = Some("sk-live".into());
        config.google_api_key = Some("g".into());
        let chain = ProviderChain::from_config(&config);
        assert_eq!(chain.names().len(), 3);
        assert!(chain.names()[0].starts_with("OpenAI"));
        assert!(chain.names()[1].starts_with("Google Gemini"));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ProviderError::from_status(reqwest::StatusCode::UNAUTHORIZED, "no"),
            ProviderError::Credentials { status: 401, .. }
        ));
        assert!(matches!(
            ProviderError::from_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            ProviderError::Transport(_)
        ));
    }
}
