//! 규칙 기반 프로바이더 - 체인의 마지막 단계
//!
//! 입출력 없이 검색 결과만으로 답변을 만듭니다. 실패하지 않습니다.

use super::{format_context, EnrichmentSuggestion, GenerationRequest, Priority, RawAnswer};

/// 규칙 기반 confidence 상한
const CONFIDENCE_CAP: f64 = 0.65;
/// 이 값을 넘으면 완전한 답변으로 판단
const COMPLETE_THRESHOLD: f64 = 0.5;
/// 이 값 이하면 답변을 유보 문구로 낮춤
const HEDGE_THRESHOLD: f64 = 0.4;
/// 답변에 포함할 컨텍스트 최대 문자 수
const EXCERPT_CHARS: usize = 800;

/// 규칙 기반 프로바이더
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedProvider;

impl RuleBasedProvider {
    pub fn name(&self) -> &'static str {
        "Rule-Based Fallback"
    }

    pub fn generate(&self, request: &GenerationRequest<'_>) -> RawAnswer {
        let query = request.query;

        if request.context.is_empty() {
            return RawAnswer {
                answer: format!(
                    "I couldn't find relevant information in the knowledge base to answer: '{}'. \
                     Please upload documents related to this topic.",
                    query
                ),
                confidence: 0.1,
                sources_used: Vec::new(),
                is_complete: false,
                missing_information: Some(vec![format!("Information about: {}", query)]),
                enrichment_suggestions: Some(vec![EnrichmentSuggestion {
                    missing_topic: query.to_string(),
                    suggested_action: format!(
                        "Upload documents containing information about {}",
                        query
                    ),
                    priority: Priority::High,
                }]),
                reasoning: "No relevant documents found in the knowledge base.".to_string(),
            };
        }

        let mut sources: Vec<String> = Vec::new();
        for chunk in request.context {
            if !sources.contains(&chunk.source_label) {
                sources.push(chunk.source_label.clone());
            }
        }

        let mean_relevance = request
            .context
            .iter()
            .map(|c| f64::from(c.relevance_score))
            .sum::<f64>()
            / request.context.len() as f64;

        let confidence = mean_relevance.min(CONFIDENCE_CAP);
        let is_complete = confidence > COMPLETE_THRESHOLD;

        let excerpt = excerpt(&format_context(request.context));
        let answer = if confidence > HEDGE_THRESHOLD {
            format!("Based on the available documents:\n\n{}", excerpt)
        } else {
            format!(
                "I found some information, but it may not be highly relevant to: '{}'\n\n{}",
                query, excerpt
            )
        };

        let (missing_information, enrichment_suggestions) = if is_complete {
            (None, None)
        } else {
            (
                Some(vec!["More comprehensive information on this topic".to_string()]),
                Some(vec![EnrichmentSuggestion {
                    missing_topic: query.to_string(),
                    suggested_action: "Upload more detailed documents about this specific topic"
                        .to_string(),
                    priority: Priority::Medium,
                }]),
            )
        };

        RawAnswer {
            answer,
            confidence,
            sources_used: sources,
            is_complete,
            missing_information,
            enrichment_suggestions,
            reasoning: format!(
                "Rule-based response (relevance: {:.2}). Configure an LLM provider for better results.",
                mean_relevance
            ),
        }
    }
}

/// 문자 단위 잘라내기
fn excerpt(context: &str) -> String {
    let mut chars = context.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...\n\n(More information available in source documents)", head)
    } else {
        head
    }
}
