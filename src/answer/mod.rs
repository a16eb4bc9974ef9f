//! 완전성 평가 - 프로바이더 원시 결과를 최종 답변으로 확정
//!
//! 신뢰도 구간은 하나만 사용합니다: high (> 0.7), partial ([0.4, 0.7]), low (< 0.4).
//! 프로바이더의 `is_complete`는 검증만 하고 뒤집지 않습니다. 완전하다고 답하면
//! 공백 목록을 제거하고, 불완전하다고 답하면 최소 하나의 공백을 보장합니다.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::{EnrichmentSuggestion, Generated, Priority};

/// high 구간 하한 (초과)
pub const HIGH_THRESHOLD: f64 = 0.7;
/// partial 구간 하한 (이상)
pub const PARTIAL_THRESHOLD: f64 = 0.4;

// ============================================================================
// Types
// ============================================================================

/// 신뢰도 구간
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Partial,
    Low,
}

impl ConfidenceBand {
    pub fn of(confidence: f64) -> Self {
        if confidence > HIGH_THRESHOLD {
            ConfidenceBand::High
        } else if confidence >= PARTIAL_THRESHOLD {
            ConfidenceBand::Partial
        } else {
            ConfidenceBand::Low
        }
    }

    /// 이 구간에서 기대되는 완전성
    pub fn expects_complete(self) -> bool {
        matches!(self, ConfidenceBand::High)
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConfidenceBand::High => "high",
            ConfidenceBand::Partial => "partial",
            ConfidenceBand::Low => "low",
        })
    }
}

/// 최종 답변
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerVerdict {
    pub query_id: String,
    pub answer_text: String,
    pub confidence: f64,
    /// 중복 제거, 정렬됨
    pub sources_used: BTreeSet<String>,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_information: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment_suggestions: Option<Vec<EnrichmentSuggestion>>,
    pub reasoning: String,
    /// 결과를 만든 프로바이더
    pub provider: String,
    /// confidence가 속한 구간
    pub policy_band: ConfidenceBand,
}

// ============================================================================
// Evaluator
// ============================================================================

/// 완전성 평가기 (순수 변환)
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletenessEvaluator;

impl CompletenessEvaluator {
    /// 원시 결과 확정
    pub fn finalize(&self, query: &str, generated: Generated) -> AnswerVerdict {
        let Generated { raw, provider } = generated;

        let confidence = if raw.confidence.is_nan() {
            0.0
        } else {
            raw.confidence.clamp(0.0, 1.0)
        };
        let band = ConfidenceBand::of(confidence);

        if raw.is_complete != band.expects_complete() {
            tracing::debug!(
                "Provider '{}' self-assessment (complete={}) disagrees with {} band (confidence {:.2})",
                provider,
                raw.is_complete,
                band,
                confidence
            );
        }

        let mut missing = non_empty(raw.missing_information);
        let mut suggestions = non_empty(raw.enrichment_suggestions);

        if raw.is_complete {
            missing = None;
            suggestions = None;
        } else {
            if missing.is_none() {
                missing = Some(vec![format!("More information needed to answer: {}", query)]);
            }

            if band == ConfidenceBand::Low {
                let has_actionable = suggestions.as_ref().is_some_and(|list| {
                    list.iter()
                        .any(|s| matches!(s.priority, Priority::High | Priority::Medium))
                });
                if !has_actionable {
                    suggestions.get_or_insert_with(Vec::new).push(EnrichmentSuggestion {
                        missing_topic: query.to_string(),
                        suggested_action: format!(
                            "Upload documents containing information about {}",
                            query
                        ),
                        priority: Priority::High,
                    });
                }
            }
        }

        AnswerVerdict {
            query_id: Uuid::new_v4().to_string(),
            answer_text: raw.answer,
            confidence,
            sources_used: raw.sources_used.into_iter().collect(),
            is_complete: raw.is_complete,
            missing_information: missing,
            enrichment_suggestions: suggestions,
            reasoning: raw.reasoning,
            provider,
            policy_band: band,
        }
    }
}

/// 빈 목록은 None
fn non_empty<T>(list: Option<Vec<T>>) -> Option<Vec<T>> {
    list.filter(|l| !l.is_empty())
}

// ============================================================================
// Tests
// ============================================================================
