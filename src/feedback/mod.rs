//! 피드백 모듈 - 답변 평가 기록 및 품질 분석
//!
//! 기록은 JSON 파일 하나(`feedback/feedback.json`)에 `{next_id, entries}`로
//! 저장됩니다. ID는 1부터 증가하며 삭제 후에도 재사용되지 않습니다.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KbError, KbResult};
use crate::knowledge::{read_json, write_json_atomic};

/// 낮은 평가 기준 (이하)
const LOW_RATING: u8 = 2;
/// 높은 평가 기준 (이상)
const HIGH_RATING: u8 = 4;

// ============================================================================
// Types
// ============================================================================

/// 저장된 피드백
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub feedback_id: u64,
    pub query_id: String,
    pub rating: u8,
    pub feedback_text: Option<String>,
    pub query: Option<String>,
    pub answer: Option<String>,
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// 새 피드백 입력 (검증 전)
#[derive(Debug, Clone, Default)]
pub struct NewFeedback {
    pub query_id: String,
    pub rating: i64,
    pub feedback_text: Option<String>,
    pub query: Option<String>,
    pub answer: Option<String>,
    pub confidence: Option<f64>,
}

/// 피드백 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackStats {
    pub total_feedback: usize,
    pub average_rating: f64,
    /// "1".."5" → 개수
    pub rating_distribution: BTreeMap<String, usize>,
    pub low_rated_count: usize,
    pub high_rated_count: usize,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FeedbackLog {
    next_id: u64,
    entries: Vec<FeedbackEntry>,
}

impl Default for FeedbackLog {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: Vec::new(),
        }
    }
}

// ============================================================================
// FeedbackStore
// ============================================================================

/// 피드백 저장소
pub struct FeedbackStore {
    path: PathBuf,
    log: Mutex<FeedbackLog>,
}

impl FeedbackStore {
    /// 저장소 열기 (파일이 없으면 빈 기록)
    pub fn open(path: impl Into<PathBuf>) -> KbResult<Self> {
        let path = path.into();
        let mut log: FeedbackLog = read_json(&path)?.unwrap_or_default();

        // 손으로 편집된 파일에서도 ID 재사용 방지
        let max_id = log.entries.iter().map(|e| e.feedback_id).max().unwrap_or(0);
        log.next_id = log.next_id.max(max_id + 1);

        tracing::debug!("Loaded {} feedback entries from {:?}", log.entries.len(), path);
        Ok(Self {
            path,
            log: Mutex::new(log),
        })
    }

    fn lock(&self) -> KbResult<MutexGuard<'_, FeedbackLog>> {
        self.log
            .lock()
            .map_err(|e| KbError::Storage(format!("Lock error: {}", e)))
    }

    /// 피드백 저장
    ///
    /// 평점은 1~5 정수만 허용합니다. 파일 쓰기가 실패하면 메모리 상태도 되돌립니다.
    pub fn submit(&self, input: NewFeedback) -> KbResult<FeedbackEntry> {
        let rating = validate(&input)?;
        let mut log = self.lock()?;

        let entry = FeedbackEntry {
            feedback_id: log.next_id,
            query_id: input.query_id,
            rating,
            feedback_text: input.feedback_text,
            query: input.query,
            answer: input.answer,
            confidence: input.confidence,
            timestamp: Utc::now(),
        };

        log.entries.push(entry.clone());
        log.next_id += 1;

        if let Err(e) = write_json_atomic(&self.path, &*log) {
            log.entries.pop();
            log.next_id -= 1;
            tracing::warn!("Failed to persist feedback: {}", e);
            return Err(e);
        }

        tracing::info!(
            "Stored feedback #{} (rating {}, query {})",
            entry.feedback_id,
            entry.rating,
            entry.query_id
        );
        Ok(entry)
    }

    /// 전체 기록 (저장 순서)
    pub fn all(&self) -> KbResult<Vec<FeedbackEntry>> {
        Ok(self.lock()?.entries.clone())
    }

    /// 최근 기록 (시간 내림차순, 같은 시각이면 큰 ID 먼저)
    pub fn recent(&self, limit: usize) -> KbResult<Vec<FeedbackEntry>> {
        let mut entries = self.all()?;
        entries.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.feedback_id.cmp(&a.feedback_id))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    /// query_id로 첫 기록 조회
    pub fn by_query_id(&self, query_id: &str) -> KbResult<Option<FeedbackEntry>> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .find(|e| e.query_id == query_id)
            .cloned())
    }

    /// 기록 삭제 (ID는 재사용되지 않음)
    pub fn delete(&self, feedback_id: u64) -> KbResult<bool> {
        let mut log = self.lock()?;
        let Some(pos) = log.entries.iter().position(|e| e.feedback_id == feedback_id) else {
            return Ok(false);
        };

        let removed = log.entries.remove(pos);
        if let Err(e) = write_json_atomic(&self.path, &*log) {
            log.entries.insert(pos, removed);
            return Err(e);
        }

        tracing::info!("Deleted feedback #{}", feedback_id);
        Ok(true)
    }

    /// 전체 기록을 CSV로 내보내기, 내보낸 개수 반환
    ///
    /// 임시 파일에 쓴 뒤 교체하므로 실패해도 기존 파일은 그대로입니다.
    /// 기록이 없으면 빈 파일이 됩니다.
    pub fn export_csv(&self, path: &Path) -> KbResult<usize> {
        let entries = self.all()?;
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|e| KbError::Storage(format!("failed to create {}: {}", dir.display(), e)))?;

        let storage = |e: String| KbError::Storage(format!("failed to export {}: {}", path.display(), e));

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| storage(e.to_string()))?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            for entry in &entries {
                writer.serialize(entry).map_err(|e| storage(e.to_string()))?;
            }
            writer.flush().map_err(|e| storage(e.to_string()))?;
        }
        tmp.as_file_mut().flush().map_err(|e| storage(e.to_string()))?;
        tmp.persist(path).map_err(|e| storage(e.error.to_string()))?;

        tracing::info!("Exported {} feedback entries to {:?}", entries.len(), path);
        Ok(entries.len())
    }

    /// 통계
    pub fn stats(&self) -> KbResult<FeedbackStats> {
        Ok(aggregate(&self.lock()?.entries))
    }
}

fn validate(input: &NewFeedback) -> KbResult<u8> {
    if input.query_id.trim().is_empty() {
        return Err(KbError::Validation("query_id must not be empty".into()));
    }
    if !(1..=5).contains(&input.rating) {
        return Err(KbError::Validation(format!(
            "Rating must be an integer between 1 and 5, got: {}",
            input.rating
        )));
    }
    if let Some(c) = input.confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(KbError::Validation(format!(
                "confidence must be between 0 and 1, got: {}",
                c
            )));
        }
    }
    Ok(input.rating as u8)
}

// ============================================================================
// Aggregator
// ============================================================================

/// 피드백 기록에서 통계와 개선 제안 도출
pub fn aggregate(entries: &[FeedbackEntry]) -> FeedbackStats {
    let mut distribution: BTreeMap<String, usize> =
        (1..=5).map(|r| (r.to_string(), 0)).collect();

    if entries.is_empty() {
        return FeedbackStats {
            total_feedback: 0,
            average_rating: 0.0,
            rating_distribution: distribution,
            low_rated_count: 0,
            high_rated_count: 0,
            suggestions: Vec::new(),
        };
    }

    for entry in entries {
        *distribution.entry(entry.rating.to_string()).or_insert(0) += 1;
    }

    let mean = entries.iter().map(|e| f64::from(e.rating)).sum::<f64>() / entries.len() as f64;
    let low_rated: Vec<&FeedbackEntry> = entries.iter().filter(|e| e.rating <= LOW_RATING).collect();

    FeedbackStats {
        total_feedback: entries.len(),
        average_rating: (mean * 100.0).round() / 100.0,
        rating_distribution: distribution,
        low_rated_count: low_rated.len(),
        high_rated_count: entries.iter().filter(|e| e.rating >= HIGH_RATING).count(),
        suggestions: suggestions(&low_rated),
    }
}

fn suggestions(low_rated: &[&FeedbackEntry]) -> Vec<String> {
    let mut out = Vec::new();

    let confidences: Vec<f64> = low_rated.iter().filter_map(|e| e.confidence).collect();
    if !confidences.is_empty() {
        let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
        if mean < 0.4 {
            out.push(
                "Low confidence detected in poor answers - upload more relevant documents".to_string(),
            );
        } else if mean > 0.7 {
            out.push(
                "High confidence but low ratings - consider improving LLM prompts or using a better model"
                    .to_string(),
            );
        }
    }

    if low_rated.len() > 3 {
        out.push(format!(
            "Multiple low-rated answers ({}) - review knowledge base coverage",
            low_rated.len()
        ));
    }

    let topics = common_topics(low_rated);
    if !topics.is_empty() {
        out.push(format!(
            "Common topics in low-rated queries: {} - consider adding documents on these topics",
            topics.join(", ")
        ));
    }

    if out.is_empty() {
        out.push("System is performing well - keep the knowledge base updated".to_string());
    }
    out
}

/// 낮은 평가 질의에서 반복되는 단어 (상위 3개 중 2회 이상, 4자 이상)
fn common_topics(low_rated: &[&FeedbackEntry]) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for query in low_rated.iter().filter_map(|e| e.query.as_deref()) {
        for word in query.to_lowercase().split_whitespace() {
            match counts.iter_mut().find(|(w, _)| w == word) {
                Some((_, n)) => *n += 1,
                None => counts.push((word.to_string(), 1)),
            }
        }
    }

    // 안정 정렬: 같은 빈도는 처음 나온 순서 유지
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(3)
        .filter(|(word, n)| *n > 1 && word.chars().count() > 3)
        .map(|(word, _)| word)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_feedback(rating: i64) -> NewFeedback {
        NewFeedback {
            query_id: "q-1".into(),
            rating,
            ..Default::default()
        }
    }

    fn entry(id: u64, rating: u8, query: Option<&str>, confidence: Option<f64>) -> FeedbackEntry {
        FeedbackEntry {
            feedback_id: id,
            query_id: format!("q-{}", id),
            rating,
            feedback_text: None,
            query: query.map(String::from),
            answer: None,
            confidence,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_rating_bounds() {
        let dir = TempDir::new().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.json")).unwrap();

        assert!(matches!(store.submit(new_feedback(0)), Err(KbError::Validation(_))));
        assert!(matches!(store.submit(new_feedback(6)), Err(KbError::Validation(_))));

        let mut last = 0;
        for rating in 1..=5 {
            let entry = store.submit(new_feedback(rating)).unwrap();
            assert!(entry.feedback_id > last);
            last = entry.feedback_id;
        }
        assert_eq!(store.all().unwrap().len(), 5);
    }

    #[test]
    fn test_ids_not_reused_after_delete_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feedback.json");
        {
            let store = FeedbackStore::open(&path).unwrap();
            store.submit(new_feedback(3)).unwrap();
            let second = store.submit(new_feedback(4)).unwrap();
            assert!(store.delete(second.feedback_id).unwrap());
            assert!(!store.delete(second.feedback_id).unwrap());
        }

        let store = FeedbackStore::open(&path).unwrap();
        let third = store.submit(new_feedback(5)).unwrap();
        assert_eq!(third.feedback_id, 3);
    }

    #[test]
    fn test_unknown_query_id_accepted_and_recent_first() {
        let dir = TempDir::new().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.json")).unwrap();
        store.submit(new_feedback(2)).unwrap();

        let entry = store
            .submit(NewFeedback {
                query_id: "never-issued".into(),
                rating: 4,
                ..Default::default()
            })
            .unwrap();

        let recent = store.recent(1).unwrap();
        assert_eq!(recent, vec![entry]);
        assert!(store.by_query_id("never-issued").unwrap().is_some());
        assert!(store.by_query_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_invalid_confidence_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.json")).unwrap();
        let result = store.submit(NewFeedback {
            confidence: Some(1.5),
            ..new_feedback(3)
        });
        assert!(matches!(result, Err(KbError::Validation(_))));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let dir = TempDir::new().unwrap();
        // 파일이 있어야 할 자리에 디렉토리를 두어 rename 실패 유도
        let path = dir.path().join("feedback.json");
        std::fs::create_dir_all(path.join("blocker")).unwrap();
        let store = FeedbackStore::open(dir.path().join("missing.json")).unwrap();
        let store = FeedbackStore { path, ..store };

        assert!(matches!(store.submit(new_feedback(3)), Err(KbError::Storage(_))));
        assert!(store.all().unwrap().is_empty());
        assert_eq!(store.lock().unwrap().next_id, 1);
    }

    #[test]
    fn test_export_csv_reads_back() {
        let dir = TempDir::new().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.json")).unwrap();
        store.submit(new_feedback(2)).unwrap();
        store
            .submit(NewFeedback {
                feedback_text: Some("Missing the \"2024\" policy, and\nthe parking rules".into()),
                query: Some("parking, permits".into()),
                confidence: Some(0.35),
                ..new_feedback(4)
            })
            .unwrap();

        let out = dir.path().join("exports").join("feedback.csv");
        assert_eq!(store.export_csv(&out).unwrap(), 2);

        let mut reader = csv::Reader::from_path(&out).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "feedback_id");
        assert_eq!(&headers[2], "rating");

        let exported: Vec<FeedbackEntry> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(exported, store.all().unwrap());
        assert_eq!(exported[0].feedback_text, None);
    }

    #[test]
    fn test_export_csv_empty_history() {
        let dir = TempDir::new().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.json")).unwrap();
        let out = dir.path().join("feedback.csv");
        assert_eq!(store.export_csv(&out).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "");
    }

    #[test]
    fn test_aggregate_empty() {
        let stats = aggregate(&[]);
        assert_eq!(stats.total_feedback, 0);
        assert_eq!(stats.average_rating, 0.0);
        assert_eq!(stats.rating_distribution.len(), 5);
        assert!(stats.suggestions.is_empty());
    }

    #[test]
    fn test_aggregate_counts() {
        let entries = vec![
            entry(1, 5, None, None),
            entry(2, 4, None, None),
            entry(3, 1, None, None),
        ];
        let stats = aggregate(&entries);
        assert_eq!(stats.total_feedback, 3);
        assert_eq!(stats.average_rating, 3.33);
        assert_eq!(stats.rating_distribution["5"], 1);
        assert_eq!(stats.rating_distribution["3"], 0);
        assert_eq!(stats.low_rated_count, 1);
        assert_eq!(stats.high_rated_count, 2);
    }

    #[test]
    fn test_performing_well() {
        let stats = aggregate(&[entry(1, 5, None, None)]);
        assert_eq!(
            stats.suggestions,
            vec!["System is performing well - keep the knowledge base updated".to_string()]
        );
    }

    #[test]
    fn test_low_confidence_and_volume_suggestions() {
        let entries: Vec<FeedbackEntry> = (1..=4)
            .map(|i| entry(i, 1, Some("tax"), Some(0.2)))
            .collect();
        let stats = aggregate(&entries);
        assert!(stats.suggestions[0].starts_with("Low confidence detected"));
        assert!(stats.suggestions[1].contains("(4)"));
    }

    #[test]
    fn test_high_confidence_low_rating() {
        let stats = aggregate(&[entry(1, 2, None, Some(0.9))]);
        assert!(stats.suggestions[0].starts_with("High confidence but low ratings"));
    }

    #[test]
    fn test_common_topics() {
        let entries = vec![
            entry(1, 1, Some("Vacation policy details"), None),
            entry(2, 2, Some("vacation policy for the team"), None),
            entry(3, 5, Some("vacation vacation"), None),
        ];
        let stats = aggregate(&entries);
        assert_eq!(
            stats.suggestions,
            vec!["Common topics in low-rated queries: vacation, policy - consider adding documents on these topics"
                .to_string()]
        );
    }
}
