//! Text Chunking Module
//!
//! 계층적 구분자 전략으로 텍스트를 겹치는 청크로 분할합니다.
//! 문단 → 줄 → 문장 → 공백 → 문자 단위 순서로, 최대 크기를 만족하는
//! 가장 굵은 구분자를 우선 사용합니다.

use std::collections::VecDeque;

use crate::error::{KbError, KbResult};

/// 구분자 우선순위 (빈 문자열 = 문자 단위 강제 분할)
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (크기는 문자 수 기준)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 인접 청크 간 오버랩 크기 (문자 수)
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 800,
            overlap_characters: 200,
        }
    }
}

impl ChunkConfig {
    /// 설정 생성
    pub fn new(max_characters: usize, overlap_characters: usize) -> Self {
        Self {
            max_characters,
            overlap_characters,
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> KbResult<()> {
        if self.max_characters == 0 {
            return Err(KbError::Config("chunk size must be greater than 0".into()));
        }
        if self.overlap_characters >= self.max_characters {
            return Err(KbError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap_characters, self.max_characters
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할 (빈 텍스트면 빈 벡터)
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 로더 출력 분할
    ///
    /// 텍스트가 전혀 없으면 ContentError를 반환합니다.
    fn split(&self, text: &str) -> KbResult<Vec<String>> {
        if text.trim().is_empty() {
            return Err(KbError::Content("no text to chunk".into()));
        }
        let chunks = self.chunk(text);
        if chunks.is_empty() {
            return Err(KbError::Content("chunker produced no chunks".into()));
        }
        Ok(chunks)
    }
}

// ============================================================================
// RecursiveChunker
// ============================================================================

/// 계층적 구분자 청커
///
/// 구분자는 앞 세그먼트 끝에 붙은 채로 유지되므로 세그먼트를 이어 붙이면
/// 원문이 복원됩니다. 병합 시 이전 청크의 끝 세그먼트들을 오버랩 크기
/// 이내에서 다음 청크 앞에 다시 넣습니다.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    config: ChunkConfig,
}

impl RecursiveChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 재귀 분할
    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // 텍스트에 존재하는 가장 굵은 구분자 선택
        let mut separator = "";
        let mut remaining: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() || text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let max = self.config.max_characters;
        let mut chunks = Vec::new();
        let mut good: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) <= max {
                good.push(piece);
                continue;
            }

            if !good.is_empty() {
                chunks.extend(self.merge_pieces(&good));
                good.clear();
            }

            if remaining.is_empty() {
                // 더 쪼갤 수 없는 원자 단위
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !good.is_empty() {
            chunks.extend(self.merge_pieces(&good));
        }

        chunks
    }

    /// 작은 세그먼트들을 최대 크기 이내로 병합 (오버랩 적용)
    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let max = self.config.max_characters;
        let overlap = self.config.overlap_characters;

        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > max && !window.is_empty() {
                push_trimmed(&mut chunks, &window);

                // 오버랩 크기 이하가 될 때까지, 그리고 새 세그먼트가 들어갈 때까지 앞에서 제거
                while total > overlap || (total + len > max && total > 0) {
                    match window.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        if !window.is_empty() {
            push_trimmed(&mut chunks, &window);
        }

        chunks
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let mut chunks = self.split_recursive(text, &SEPARATORS);
        chunks.retain(|c| !c.is_empty());
        chunks
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자 수 (UTF-8 바이트가 아닌 유니코드 스칼라 기준)
#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 구분자를 앞 세그먼트 끝에 붙인 채로 분할
///
/// 빈 구분자는 문자 하나씩 분할합니다.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

fn push_trimmed(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(s, _)| *s).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정을 지정한 청커 생성
pub fn recursive_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(RecursiveChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================
