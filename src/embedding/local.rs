//! 로컬 임베딩 - 특징 해싱
//!
//! 소문자 단어 유니그램과 바이그램을 SHA-256으로 버킷에 부호와 함께 더한 뒤
//! L2 정규화합니다. 네트워크 없이 결정적으로 동작하며 같은 단어를 공유하는
//! 텍스트끼리 코사인 유사도가 높아집니다.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{EmbeddingError, EmbeddingProvider};

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 384;

/// 바이그램 가중치 (유니그램 = 1.0)
const BIGRAM_WEIGHT: f32 = 0.5;

/// 특징 해싱 임베딩
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashEmbedding {
    /// 차원 지정 생성 (0이면 1로 보정)
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// 동기 임베딩
    ///
    /// 단어가 없는 텍스트는 영벡터입니다.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);

        for token in &tokens {
            self.add_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vector, &bigram, BIGRAM_WEIGHT);
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

/// 소문자 영숫자 토큰
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "local-hash"
    }
}
