//! 문서 로더
//!
//! 업로드된 바이트와 파일명에서 페이지 단위 텍스트를 추출합니다.
//! - 텍스트/마크다운: UTF-8로 읽기 (페이지 힌트 없음)
//! - PDF: pdf-extract로 페이지별 추출 (1부터 시작하는 페이지 힌트)
//!
//! 지원하지 않는 형식이나 텍스트가 없는 문서는 ContentError입니다.

pub mod pdf;

use std::path::Path;

use crate::collector::FileType;
use crate::error::{KbError, KbResult};

/// 추출된 페이지
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPage {
    /// 페이지 텍스트
    pub text: String,
    /// 페이지 번호 (페이지 개념이 없는 형식은 None)
    pub page_hint: Option<usize>,
}

/// 바이트에서 페이지 추출
pub fn load(bytes: &[u8], filename: &str) -> KbResult<Vec<LoadedPage>> {
    let file_type = FileType::from_path(Path::new(filename)).ok_or_else(|| {
        KbError::Content(format!(
            "Unsupported file type: '{}'. Supported: .txt, .md, .pdf",
            filename
        ))
    })?;

    let pages = match file_type {
        FileType::Text | FileType::Markdown => {
            let text = std::str::from_utf8(bytes).map_err(|e| {
                KbError::Content(format!("'{}' is not valid UTF-8: {}", filename, e))
            })?;
            // BOM 제거
            let text = text.trim_start_matches('\u{feff}');
            vec![LoadedPage {
                text: text.to_string(),
                page_hint: None,
            }]
        }
        FileType::Pdf => pdf::extract_pages(bytes)?
            .into_iter()
            .map(|(page, text)| LoadedPage {
                text,
                page_hint: Some(page),
            })
            .collect(),
    };

    let pages: Vec<LoadedPage> = pages
        .into_iter()
        .filter(|p| !p.text.trim().is_empty())
        .collect();

    if pages.is_empty() {
        return Err(KbError::Content(format!("No text content in '{}'", filename)));
    }

    tracing::debug!("Loaded {} page(s) from {}", pages.len(), filename);
    Ok(pages)
}

// ============================================================================
// Tests
// ============================================================================
