//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 텍스트를 추출합니다.

use crate::error::{KbError, KbResult};

/// 메모리의 PDF에서 페이지별 텍스트 추출
///
/// (페이지 번호, 텍스트) 벡터를 반환합니다. 페이지 번호는 1부터 시작하며
/// 빈 페이지는 건너뛰지만 번호는 유지합니다.
pub fn extract_pages(bytes: &[u8]) -> KbResult<Vec<(usize, String)>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| KbError::Content(format!("Failed to extract text from PDF: {}", e)))?;

    if text.trim().is_empty() {
        tracing::warn!("No text extracted from PDF. It might be a scanned document.");
        return Ok(Vec::new());
    }

    Ok(split_pdf_pages(&text)
        .into_iter()
        .enumerate()
        .map(|(i, page)| (i + 1, page))
        .filter(|(_, page)| !page.is_empty())
        .collect())
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)로 페이지 분리
    let pages: Vec<String> = text.split('\x0c').map(|s| s.trim().to_string()).collect();
    if pages.iter().filter(|p| !p.is_empty()).count() > 1 {
        return pages;
    }

    // 페이지 구분자 패턴 (예: "--- Page 1 ---")
    if let Ok(page_pattern) =
        regex::Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
    {
        let pages: Vec<String> = page_pattern
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if pages.len() > 1 {
            return pages;
        }
    }

    vec![text.trim().to_string()]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pdf_pages_with_formfeed() {
        let text = "Page 1 content\x0cPage 2 content\x0cPage 3 content";
        let pages = split_pdf_pages(text);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], "Page 1 content");
        assert_eq!(pages[1], "Page 2 content");
    }

    #[test]
    fn test_blank_page_keeps_numbering() {
        let pages = split_pdf_pages("first\x0c   \x0cthird");
        assert_eq!(pages, vec!["first", "", "third"]);
    }

    #[test]
    fn test_split_pdf_pages_with_marker() {
        let text = "intro\n--- Page 2 ---\nbody";
        assert_eq!(split_pdf_pages(text), vec!["intro", "body"]);
    }

    #[test]
    fn test_split_pdf_pages_no_separator() {
        let pages = split_pdf_pages("Just some text without page breaks");
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn test_invalid_pdf_is_content_error() {
        assert!(matches!(
            extract_pages(b"not a pdf"),
            Err(KbError::Content(_))
        ));
    }
}
