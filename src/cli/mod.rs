//! CLI 모듈
//!
//! docgap-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::answer::AnswerVerdict;
use crate::collector::{CollectedFile, CollectionStats, FileCollector, FileType};
use crate::config::AppConfig;
use crate::feedback::{FeedbackEntry, NewFeedback};
use crate::service::{KnowledgeService, DEFAULT_TOP_K};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docgap-rag")]
#[command(version, about = "답변 완결성을 판정하는 문서 RAG", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일 또는 폴더를 지식베이스에 업로드 (.txt, .md, .pdf)
    Upload {
        /// 업로드할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 업로드할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// 질문하기
    Ask {
        /// 질문
        query: String,

        /// 검색할 청크 수 (1-20)
        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 답변 평가 남기기
    Feedback {
        /// 답변의 query_id
        query_id: String,

        /// 평점 (1-5)
        #[arg(allow_hyphen_values = true)]
        rating: i64,

        /// 코멘트
        #[arg(short, long)]
        text: Option<String>,

        /// 원래 질문
        #[arg(long)]
        query: Option<String>,

        /// 받은 답변
        #[arg(long)]
        answer: Option<String>,

        /// 답변 신뢰도
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// 최근 피드백
    FeedbackRecent {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// 피드백 통계 및 개선 제안
    FeedbackStats {
        #[arg(long)]
        json: bool,
    },

    /// 피드백 삭제
    FeedbackDelete {
        /// 피드백 ID
        id: u64,
    },

    /// 답변(query_id)에 남긴 피드백 조회
    FeedbackShow {
        /// 답변의 query_id
        query_id: String,
    },

    /// 피드백 전체를 CSV로 내보내기
    FeedbackExport {
        /// 출력 경로 (기본: <데이터 디렉토리>/feedback/feedback_export.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 업로드된 문서 목록
    List,

    /// 문서 상세 정보
    Show {
        /// 문서 ID
        document_id: String,
    },

    /// 문서 삭제 (청크, 메타데이터, 원본 파일)
    Delete {
        /// 문서 ID
        document_id: String,
    },

    /// 상태 확인
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// 현재 임베딩 전략으로 전체 재임베딩
    Reindex,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_env().context("설정 로드 실패")?;
    let service = KnowledgeService::open(&config).context("지식 서비스 초기화 실패")?;

    match cli.command {
        Commands::Upload { file, dir } => cmd_upload(&service, file, dir).await,
        Commands::Ask { query, top_k, json } => cmd_ask(&service, &query, top_k, json).await,
        Commands::Feedback {
            query_id,
            rating,
            text,
            query,
            answer,
            confidence,
        } => cmd_feedback(
            &service,
            NewFeedback {
                query_id,
                rating,
                feedback_text: text,
                query,
                answer,
                confidence,
            },
        ),
        Commands::FeedbackRecent { limit } => cmd_feedback_recent(&service, limit),
        Commands::FeedbackStats { json } => cmd_feedback_stats(&service, json),
        Commands::FeedbackDelete { id } => cmd_feedback_delete(&service, id),
        Commands::FeedbackShow { query_id } => cmd_feedback_show(&service, &query_id),
        Commands::FeedbackExport { output } => {
            let path = output.unwrap_or_else(|| config.feedback_export_path());
            cmd_feedback_export(&service, &path)
        }
        Commands::List => cmd_list(&service),
        Commands::Show { document_id } => cmd_show(&service, &document_id),
        Commands::Delete { document_id } => cmd_delete(&service, &document_id).await,
        Commands::Stats { json } => cmd_stats(&service, &config, json).await,
        Commands::Reindex => cmd_reindex(&service).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 업로드 명령어 (upload)
async fn cmd_upload(service: &KnowledgeService, file: Option<PathBuf>, dir: Option<PathBuf>) -> Result<()> {
    if let Some(path) = file {
        let report = upload_one(service, &path).await?;
        println!("[OK] 문서가 추가되었습니다 (ID: {})", report.document_id);
        println!("     {} → {} 청크", report.filename, report.chunk_count);
        return Ok(());
    }

    let Some(dir) = dir else {
        bail!("--file 또는 --dir를 지정해야 합니다");
    };

    let files = FileCollector::with_defaults().collect_directory(&dir)?;
    if files.is_empty() {
        println!("[!] 업로드할 파일이 없습니다.");
        return Ok(());
    }

    let stats = CollectionStats::from_files(&files);
    println!("[*] 업로드 대상: {} 파일", stats.total_files);
    println!(
        "    텍스트: {}, 마크다운: {}, PDF: {}",
        stats.text_files, stats.markdown_files, stats.pdf_files
    );
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    let mut success_count = 0;
    let mut error_count = 0;

    for (i, collected) in files.iter().enumerate() {
        print!(
            "[{}/{}] [{}] {}... ",
            i + 1,
            files.len(),
            type_label(collected),
            collected.filename()
        );

        match upload_one(service, &collected.path).await {
            Ok(report) => {
                println!("완료 ({} 청크)", report.chunk_count);
                success_count += 1;
            }
            Err(e) => {
                println!("실패: {:#}", e);
                error_count += 1;
            }
        }
    }

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", success_count, error_count);
    Ok(())
}

async fn upload_one(service: &KnowledgeService, path: &Path) -> Result<crate::service::IngestReport> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("파일 읽기 실패: {:?}", path))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("파일명이 없습니다: {:?}", path))?;

    service
        .ingest(&bytes, &filename)
        .await
        .with_context(|| format!("업로드 실패: {}", filename))
}

fn type_label(file: &CollectedFile) -> &'static str {
    match file.file_type {
        FileType::Text => "TXT",
        FileType::Markdown => "MD",
        FileType::Pdf => "PDF",
    }
}

/// 질문 명령어 (ask)
async fn cmd_ask(service: &KnowledgeService, query: &str, top_k: usize, json: bool) -> Result<()> {
    let verdict = service.ask(query, top_k).await.context("질문 처리 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&verdict);
    }
    Ok(())
}

fn print_verdict(verdict: &AnswerVerdict) {
    let status = if verdict.is_complete { "[OK]" } else { "[!]" };
    println!(
        "{} 신뢰도 {:.2} ({}) | 완결: {} | {}",
        status,
        verdict.confidence,
        verdict.policy_band,
        if verdict.is_complete { "예" } else { "아니오" },
        verdict.provider
    );
    println!();
    println!("{}", verdict.answer_text);
    println!();

    if !verdict.sources_used.is_empty() {
        let sources: Vec<&str> = verdict.sources_used.iter().map(String::as_str).collect();
        println!("출처: {}", sources.join(", "));
    }

    if let Some(missing) = &verdict.missing_information {
        println!("부족한 정보:");
        for item in missing {
            println!("  - {}", item);
        }
    }

    if let Some(suggestions) = &verdict.enrichment_suggestions {
        println!("보강 제안:");
        for s in suggestions {
            println!("  [{}] {}: {}", s.priority, s.missing_topic, s.suggested_action);
        }
    }

    println!("근거: {}", verdict.reasoning);
    println!("query_id: {}", verdict.query_id);
}

/// 피드백 명령어 (feedback)
fn cmd_feedback(service: &KnowledgeService, input: NewFeedback) -> Result<()> {
    let entry = service.submit_feedback(input).context("피드백 저장 실패")?;
    println!("[OK] 피드백 #{} 저장됨 (평점 {})", entry.feedback_id, entry.rating);
    Ok(())
}

fn cmd_feedback_recent(service: &KnowledgeService, limit: usize) -> Result<()> {
    let entries = service.recent_feedback(limit).context("피드백 조회 실패")?;
    if entries.is_empty() {
        println!("[!] 피드백이 없습니다.");
        return Ok(());
    }

    println!("[OK] 최근 피드백 ({} 건):\n", entries.len());
    for entry in &entries {
        print_feedback(entry);
    }
    Ok(())
}

fn print_feedback(entry: &FeedbackEntry) {
    println!(
        "  #{:<4} 평점 {} | {} | {}",
        entry.feedback_id,
        entry.rating,
        entry.timestamp.format("%Y-%m-%d %H:%M"),
        entry.query_id
    );
    if let Some(query) = &entry.query {
        println!("        질문: {}", truncate_text(query, 60));
    }
    if let Some(text) = &entry.feedback_text {
        println!("        코멘트: {}", truncate_text(text, 60));
    }
}

fn cmd_feedback_stats(service: &KnowledgeService, json: bool) -> Result<()> {
    let stats = service.feedback_stats().context("피드백 통계 조회 실패")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("[OK] 피드백 {} 건, 평균 평점 {:.2}", stats.total_feedback, stats.average_rating);
    let histogram: Vec<String> = stats
        .rating_distribution
        .iter()
        .map(|(rating, count)| format!("{}점: {}", rating, count))
        .collect();
    println!("     {}", histogram.join(", "));
    println!(
        "     낮은 평가: {}, 높은 평가: {}",
        stats.low_rated_count, stats.high_rated_count
    );

    if !stats.suggestions.is_empty() {
        println!();
        println!("개선 제안:");
        for s in &stats.suggestions {
            println!("  - {}", s);
        }
    }
    Ok(())
}

fn cmd_feedback_delete(service: &KnowledgeService, id: u64) -> Result<()> {
    if service.delete_feedback(id).context("피드백 삭제 실패")? {
        println!("[OK] 피드백 #{} 삭제됨", id);
    } else {
        println!("[!] 피드백 #{}을 찾을 수 없습니다", id);
    }
    Ok(())
}

fn cmd_feedback_show(service: &KnowledgeService, query_id: &str) -> Result<()> {
    match service.feedback_for_query(query_id).context("피드백 조회 실패")? {
        Some(entry) => {
            println!("[OK] {}에 대한 피드백:\n", query_id);
            print_feedback(&entry);
            if let Some(confidence) = entry.confidence {
                println!("        신뢰도: {:.2}", confidence);
            }
        }
        None => println!("[!] {}에 대한 피드백이 없습니다", query_id),
    }
    Ok(())
}

fn cmd_feedback_export(service: &KnowledgeService, path: &Path) -> Result<()> {
    let count = service
        .export_feedback(path)
        .with_context(|| format!("피드백 내보내기 실패: {:?}", path))?;
    println!("[OK] 피드백 {} 건을 내보냈습니다: {}", count, path.display());
    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(service: &KnowledgeService) -> Result<()> {
    let docs = service.list_documents().context("문서 목록 조회 실패")?;
    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());
    for doc in docs {
        println!("  {} {}", doc.document_id, truncate_text(&doc.filename, 40));
        println!(
            "        {} | {} 청크 | {}",
            doc.upload_date.format("%Y-%m-%d %H:%M"),
            doc.num_chunks,
            format_bytes(doc.file_size as usize)
        );
        println!();
    }
    Ok(())
}

/// 상세 명령어 (show)
fn cmd_show(service: &KnowledgeService, document_id: &str) -> Result<()> {
    let Some(doc) = service.get_document(document_id).context("문서 조회 실패")? else {
        println!("[!] 문서 {}을 찾을 수 없습니다", document_id);
        return Ok(());
    };

    println!("[OK] {}", doc.filename);
    println!("     ID: {}", doc.document_id);
    println!("     업로드: {}", doc.upload_date.format("%Y-%m-%d %H:%M:%S"));
    println!("     청크: {}", doc.num_chunks);
    println!("     크기: {}", format_bytes(doc.file_size as usize));
    println!("     원본: {}", doc.file_path.display());
    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(service: &KnowledgeService, document_id: &str) -> Result<()> {
    if service
        .delete_document(document_id)
        .await
        .context("문서 삭제 실패")?
    {
        println!("[OK] 문서 {} 삭제됨", document_id);
    } else {
        println!("[!] 문서 {}을 찾을 수 없습니다", document_id);
    }
    Ok(())
}

/// 상태 명령어 (stats)
async fn cmd_stats(service: &KnowledgeService, config: &AppConfig, json: bool) -> Result<()> {
    let stats = service.stats().await.context("통계 조회 실패")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("docgap-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[OK] 문서: {} 건 ({} 청크, {})",
        stats.documents.document_count,
        stats.documents.total_chunks,
        format_bytes(stats.documents.total_bytes as usize)
    );

    match stats.index_dimension {
        Some(dim) => println!("[OK] 벡터 인덱스: {} 청크 ({}차원)", stats.indexed_chunks, dim),
        None => println!("[OK] 벡터 인덱스: 비어 있음"),
    }
    println!("[*] 임베딩: {}", stats.embedder_id);
    if let Some(dim) = stats.index_dimension {
        if !stats.embedder_id.ends_with(&format!(":d{}", dim)) {
            println!("[!] 인덱스 차원이 현재 임베딩과 다릅니다. `reindex`를 실행하세요.");
        }
    }

    println!(
        "[*] 답변 프로바이더: {} ({})",
        stats.provider.provider_name,
        if stats.provider.is_available { "사용 가능" } else { "사용 불가" }
    );
    println!("    체인: {}", stats.provider.chain.join(" → "));
    println!(
        "[*] 피드백: {} 건, 평균 평점 {:.2}",
        stats.feedback.total_feedback, stats.feedback.average_rating
    );
    Ok(())
}

/// 재임베딩 명령어 (reindex)
async fn cmd_reindex(service: &KnowledgeService) -> Result<()> {
    println!("[*] {}로 전체 재임베딩 중...", service.embedder_id());
    let count = service.reembed_all().await.context("재임베딩 실패")?;
    println!("[OK] {} 청크 재임베딩 완료 ({})", count, service.embedder_id());
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask_defaults() {
        let cli = Cli::try_parse_from(["docgap-rag", "ask", "what is the leave policy?"]).unwrap();
        match cli.command {
            Commands::Ask { query, top_k, json } => {
                assert_eq!(query, "what is the leave policy?");
                assert_eq!(top_k, DEFAULT_TOP_K);
                assert!(!json);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_parse_feedback_out_of_range_reaches_validation() {
        let cli = Cli::try_parse_from(["docgap-rag", "feedback", "q-1", "0"]).unwrap();
        assert!(matches!(cli.command, Commands::Feedback { rating: 0, .. }));

        let cli = Cli::try_parse_from(["docgap-rag", "feedback", "q-1", "-1"]).unwrap();
        assert!(matches!(cli.command, Commands::Feedback { rating: -1, .. }));
    }

    #[test]
    fn test_parse_subcommand_names() {
        assert!(Cli::try_parse_from(["docgap-rag", "feedback-recent", "--limit", "3"]).is_ok());
        assert!(Cli::try_parse_from(["docgap-rag", "feedback-delete", "4"]).is_ok());
        assert!(Cli::try_parse_from(["docgap-rag", "reindex"]).is_ok());
        assert!(Cli::try_parse_from(["docgap-rag", "feedback-show", "q-1"]).is_ok());
        assert!(Cli::try_parse_from(["docgap-rag", "show", "doc-1"]).is_ok());
    }

    #[test]
    fn test_parse_feedback_export_output() {
        let cli = Cli::try_parse_from(["docgap-rag", "feedback-export"]).unwrap();
        assert!(matches!(cli.command, Commands::FeedbackExport { output: None }));

        let cli =
            Cli::try_parse_from(["docgap-rag", "feedback-export", "-o", "out.csv"]).unwrap();
        match cli.command {
            Commands::FeedbackExport { output } => assert_eq!(output, Some(PathBuf::from("out.csv"))),
            _ => panic!("expected feedback-export"),
        }
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }
}
