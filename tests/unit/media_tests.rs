use hive_relay::tools::media::{
    looks_scanned, media_type_for, ImageAnalyzerTool, PdfExtractorTool,
};
use hive_relay::tools::Tool;
use serde_json::json;

// ── Helpers ──────────────────────────────────────────────────────

#[test]
fn media_types_cover_supported_extensions() {
    assert_eq!(media_type_for("jpg"), Some("image/jpeg"));
    assert_eq!(media_type_for("JPEG"), Some("image/jpeg"));
    assert_eq!(media_type_for("png"), Some("image/png"));
    assert_eq!(media_type_for("webp"), Some("image/webp"));
    assert_eq!(media_type_for("tif"), Some("image/tiff"));
    assert_eq!(media_type_for("svg"), None);
    assert_eq!(media_type_for("pdf"), None);
}

#[test]
fn scanned_heuristic_is_ten_words_per_page() {
    assert!(looks_scanned(0, 1));
    assert!(looks_scanned(9, 1));
    assert!(!looks_scanned(10, 1));
    assert!(looks_scanned(29, 3));
    assert!(!looks_scanned(30, 3));
    // Zero extracted pages never divides by zero.
    assert!(looks_scanned(5, 0));
}

// ── analyze_image input validation ───────────────────────────────

#[tokio::test]
async fn analyze_image_rejects_missing_file() {
    let tool = ImageAnalyzerTool::new();
    let output = tool
        .execute(json!({"image_path": "/nonexistent/photo.png"}))
        .await;
    assert!(!output.success);
    assert!(output.output.contains("not found"));
}

#[tokio::test]
async fn analyze_image_rejects_unsupported_format() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("notes.txt");
    tokio::fs::write(&path, b"plain text").await.expect("write");

    let tool = ImageAnalyzerTool::new();
    let output = tool
        .execute(json!({"image_path": path.to_string_lossy()}))
        .await;
    assert!(!output.success);
    assert!(output.output.contains("Unsupported image format"));
}

#[tokio::test]
async fn analyze_image_requires_api_key_for_valid_input() {
    // A well-formed image path reaches the credential gate before any
    // network call when no key is configured.
    if std::env::var("ANTHROPIC_API_KEY").is_ok() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("shot.png");
    tokio::fs::write(&path, b"not really a png").await.expect("write");

    let tool = ImageAnalyzerTool::new();
    let output = tool
        .execute(json!({"image_path": path.to_string_lossy()}))
        .await;
    assert!(!output.success);
    assert!(output.output.contains("ANTHROPIC_API_KEY"));
}

// ── extract_pdf_text input validation ────────────────────────────

#[tokio::test]
async fn extract_pdf_rejects_missing_file() {
    let tool = PdfExtractorTool::new();
    let output = tool
        .execute(json!({"pdf_path": "/nonexistent/report.pdf"}))
        .await;
    assert!(!output.success);
    assert!(output.output.contains("not found"));
}

#[tokio::test]
async fn extract_pdf_rejects_non_pdf_extension() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("report.docx");
    tokio::fs::write(&path, b"not a pdf").await.expect("write");

    let tool = PdfExtractorTool::new();
    let output = tool
        .execute(json!({"pdf_path": path.to_string_lossy()}))
        .await;
    assert!(!output.success);
    assert!(output.output.contains("Not a PDF file"));
}

#[tokio::test]
async fn extract_pdf_reports_unreadable_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.pdf");
    tokio::fs::write(&path, b"%PDF-1.4 garbage").await.expect("write");

    let tool = PdfExtractorTool::new();
    let output = tool
        .execute(json!({"pdf_path": path.to_string_lossy(), "ocr_fallback": false}))
        .await;
    assert!(!output.success);
    assert!(output.output.contains("Failed to read PDF"));
}
