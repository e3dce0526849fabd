//! Media processing tools: image analysis via the Claude vision API and
//! PDF text extraction with an OCR fallback.
//!
//! Mounted on each session post-creation alongside the Slack tools, so
//! every conversation has permanent access to media processing.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use crate::models::message::ToolOutput;

use super::Tool;

/// Max image size to send to the vision API (20MB).
const MAX_IMAGE_SIZE: u64 = 20 * 1024 * 1024;

const VISION_API_URL: &str = "https://api.anthropic.com/v1/messages";
const VISION_API_VERSION: &str = "2023-06-01";
const VISION_MODEL: &str = "claude-3-haiku-20240307";
const VISION_MAX_TOKENS: u32 = 2048;
const VISION_TIMEOUT: Duration = Duration::from_secs(60);

/// OCR conversion budget for `pdftoppm` / `tesseract` runs.
const OCR_TIMEOUT: Duration = Duration::from_secs(120);

/// Media type for a supported image extension.
#[must_use]
pub fn media_type_for(extension: &str) -> Option<&'static str> {
    match extension.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "tiff" | "tif" => Some("image/tiff"),
        _ => None,
    }
}

/// Heuristic: under ~10 words per page the PDF is likely scanned.
#[must_use]
pub fn looks_scanned(words: usize, pages_extracted: usize) -> bool {
    words < pages_extracted.max(1) * 10
}

/// Analyze images using Claude's vision capabilities.
///
/// Sends images to the Anthropic API as base64-encoded vision requests
/// and returns detailed descriptions, categorizations, or brief summaries.
pub struct ImageAnalyzerTool {
    client: reqwest::Client,
}

impl ImageAnalyzerTool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn call_vision_api(
        &self,
        api_key: &str,
        image_data: &str,
        media_type: &str,
        prompt: &str,
    ) -> Result<String, String> {
        let body = json!({
            "model": VISION_MODEL,
            "max_tokens": VISION_MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": media_type,
                            "data": image_data,
                        },
                    },
                    {"type": "text", "text": prompt},
                ],
            }],
        });

        let response = self
            .client
            .post(VISION_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", VISION_API_VERSION)
            .timeout(VISION_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        let status = response.status();
        let text = response.text().await.map_err(|err| err.to_string())?;
        if !status.is_success() {
            return Err(format!("API error {status}: {text}"));
        }

        #[derive(Deserialize)]
        struct VisionResponse {
            #[serde(default)]
            content: Vec<VisionBlock>,
        }
        #[derive(Deserialize)]
        struct VisionBlock {
            #[serde(default)]
            text: Option<String>,
        }

        let parsed: VisionResponse =
            serde_json::from_str(&text).map_err(|err| format!("malformed response: {err}"))?;
        parsed
            .content
            .into_iter()
            .find_map(|block| block.text.filter(|t| !t.is_empty()))
            .ok_or_else(|| "response contained no text".to_owned())
    }
}

impl Default for ImageAnalyzerTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ImageAnalyzerTool {
    fn name(&self) -> &str {
        "analyze_image"
    }

    fn description(&self) -> &str {
        "Analyze an image file and describe its contents. Works with JPG, \
         PNG, GIF, WebP, and BMP files. Can provide brief summaries, detailed \
         descriptions, or categorization data (filename suggestions, \
         categories, subjects). Use this when the user uploads an image or \
         asks about image contents."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "image_path": {
                    "type": "string",
                    "description": "Path to the image file to analyze",
                },
                "detail_level": {
                    "type": "string",
                    "enum": ["brief", "detailed", "categorization"],
                    "description": "Level of detail: 'brief' for one-sentence summary, 'detailed' for comprehensive description, 'categorization' for filename/category/subjects JSON",
                },
                "question": {
                    "type": "string",
                    "description": "Optional specific question to ask about the image (overrides detail_level)",
                },
            },
            "required": ["image_path"],
        })
    }

    async fn execute(&self, input: Value) -> ToolOutput {
        let image_path = input.get("image_path").and_then(Value::as_str).unwrap_or("");
        let detail_level = input
            .get("detail_level")
            .and_then(Value::as_str)
            .unwrap_or("detailed");
        let question = input.get("question").and_then(Value::as_str);

        let path = Path::new(image_path);
        let Ok(metadata) = tokio::fs::metadata(path).await else {
            return ToolOutput::error(format!("Image file not found: {image_path}"));
        };

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        let Some(media_type) = media_type_for(extension) else {
            return ToolOutput::error(format!(
                "Unsupported image format: .{extension}. \
                 Supported: .bmp, .gif, .jpeg, .jpg, .png, .tif, .tiff, .webp"
            ));
        };

        if metadata.len() > MAX_IMAGE_SIZE {
            return ToolOutput::error(format!(
                "Image too large ({}MB). Max size: {}MB",
                metadata.len() / 1024 / 1024,
                MAX_IMAGE_SIZE / 1024 / 1024
            ));
        }

        let image_data = match tokio::fs::read(path).await {
            Ok(bytes) => BASE64_STANDARD.encode(bytes),
            Err(err) => return ToolOutput::error(format!("Failed to read image: {err}")),
        };

        let prompt = match question {
            Some(question) => question.to_owned(),
            None => match detail_level {
                "brief" => {
                    "Briefly describe what you see in this image in one sentence.".to_owned()
                }
                "categorization" => "Analyze this image for file organization purposes. \
                     Provide a JSON response with: \
                     1) 'filename_suggestion': A brief descriptive name suitable for a \
                     filename (lowercase, underscores, no spaces, max 50 chars), \
                     2) 'category': A category for organizing (e.g., 'screenshots', \
                     'photos', 'diagrams', 'documents', 'memes'), \
                     3) 'subjects': Array of key subjects or topics (2-5 items). \
                     Only output valid JSON, no other text."
                    .to_owned(),
                _ => "Provide a detailed description of this image, including: \
                     objects present, people (if any), text content, colors, \
                     setting/scene, and any notable features."
                    .to_owned(),
            },
        };

        let Ok(api_key) = env::var("ANTHROPIC_API_KEY") else {
            return ToolOutput::error("ANTHROPIC_API_KEY environment variable not set");
        };

        match self
            .call_vision_api(&api_key, &image_data, media_type, &prompt)
            .await
        {
            Ok(result) => ToolOutput::ok(result),
            Err(err) => ToolOutput::error(format!("Vision API error: {err}")),
        }
    }
}

/// Extract text content from PDF files.
///
/// Reads text-based PDFs directly (fast, accurate) and falls back to
/// Tesseract OCR via `pdftoppm` for scanned PDFs (slower, best-effort).
pub struct PdfExtractorTool;

impl PdfExtractorTool {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfExtractorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for PdfExtractorTool {
    fn name(&self) -> &str {
        "extract_pdf_text"
    }

    fn description(&self) -> &str {
        "Extract text content from a PDF file. Handles both text-based PDFs \
         (fast) and scanned/image PDFs (via OCR). Can extract all pages or a \
         specific page range. Use this when the user uploads a PDF or asks \
         about PDF contents."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pdf_path": {
                    "type": "string",
                    "description": "Path to the PDF file",
                },
                "start_page": {
                    "type": "integer",
                    "description": "First page to extract (1-based, default: 1)",
                },
                "end_page": {
                    "type": "integer",
                    "description": "Last page to extract (1-based, inclusive, default: all pages)",
                },
                "ocr_fallback": {
                    "type": "boolean",
                    "description": "If true (default), use Tesseract OCR when text extraction yields little content (for scanned PDFs)",
                },
            },
            "required": ["pdf_path"],
        })
    }

    async fn execute(&self, input: Value) -> ToolOutput {
        let pdf_path = input.get("pdf_path").and_then(Value::as_str).unwrap_or("");
        let start_page = input
            .get("start_page")
            .and_then(Value::as_u64)
            .map_or(1, |p| u32::try_from(p).unwrap_or(u32::MAX))
            .max(1);
        let end_page = input
            .get("end_page")
            .and_then(Value::as_u64)
            .map(|p| u32::try_from(p).unwrap_or(u32::MAX));
        let ocr_fallback = input
            .get("ocr_fallback")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let path = PathBuf::from(pdf_path);
        if tokio::fs::metadata(&path).await.is_err() {
            return ToolOutput::error(format!("PDF file not found: {pdf_path}"));
        }
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        if !extension.eq_ignore_ascii_case("pdf") {
            return ToolOutput::error(format!("Not a PDF file: .{extension}"));
        }

        // Text extraction first; the document parse is synchronous CPU work.
        let extract_path = path.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            extract_text_pages(&extract_path, start_page, end_page)
        })
        .await;
        let (text, total_pages) = match extracted {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => return ToolOutput::error(format!("Failed to read PDF: {err}")),
            Err(err) => return ToolOutput::error(format!("Failed to read PDF: {err}")),
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| pdf_path.to_owned());
        let last_page = end_page.unwrap_or(total_pages).min(total_pages);
        let pages_extracted = (last_page.saturating_sub(start_page) + 1) as usize;

        let stripped = text.trim();
        let words = stripped.split_whitespace().count();

        if looks_scanned(words, pages_extracted) && ocr_fallback {
            info!(
                words,
                pages_extracted, "PDF appears scanned, trying OCR"
            );
            match extract_text_ocr(&path, start_page, last_page).await {
                Ok(ocr_text) if !ocr_text.trim().is_empty() => {
                    let header =
                        format!("[Extracted via OCR from {file_name} ({total_pages} pages total)]\n\n");
                    return ToolOutput::ok(header + &ocr_text);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "OCR fallback failed");
                    // Fall through to return whatever text extraction got.
                }
            }
        }

        if stripped.is_empty() {
            let method_note = if ocr_fallback {
                ""
            } else {
                " (OCR disabled -- enable ocr_fallback for scanned PDFs)"
            };
            return ToolOutput::error(format!(
                "No text could be extracted from {file_name}. \
                 The PDF may be image-only or encrypted.{method_note}"
            ));
        }

        let header =
            format!("[Extracted from {file_name} (pages {start_page}-{last_page} of {total_pages})]\n\n");
        ToolOutput::ok(header + stripped)
    }
}

/// Extract text per page with `--- Page N ---` markers. Returns the joined
/// text and the total page count.
fn extract_text_pages(
    path: &Path,
    start_page: u32,
    end_page: Option<u32>,
) -> Result<(String, u32), String> {
    let document = lopdf::Document::load(path).map_err(|err| err.to_string())?;
    let total_pages = u32::try_from(document.get_pages().len()).unwrap_or(u32::MAX);

    let first = start_page.clamp(1, total_pages.max(1));
    let last = end_page.unwrap_or(total_pages).min(total_pages);

    let mut pages_text = Vec::new();
    for page in first..=last {
        match document.extract_text(&[page]) {
            Ok(page_text) if !page_text.trim().is_empty() => {
                pages_text.push(format!("--- Page {page} ---\n{page_text}"));
            }
            Ok(_) => {}
            Err(err) => {
                warn!(page, %err, "page text extraction failed");
            }
        }
    }

    Ok((pages_text.join("\n\n"), total_pages))
}

/// Find a command on PATH.
async fn which(cmd: &str) -> Option<String> {
    let output = Command::new("which").arg(cmd).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    (!path.is_empty()).then_some(path)
}

/// Convert PDF pages to images with `pdftoppm`, then OCR each with
/// `tesseract`. Both binaries must be on PATH.
async fn extract_text_ocr(path: &Path, first_page: u32, last_page: u32) -> Result<String, String> {
    let Some(pdftoppm) = which("pdftoppm").await else {
        return Err("pdftoppm not found on PATH".to_owned());
    };
    let Some(tesseract) = which("tesseract").await else {
        return Err("tesseract not found on PATH".to_owned());
    };

    let tmpdir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let prefix = tmpdir.path().join("page");

    let convert = Command::new(&pdftoppm)
        .args(["-png", "-r", "300", "-f"])
        .arg(first_page.to_string())
        .arg("-l")
        .arg(last_page.to_string())
        .arg(path)
        .arg(&prefix)
        .output();
    let convert = tokio::time::timeout(OCR_TIMEOUT, convert)
        .await
        .map_err(|_| "pdftoppm timed out".to_owned())?
        .map_err(|err| err.to_string())?;
    if !convert.status.success() {
        return Err(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&convert.stderr).trim()
        ));
    }

    let mut images: Vec<PathBuf> = std::fs::read_dir(tmpdir.path())
        .map_err(|err| err.to_string())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
        .collect();
    images.sort();

    let mut pages_text = Vec::new();
    for image in images {
        let ocr = Command::new(&tesseract)
            .arg(&image)
            .arg("stdout")
            .output();
        let ocr = match tokio::time::timeout(OCR_TIMEOUT, ocr).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(image = %image.display(), %err, "OCR failed for page image");
                continue;
            }
            Err(_) => {
                warn!(image = %image.display(), "OCR timed out for page image");
                continue;
            }
        };
        let text = String::from_utf8_lossy(&ocr.stdout);
        if text.trim().is_empty() {
            continue;
        }
        // Page number from the generated filename (page-01.png).
        let page_num = image
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.rsplit('-').next())
            .map(|n| n.trim_start_matches('0'))
            .filter(|n| !n.is_empty())
            .unwrap_or("1")
            .to_owned();
        pages_text.push(format!("--- Page {page_num} ---\n{text}"));
    }

    Ok(pages_text.join("\n\n"))
}
