//! Plain-text extraction from document attachments.
//!
//! Supported: plain text formats, HTML, DOCX and PDF (through `pdftotext`).

use async_trait::async_trait;
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;

use crate::error::{AiError, Result};

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Text,
    Html,
    Docx,
    Pdf,
}

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "json", "xml", "yaml", "yml", "toml", "log", "rst",
];

fn format_from_extension(path: &Path) -> Option<DocumentFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => Some(DocumentFormat::Html),
        "docx" => Some(DocumentFormat::Docx),
        "pdf" => Some(DocumentFormat::Pdf),
        e if TEXT_EXTENSIONS.contains(&e) => Some(DocumentFormat::Text),
        _ => None,
    }
}

fn sniff_format(bytes: &[u8]) -> Option<DocumentFormat> {
    if bytes.starts_with(b"%PDF") {
        Some(DocumentFormat::Pdf)
    } else if bytes.starts_with(b"PK") {
        Some(DocumentFormat::Docx)
    } else if std::str::from_utf8(bytes).is_ok() {
        Some(DocumentFormat::Text)
    } else {
        None
    }
}

/// Extractor dispatching on file extension, falling back to content sniffing.
#[derive(Debug, Clone)]
pub struct DefaultDocumentExtractor {
    pdftotext: String,
}

impl Default for DefaultDocumentExtractor {
    fn default() -> Self {
        Self {
            pdftotext: "pdftotext".to_string(),
        }
    }
}

impl DefaultDocumentExtractor {
    pub fn with_pdftotext(binary: impl Into<String>) -> Self {
        Self {
            pdftotext: binary.into(),
        }
    }

    async fn extract_pdf(&self, path: &Path) -> Result<String> {
        let output = Command::new(&self.pdftotext)
            .arg("-layout")
            .arg(path)
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AiError::MediaTool {
                tool: self.pdftotext.clone(),
                message: format!("failed to spawn: {}", e),
            })?;

        if !output.status.success() {
            return Err(AiError::MediaTool {
                tool: self.pdftotext.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl DocumentExtractor for DefaultDocumentExtractor {
    async fn extract(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let format = format_from_extension(path)
            .or_else(|| sniff_format(&bytes))
            .ok_or_else(|| {
                AiError::Document(format!("Unsupported document: {}", path.display()))
            })?;

        let text = match format {
            DocumentFormat::Text => String::from_utf8_lossy(&bytes).into_owned(),
            DocumentFormat::Html => extract_text_from_html(&String::from_utf8_lossy(&bytes)),
            DocumentFormat::Docx => {
                let owned: PathBuf = path.to_path_buf();
                tokio::task::spawn_blocking(move || extract_docx(&owned))
                    .await
                    .map_err(|e| AiError::Document(format!("DOCX task failed: {}", e)))??
            }
            DocumentFormat::Pdf => self.extract_pdf(path).await?,
        };

        Ok(text.trim().to_string())
    }
}

fn extract_text_from_html(html: &str) -> String {
    use scraper::{Html, Selector};

    let document = Html::parse_document(html);
    let noise: Vec<Selector> = ["script", "style", "noscript"]
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .collect();

    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());

    let mut skipped = std::collections::HashSet::new();
    for selector in &noise {
        for element in root.select(selector) {
            skipped.insert(element.id());
        }
    }

    let mut output = String::new();
    for node in root.descendants() {
        if let Some(text) = node.value().as_text() {
            let inside_noise = node.ancestors().any(|a| skipped.contains(&a.id()));
            let text = text.trim();
            if !inside_noise && !text.is_empty() {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(text);
            }
        }
    }
    output
}

static PARAGRAPH_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</w:p>").expect("valid regex"));
static XML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

fn extract_docx(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| AiError::Document(format!("Not a DOCX archive: {}", e)))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| AiError::Document(format!("DOCX has no document body: {}", e)))?;

    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(docx_xml_to_text(&xml))
}

fn docx_xml_to_text(xml: &str) -> String {
    let with_breaks = PARAGRAPH_END.replace_all(xml, "\n");
    let stripped = XML_TAG.replace_all(&with_breaks, "");
    let text = stripped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_format_detection() {
        assert_eq!(
            format_from_extension(Path::new("notes.MD")),
            Some(DocumentFormat::Text)
        );
        assert_eq!(
            format_from_extension(Path::new("page.htm")),
            Some(DocumentFormat::Html)
        );
        assert_eq!(format_from_extension(Path::new("blob")), None);
        assert_eq!(sniff_format(b"%PDF-1.7"), Some(DocumentFormat::Pdf));
        assert_eq!(sniff_format(b"PK\x03\x04"), Some(DocumentFormat::Docx));
        assert_eq!(sniff_format(b"plain words"), Some(DocumentFormat::Text));
        assert_eq!(sniff_format(&[0xFF, 0xFE, 0x00, 0xD8]), None);
    }

    #[test]
    fn test_html_extraction_skips_scripts() {
        let html = r#"<html><head><title>T</title></head>
            <body><h1>Agenda</h1><script>var x = 1;</script><p>Meet at 10</p></body></html>"#;
        let text = extract_text_from_html(html);
        assert_eq!(text, "Agenda\nMeet at 10");
    }

    #[test]
    fn test_docx_xml_to_text() {
        let xml = r#"<w:document><w:body><w:p><w:r><w:t>Q3 plan</w:t></w:r></w:p><w:p><w:r><w:t>R&amp;D budget</w:t></w:r></w:p></w:body></w:document>"#;
        assert_eq!(docx_xml_to_text(xml), "Q3 plan\nR&D budget");
    }

    #[tokio::test]
    async fn test_extract_docx_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.docx");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file(
                    "word/document.xml",
                    zip::write::SimpleFileOptions::default(),
                )
                .unwrap();
            writer
                .write_all(b"<w:document><w:p><w:t>Ship it</w:t></w:p></w:document>")
                .unwrap();
            writer.finish().unwrap();
        }

        let text = DefaultDocumentExtractor::default()
            .extract(&path)
            .await
            .unwrap();
        assert_eq!(text, "Ship it");
    }

    #[tokio::test]
    async fn test_extract_plain_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minutes.txt");
        std::fs::write(&path, "  decided: friday release \n").unwrap();

        let text = DefaultDocumentExtractor::default()
            .extract(&path)
            .await
            .unwrap();
        assert_eq!(text, "decided: friday release");
    }

    #[tokio::test]
    async fn test_binary_blob_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, [0xFF, 0xFE, 0x00, 0xD8]).unwrap();

        let result = DefaultDocumentExtractor::default().extract(&path).await;
        assert!(matches!(result, Err(AiError::Document(_))));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
