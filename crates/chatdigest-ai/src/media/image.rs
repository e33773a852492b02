use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::Path;

use crate::error::Result;
use crate::media::scratch::is_remote;

/// MIME type from a file extension.
pub fn detect_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Read a local image into a `data:` URL.
pub async fn to_data_url(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let encoded = STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", detect_mime(path), encoded))
}

/// URL a vision model can load: remote references pass through untouched,
/// local files are inlined.
pub async fn image_url_for(reference: &str) -> Result<String> {
    if is_remote(reference) {
        Ok(reference.to_string())
    } else {
        to_data_url(Path::new(reference)).await
    }
}
