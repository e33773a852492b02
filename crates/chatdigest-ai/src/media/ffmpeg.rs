use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{AiError, Result};

/// Audio/video operations the analyzer needs on a local media file.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Whether the container has at least one audio stream.
    async fn has_audio_track(&self, video: &Path) -> Result<bool>;

    /// Demux the audio track into `output` (mp3).
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()>;

    /// Write every `stride`-th frame as a JPEG into `out_dir`, at most
    /// `max_frames` of them, and return the frame paths in order.
    async fn sample_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        stride: u32,
        max_frames: u32,
    ) -> Result<Vec<PathBuf>>;
}

/// [`MediaToolkit`] backed by the `ffprobe` and `ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl FfmpegToolkit {
    pub fn with_binaries(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>> {
        debug!(program, ?args, "Running media tool");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AiError::MediaTool {
                tool: program.to_string(),
                message: format!("failed to spawn: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AiError::MediaTool {
                tool: program.to_string(),
                message: stderr.lines().last().unwrap_or_default().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| AiError::Media(format!("Non UTF-8 path: {}", path.display())))
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn has_audio_track(&self, video: &Path) -> Result<bool> {
        let stdout = self
            .run(
                &self.ffprobe,
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "a",
                    "-show_entries",
                    "stream=index",
                    "-of",
                    "csv=p=0",
                    path_arg(video)?,
                ],
            )
            .await?;
        Ok(!String::from_utf8_lossy(&stdout).trim().is_empty())
    }

    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        self.run(
            &self.ffmpeg,
            &[
                "-y",
                "-loglevel",
                "error",
                "-i",
                path_arg(video)?,
                "-vn",
                "-acodec",
                "libmp3lame",
                path_arg(output)?,
            ],
        )
        .await?;
        Ok(())
    }

    async fn sample_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        stride: u32,
        max_frames: u32,
    ) -> Result<Vec<PathBuf>> {
        let filter = format!("select=not(mod(n\\,{}))", stride.max(1));
        let max = max_frames.to_string();
        let pattern = out_dir.join("frame_%04d.jpg");

        self.run(
            &self.ffmpeg,
            &[
                "-y",
                "-loglevel",
                "error",
                "-i",
                path_arg(video)?,
                "-vf",
                &filter,
                "-fps_mode",
                "vfr",
                "-frames:v",
                &max,
                "-q:v",
                "5",
                path_arg(&pattern)?,
            ],
        )
        .await?;

        list_frames(out_dir).await
    }
}

async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_frame = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("frame_") && n.ends_with(".jpg"));
        if is_frame {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}
