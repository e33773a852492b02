//! Local handling of media references: scratch directories, fetching,
//! ffmpeg demuxing and image encoding.

mod ffmpeg;
mod image;
mod scratch;

pub use ffmpeg::{FfmpegToolkit, MediaToolkit};
pub use image::{detect_mime, image_url_for, to_data_url};
pub use scratch::{DEFAULT_MAX_MEDIA_BYTES, MediaFetcher, ScratchSpace, is_remote};
