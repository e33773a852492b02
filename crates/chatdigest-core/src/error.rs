//! Pipeline-level errors.
//!
//! Per-event analysis failures never surface here: they degrade to an empty
//! fact inside the analyzer. Only composition, the pass deadline and storage
//! writes are reported to the session.

use chatdigest_ai::AiError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("Digest composition failed: {0}")]
    Composition(#[from] AiError),

    #[error("Digest composition returned no text")]
    EmptyDigest,

    #[error("Analysis pass exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DigestError>;
