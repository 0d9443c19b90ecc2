use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the loading, segmentation, and analysis stages.
///
/// All variants propagate to the caller; nothing in this crate retries,
/// logs-and-continues, or substitutes defaults for missing clinical values.
#[derive(Debug, Error)]
pub enum EcgError {
    /// The record or annotation file could not be opened or read.
    #[error("record data not found or unreadable at {}: {source}", path.display())]
    DataNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The record and its annotations are structurally inconsistent.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// The signal holds too few beats for the requested metrics.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A beat window would extend past the signal bounds under
    /// [`BoundaryPolicy::Strict`](crate::segmentation::BoundaryPolicy).
    #[error(
        "beat window for peak at sample {peak} spans {start}..{end}, outside signal of {signal_len} samples"
    )]
    BoundaryWindow {
        peak: usize,
        start: i64,
        end: i64,
        signal_len: usize,
    },
}

pub type Result<T, E = EcgError> = std::result::Result<T, E>;
