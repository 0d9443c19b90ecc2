//! Loading and preparation of single-patient ECG recordings.
//!
//! For one patient/segment pair this crate resolves the record path, reads
//! the waveform and its beat annotations, removes baseline wander from the
//! primary channel, slices the cleaned signal into per-beat windows, and
//! computes a small set of heart-rate and heart-rate-variability summary
//! features. Results live in memory on an [`EcgSession`]; persistence and
//! batch processing are left to callers.

pub mod data_loading;
pub mod error;
pub mod heart_analysis;
pub mod preprocessing;
pub mod segmentation;
pub mod session;

pub use data_loading::{AnnotationSet, LoadedEcg};
pub use error::{EcgError, Result};
pub use heart_analysis::{BeatAnalysis, EcgFeatures};
pub use segmentation::{BeatAnnotations, BeatSegments, BoundaryPolicy, DroppedBeat};
pub use session::EcgSession;
