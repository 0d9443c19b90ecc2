use crate::data_loading::AnnotationSet;
use crate::error::{EcgError, Result};
use log::debug;
use std::collections::BTreeMap;

/// Annotation symbols that mark something other than a heartbeat:
/// `Q` (unclassifiable) and `+` (rhythm change).
pub const NON_BEAT_SYMBOLS: [char; 2] = ['Q', '+'];

/// Epoch window around each beat peak, in seconds.
pub const EPOCH_START_S: f64 = -0.2;
pub const EPOCH_END_S: f64 = 0.4;

/// The beat-only view of an annotation set: peaks and labels with the
/// non-beat markers removed, kept index-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatAnnotations {
    pub peaks: Vec<usize>,
    pub labels: Vec<char>,
}

impl BeatAnnotations {
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}

/// What to do with a beat whose window crosses the signal bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryPolicy {
    /// Skip the beat and record it in [`BeatSegments::dropped`].
    Drop,
    /// Keep the beat, filling out-of-range samples with the given value.
    Pad(f64),
    /// Fail with [`EcgError::BoundaryWindow`].
    Strict,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        BoundaryPolicy::Drop
    }
}

/// A beat excluded from segmentation because its window left the signal.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedBeat {
    /// Index into the filtered beat order.
    pub index: usize,
    /// Peak sample index in the signal.
    pub peak: usize,
}

/// Fixed-length waveform windows keyed by 0-based filtered-beat index.
#[derive(Debug, Clone, Default)]
pub struct BeatSegments {
    pub windows: BTreeMap<usize, Vec<f64>>,
    pub dropped: Vec<DroppedBeat>,
    /// Sample length shared by every window.
    pub window_len: usize,
}

impl BeatSegments {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Narrows an annotation set to classifiable heartbeats.
///
/// Pure and idempotent: the input set is untouched, and filtering an
/// already-filtered sequence changes nothing.
pub fn filter_beats(annotations: &AnnotationSet) -> BeatAnnotations {
    let mut peaks = Vec::with_capacity(annotations.len());
    let mut labels = Vec::with_capacity(annotations.len());

    for (&sample, &symbol) in annotations.samples.iter().zip(&annotations.symbols) {
        if !NON_BEAT_SYMBOLS.contains(&symbol) {
            peaks.push(sample);
            labels.push(symbol);
        }
    }

    BeatAnnotations { peaks, labels }
}

fn seconds_to_samples(seconds: f64, fs: u32) -> i64 {
    (seconds * fs as f64).round() as i64
}

/// Slices the cleaned signal into one fixed-length window per beat,
/// spanning [`EPOCH_START_S`] to [`EPOCH_END_S`] around each peak.
///
/// Beats whose window crosses the recording bounds are handled per `policy`.
/// An empty beat set yields an empty mapping.
pub fn segment_by_beats(
    signal: &[f64],
    beats: &BeatAnnotations,
    fs: u32,
    policy: BoundaryPolicy,
) -> Result<BeatSegments> {
    let pre = -seconds_to_samples(EPOCH_START_S, fs);
    let post = seconds_to_samples(EPOCH_END_S, fs);
    let window_len = (pre + post) as usize;

    let mut segments = BeatSegments {
        window_len,
        ..Default::default()
    };

    for (index, &peak) in beats.peaks.iter().enumerate() {
        let start = peak as i64 - pre;
        let end = peak as i64 + post;

        if start >= 0 && end <= signal.len() as i64 {
            segments
                .windows
                .insert(index, signal[start as usize..end as usize].to_vec());
            continue;
        }

        match policy {
            BoundaryPolicy::Drop => {
                debug!("dropping beat {index} at sample {peak}: window {start}..{end} out of bounds");
                segments.dropped.push(DroppedBeat { index, peak });
            }
            BoundaryPolicy::Pad(fill) => {
                let window: Vec<f64> = (start..end)
                    .map(|i| {
                        if i >= 0 && (i as usize) < signal.len() {
                            signal[i as usize]
                        } else {
                            fill
                        }
                    })
                    .collect();
                segments.windows.insert(index, window);
            }
            BoundaryPolicy::Strict => {
                return Err(EcgError::BoundaryWindow {
                    peak,
                    start,
                    end,
                    signal_len: signal.len(),
                });
            }
        }
    }

    debug!(
        "segmented {} beat(s) into {}-sample windows, {} dropped",
        segments.len(),
        window_len,
        segments.dropped.len()
    );

    Ok(segments)
}
