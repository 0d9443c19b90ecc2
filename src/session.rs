use crate::data_loading::{self, AnnotationSet, LoadedEcg};
use crate::error::Result;
use crate::heart_analysis::{self, BeatAnalysis};
use crate::segmentation::{self, BeatAnnotations, BeatSegments, BoundaryPolicy};
use log::debug;
use std::path::{Path, PathBuf};

/// One patient/segment ECG recording and everything derived from it.
///
/// Loading happens at construction; segmentation and analysis run on demand
/// and are independent of each other. A session owns its state exclusively
/// and is single-threaded; separate sessions never share anything.
#[derive(Debug)]
pub struct EcgSession {
    data_path: PathBuf,
    patient_id: u32,
    segment_id: u32,
    record: LoadedEcg,
    beat_segments: Option<BeatSegments>,
    beat_analysis: Option<BeatAnalysis>,
}

impl EcgSession {
    /// Loads the recording for the given patient/segment pair, validating
    /// the record/annotation pairing and cleaning the primary channel.
    pub fn open(
        data_path: impl Into<PathBuf>,
        patient_id: u32,
        segment_id: u32,
    ) -> Result<Self> {
        let data_path = data_path.into();
        let record = data_loading::load_ecg(&data_path, patient_id, segment_id)?;

        debug!(
            "opened session for patient {patient_id} segment {segment_id}: \
             {} samples at {} Hz",
            record.clean.len(),
            record.fs
        );

        Ok(EcgSession {
            data_path,
            patient_id,
            segment_id,
            record,
            beat_segments: None,
            beat_analysis: None,
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn patient_id(&self) -> u32 {
        self.patient_id
    }

    pub fn segment_id(&self) -> u32 {
        self.segment_id
    }

    /// The baseline-corrected primary channel.
    pub fn clean_signal(&self) -> &[f64] {
        &self.record.clean
    }

    /// Sampling rate in Hz.
    pub fn sampling_rate(&self) -> u32 {
        self.record.fs
    }

    /// The full annotation set as loaded, never narrowed by filtering.
    pub fn annotations(&self) -> &AnnotationSet {
        &self.record.annotations
    }

    /// The beat-only view of the annotations, recomputed from the raw set on
    /// every call so repeated filtering cannot compound.
    pub fn beat_annotations(&self) -> BeatAnnotations {
        segmentation::filter_beats(&self.record.annotations)
    }

    /// Segments the clean signal into fixed windows around each retained
    /// beat, storing and returning the result. Safe to call repeatedly.
    pub fn segment_by_beats(&mut self, policy: BoundaryPolicy) -> Result<&BeatSegments> {
        let beats = self.beat_annotations();
        let segments =
            segmentation::segment_by_beats(&self.record.clean, &beats, self.record.fs, policy)?;
        Ok(self.beat_segments.insert(segments))
    }

    /// Runs whole-signal feature extraction and narrows the result to the
    /// six clinical columns, storing and returning it.
    pub fn analyze_beats(&mut self) -> Result<&BeatAnalysis> {
        let features = heart_analysis::extract_features(&self.record.clean, self.record.fs)?;
        let analysis = BeatAnalysis::from(&features);
        Ok(self.beat_analysis.insert(analysis))
    }

    /// The most recent segmentation result, if any.
    pub fn beat_segments(&self) -> Option<&BeatSegments> {
        self.beat_segments.as_ref()
    }

    /// The most recent analysis result, if any.
    pub fn beat_analysis(&self) -> Option<&BeatAnalysis> {
        self.beat_analysis.as_ref()
    }
}
