use crate::error::{EcgError, Result};
use log::debug;
use serde::Serialize;

/// Rolling-mean window used for peak detection, in seconds.
const ROLLING_MEAN_WINDOW_S: f64 = 0.75;

/// Physiological heart-rate bounds for accepting a peak fit.
const BPM_MIN: f64 = 40.0;
const BPM_MAX: f64 = 180.0;

/// Embedding dimension for sample entropy over the RR series.
const SAMPEN_M: usize = 2;

/// Whole-signal feature table: heart-rate statistics plus time-domain and
/// nonlinear heart-rate-variability measures.
///
/// Every metric is an `Option`: a value the signal is too short or too
/// sparse to support is reported as `None`, never substituted with zero.
/// Callers deciding whether a partially-populated table is acceptable must
/// check each field they consume.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EcgFeatures {
    /// Mean heart rate over the recording, beats per minute.
    pub mean_heart_rate: Option<f64>,
    /// Mean RR interval, milliseconds.
    pub mean_rr: Option<f64>,
    /// Standard deviation of RR intervals, milliseconds.
    pub sdnn: Option<f64>,
    /// Standard deviation of successive RR differences, milliseconds.
    pub sdsd: Option<f64>,
    /// Root mean square of successive RR differences, milliseconds.
    pub rmssd: Option<f64>,
    /// Percentage of successive differences above 20 ms.
    pub pnn20: Option<f64>,
    /// Percentage of successive differences above 50 ms.
    pub pnn50: Option<f64>,
    /// Poincare short-axis dispersion, milliseconds.
    pub sd1: Option<f64>,
    /// Poincare long-axis dispersion, milliseconds.
    pub sd2: Option<f64>,
    /// Sample entropy of the RR series.
    pub sample_entropy: Option<f64>,
}

/// The six clinically relevant columns retained from [`EcgFeatures`],
/// in stable order.
#[derive(Debug, Clone, Serialize)]
pub struct BeatAnalysis {
    pub mean_heart_rate: Option<f64>,
    pub sdnn: Option<f64>,
    pub rmssd: Option<f64>,
    pub pnn50: Option<f64>,
    pub sd1: Option<f64>,
    pub sample_entropy: Option<f64>,
}

impl BeatAnalysis {
    pub const COLUMNS: [&'static str; 6] = [
        "mean_heart_rate",
        "sdnn",
        "rmssd",
        "pnn50",
        "sd1",
        "sample_entropy",
    ];

    /// Named-column view in the same order as [`Self::COLUMNS`].
    pub fn columns(&self) -> [(&'static str, Option<f64>); 6] {
        [
            ("mean_heart_rate", self.mean_heart_rate),
            ("sdnn", self.sdnn),
            ("rmssd", self.rmssd),
            ("pnn50", self.pnn50),
            ("sd1", self.sd1),
            ("sample_entropy", self.sample_entropy),
        ]
    }
}

impl From<&EcgFeatures> for BeatAnalysis {
    fn from(features: &EcgFeatures) -> Self {
        BeatAnalysis {
            mean_heart_rate: features.mean_heart_rate,
            sdnn: features.sdnn,
            rmssd: features.rmssd,
            pnn50: features.pnn50,
            sd1: features.sd1,
            sample_entropy: features.sample_entropy,
        }
    }
}

/// Uniform-filter rolling mean of the signal.
fn rolling_mean(data: &[f64], window_seconds: f64, fs: f64) -> Vec<f64> {
    let size = (window_seconds * fs) as usize;
    let mut result = vec![0.0; data.len()];

    for i in 0..data.len() {
        let start = if i < size / 2 { 0 } else { i - size / 2 };
        let end = (i + size / 2 + 1).min(data.len());
        result[i] = data[start..end].iter().sum::<f64>() / (end - start) as f64;
    }

    result
}

/// Finds local maxima among the points elevated above the rolling mean.
fn detect_peaks(data: &[f64], rol_mean: &[f64], ma_perc: f64) -> Vec<usize> {
    let mn = rol_mean.iter().map(|&x| x / 100.0).sum::<f64>() / rol_mean.len() as f64 * ma_perc;

    let mut above: Vec<usize> = Vec::new();
    for (i, (&d, &r)) in data.iter().zip(rol_mean.iter()).enumerate() {
        if d > r + mn {
            above.push(i);
        }
    }
    if above.is_empty() {
        return Vec::new();
    }

    // Split consecutive runs and keep the maximum of each.
    let mut peaks = Vec::new();
    let mut run_start = 0;
    for i in 1..=above.len() {
        if i == above.len() || above[i] - above[i - 1] > 1 {
            let best = above[run_start..i]
                .iter()
                .max_by(|&&a, &&b| data[a].partial_cmp(&data[b]).unwrap())
                .copied();
            if let Some(idx) = best {
                peaks.push(idx);
            }
            run_start = i;
        }
    }

    peaks
}

/// Standard deviation of the RR intervals for a candidate peak list, used to
/// score detection quality.
fn rr_spread(peaks: &[usize], fs: f64) -> f64 {
    let rr = rr_intervals(peaks, fs);
    if rr.len() < 2 {
        return f64::INFINITY;
    }
    let mean = rr.iter().sum::<f64>() / rr.len() as f64;
    (rr.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (rr.len() - 1) as f64).sqrt()
}

/// Sweeps rolling-mean elevations and keeps the candidate peak list with the
/// most consistent RR intervals inside the physiological heart-rate range.
pub fn detect_r_peaks(signal: &[f64], fs: u32) -> Vec<usize> {
    let fs = fs as f64;
    let rol_mean = rolling_mean(signal, ROLLING_MEAN_WINDOW_S, fs);

    let ma_percs = [
        5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0, 110.0,
        120.0, 150.0, 200.0, 300.0,
    ];

    let mut best: Option<(f64, Vec<usize>)> = None;
    for ma_perc in ma_percs {
        let peaks = detect_peaks(signal, &rol_mean, ma_perc);
        let bpm = peaks.len() as f64 / (signal.len() as f64 / fs) * 60.0;
        let spread = rr_spread(&peaks, fs);

        debug!(
            "ma_perc {ma_perc}: {} peak(s), {:.1} bpm, rr spread {:.2}",
            peaks.len(),
            bpm,
            spread
        );

        if spread <= 0.1 || !(BPM_MIN..=BPM_MAX).contains(&bpm) {
            continue;
        }
        if best.as_ref().map_or(true, |(s, _)| spread < *s) {
            best = Some((spread, peaks));
        }
    }

    best.map(|(_, peaks)| peaks).unwrap_or_default()
}

/// RR intervals in milliseconds between successive peaks.
fn rr_intervals(peaks: &[usize], fs: f64) -> Vec<f64> {
    peaks
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64 * 1000.0 / fs)
        .collect()
}

/// Drops implausible RR intervals: outside the mean by 30 percent, with a
/// 300 ms floor on the band.
fn reject_outlier_rr(rr: &[f64]) -> Vec<f64> {
    if rr.is_empty() {
        return Vec::new();
    }

    let mean = rr.iter().sum::<f64>() / rr.len() as f64;
    let band = (0.3 * mean).max(300.0);
    rr.iter()
        .copied()
        .filter(|&x| x > mean - band && x < mean + band)
        .collect()
}

/// Sample entropy with embedding dimension `m` and tolerance `r` (Chebyshev
/// distance), self-matches excluded. `None` when the series is too short or
/// no template pairs match.
fn sample_entropy(data: &[f64], m: usize, r: f64) -> Option<f64> {
    if data.len() < m + 2 || r <= 0.0 {
        return None;
    }

    let count_matches = |len: usize| -> usize {
        let n = data.len() - len + 1;
        let mut count = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                let dist = (0..len)
                    .map(|k| (data[i + k] - data[j + k]).abs())
                    .fold(0.0f64, f64::max);
                if dist <= r {
                    count += 1;
                }
            }
        }
        count
    };

    let b = count_matches(m);
    let a = count_matches(m + 1);
    if a == 0 || b == 0 {
        return None;
    }

    Some(-((a as f64) / (b as f64)).ln())
}

fn sample_std(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    Some(
        (data.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (data.len() - 1) as f64).sqrt(),
    )
}

/// Runs whole-signal feature extraction over a cleaned ECG.
///
/// Detects R-peaks, rejects implausible RR intervals, and computes the wide
/// feature table. Fails with [`EcgError::InsufficientData`] only when no RR
/// interval can be formed at all; otherwise individual metrics that cannot
/// be computed come back as `None`.
pub fn extract_features(signal: &[f64], fs: u32) -> Result<EcgFeatures> {
    let peaks = detect_r_peaks(signal, fs);
    if peaks.len() < 2 {
        return Err(EcgError::InsufficientData(format!(
            "{} peak(s) detected, need at least 2 for RR intervals",
            peaks.len()
        )));
    }

    let rr = rr_intervals(&peaks, fs as f64);
    let rr = reject_outlier_rr(&rr);
    if rr.is_empty() {
        return Err(EcgError::InsufficientData(
            "no RR interval within the physiological band".into(),
        ));
    }

    debug!("extracting features from {} RR interval(s)", rr.len());

    let mean_rr = rr.iter().sum::<f64>() / rr.len() as f64;
    let mean_heart_rate = (mean_rr > 0.0).then(|| 60_000.0 / mean_rr);

    let diffs: Vec<f64> = rr.windows(2).map(|w| (w[1] - w[0]).abs()).collect();

    let sdnn = sample_std(&rr);
    let sdsd = sample_std(&diffs);
    let rmssd = (!diffs.is_empty())
        .then(|| (diffs.iter().map(|&x| x * x).sum::<f64>() / diffs.len() as f64).sqrt());

    let (pnn20, pnn50) = if diffs.is_empty() {
        (None, None)
    } else {
        let nn20 = diffs.iter().filter(|&&x| x > 20.0).count();
        let nn50 = diffs.iter().filter(|&&x| x > 50.0).count();
        (
            Some(nn20 as f64 / diffs.len() as f64 * 100.0),
            Some(nn50 as f64 / diffs.len() as f64 * 100.0),
        )
    };

    // Poincare axes from the interval and successive-difference dispersion.
    let sd1 = sdsd.map(|s| (0.5 * s * s).sqrt());
    let sd2 = match (sdnn, sdsd) {
        (Some(sdnn), Some(sdsd)) => Some((2.0 * sdnn * sdnn - 0.5 * sdsd * sdsd).max(0.0).sqrt()),
        _ => None,
    };

    let sample_entropy = sdnn.and_then(|sd| sample_entropy(&rr, SAMPEN_M, 0.2 * sd));

    Ok(EcgFeatures {
        mean_heart_rate,
        mean_rr: Some(mean_rr),
        sdnn,
        sdsd,
        rmssd,
        pnn20,
        pnn50,
        sd1,
        sd2,
        sample_entropy,
    })
}
