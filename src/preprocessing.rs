use log::debug;
use sci_rs::signal::filter::{design::Sos, sosfiltfilt_dyn};
use std::f64::consts::{PI, SQRT_2};

/// High-pass cutoff used to remove baseline wander from raw ECG.
pub const BASELINE_CUTOFF_HZ: f64 = 0.5;

/// Design a second-order Butterworth high-pass digital filter.
///
/// Returns transfer-function coefficients `(b, a)` with `a[0] == 1`.
/// The cutoff must satisfy `0 < cutoff < fs / 2`.
fn design_highpass_filter(cutoff: f64, fs: f64) -> ([f64; 3], [f64; 3]) {
    assert!(fs > 0.0, "fs must be positive");
    assert!(
        cutoff > 0.0 && cutoff < fs / 2.0,
        "cutoff must lie below the Nyquist frequency"
    );

    // Bilinear transform of the analog prototype.
    let k = (PI * cutoff / fs).tan();
    let norm = 1.0 / (1.0 + SQRT_2 * k + k * k);

    let b = [norm, -2.0 * norm, norm];
    let a = [
        1.0,
        2.0 * (k * k - 1.0) * norm,
        (1.0 - SQRT_2 * k + k * k) * norm,
    ];

    (b, a)
}

/// Convert second-order transfer function coefficients to a single SOS section.
fn tf2sos(b: &[f64; 3], a: &[f64; 3]) -> [f64; 6] {
    [b[0], b[1], b[2], 1.0, a[1] / a[0], a[2] / a[0]]
}

/// Removes baseline wander with a zero-phase high-pass filter.
///
/// The output is sample-aligned with the input and has the same length.
pub fn remove_baseline_wander(data: &[f64], sample_rate: f64, cutoff: f64) -> Vec<f64> {
    let (b, a) = design_highpass_filter(cutoff, sample_rate);
    let sos = tf2sos(&b, &a);

    debug!(
        "baseline filter: cutoff {:.2} Hz at {:.0} Hz, sos {:?}",
        cutoff, sample_rate, sos
    );

    let sos_array = vec![Sos::new([sos[0], sos[1], sos[2]], [1.0, sos[4], sos[5]])];

    sosfiltfilt_dyn(data.iter(), &sos_array)
}
