use crate::error::{EcgError, Result};
use crate::preprocessing::{remove_baseline_wander, BASELINE_CUTOFF_HZ};
use log::{debug, trace};
use std::path::{Path, PathBuf};

/// Signal storage format for 16-bit little-endian two's complement samples,
/// interleaved by channel. The only format the source dataset uses.
const FORMAT_16: u32 = 16;

/// Default ADC gain (adu/mV) when the header leaves it unspecified or zero.
const DEFAULT_GAIN: f64 = 200.0;

// Annotation type codes 59..=63 carry bookkeeping rather than events.
const CODE_SKIP: u8 = 59;
const CODE_NUM: u8 = 60;
const CODE_SUB: u8 = 61;
const CODE_CHN: u8 = 62;
const CODE_AUX: u8 = 63;

/// Per-channel description from the record header.
#[derive(Debug, Clone)]
pub struct SignalSpec {
    pub file_name: String,
    pub format: u32,
    pub gain: f64,
    pub baseline: f64,
    pub units: String,
    pub description: String,
}

/// Parsed record header (`.hea`).
#[derive(Debug, Clone)]
pub struct RecordHeader {
    pub name: String,
    pub channels: usize,
    pub fs: u32,
    /// Stated sample count; zero means "infer from the signal file".
    pub samples: usize,
    pub signals: Vec<SignalSpec>,
}

/// Ordered event markers from the annotation file (`.atr`).
///
/// `samples` is non-decreasing; `samples` and `symbols` always have equal
/// length, one entry per marked event.
#[derive(Debug, Clone, Default)]
pub struct AnnotationSet {
    pub samples: Vec<usize>,
    pub symbols: Vec<char>,
}

impl AnnotationSet {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Everything the loader produces for one patient/segment pair.
#[derive(Debug, Clone)]
pub struct LoadedEcg {
    /// Primary channel after baseline-wander removal, in physical units.
    pub clean: Vec<f64>,
    /// The full, unfiltered annotation set.
    pub annotations: AnnotationSet,
    /// Sampling rate in Hz.
    pub fs: u32,
}

impl LoadedEcg {
    /// Sample indices of every annotated event, beats and markers alike.
    pub fn peaks(&self) -> &[usize] {
        &self.annotations.samples
    }

    /// Annotation symbol for each event, aligned with [`peaks`](Self::peaks).
    pub fn labels(&self) -> &[char] {
        &self.annotations.symbols
    }
}

/// Builds the record base path for a patient/segment pair.
///
/// Records nest by the first digit of the zero-padded 5-digit patient id:
/// `{data_path}/p0{d}/p{patient:05}/p{patient:05}_s{segment:02}`.
pub fn record_base_path(data_path: &Path, patient_id: u32, segment_id: u32) -> PathBuf {
    let group = (patient_id / 10_000) % 10;
    data_path
        .join(format!("p0{group}"))
        .join(format!("p{patient_id:05}"))
        .join(format!("p{patient_id:05}_s{segment_id:02}"))
}

fn not_found(path: &Path, source: std::io::Error) -> EcgError {
    EcgError::DataNotFound {
        path: path.to_path_buf(),
        source,
    }
}

fn malformed(msg: impl Into<String>) -> EcgError {
    EcgError::MalformedRecord(msg.into())
}

/// Parses a `gain(baseline)/units` header token. Every part is optional.
fn parse_gain_spec(token: &str) -> Result<(f64, f64, String)> {
    let (gain_part, units) = match token.split_once('/') {
        Some((g, u)) => (g, u.to_string()),
        None => (token, String::new()),
    };

    let (gain_str, baseline) = match gain_part.split_once('(') {
        Some((g, rest)) => {
            let inner = rest
                .strip_suffix(')')
                .ok_or_else(|| malformed(format!("unterminated baseline in '{token}'")))?;
            let baseline: f64 = inner
                .parse()
                .map_err(|_| malformed(format!("bad baseline in '{token}'")))?;
            (g, baseline)
        }
        None => (gain_part, 0.0),
    };

    let gain: f64 = gain_str
        .parse()
        .map_err(|_| malformed(format!("bad gain in '{token}'")))?;

    // Zero gain marks an uncalibrated signal.
    let gain = if gain == 0.0 { DEFAULT_GAIN } else { gain };

    Ok((gain, baseline, units))
}

fn parse_signal_line(line: &str) -> Result<SignalSpec> {
    let mut tokens = line.split_whitespace();

    let file_name = tokens
        .next()
        .ok_or_else(|| malformed("signal line missing file name"))?
        .to_string();

    let format_token = tokens
        .next()
        .ok_or_else(|| malformed("signal line missing format"))?;
    // The format may carry xN/:N/+N modifiers; the leading digits identify it.
    let digits: String = format_token
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let format: u32 = digits
        .parse()
        .map_err(|_| malformed(format!("bad signal format '{format_token}'")))?;

    let (gain, baseline, units) = match tokens.next() {
        Some(token) => parse_gain_spec(token)?,
        None => (DEFAULT_GAIN, 0.0, String::new()),
    };

    // Remaining numeric fields (adc resolution, zero, checksum, ...) are not
    // needed here; the trailing free-text field names the lead.
    let rest: Vec<&str> = tokens.collect();
    let description = rest
        .iter()
        .skip_while(|t| t.parse::<f64>().is_ok())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");

    Ok(SignalSpec {
        file_name,
        format,
        gain,
        baseline,
        units,
        description,
    })
}

/// Reads and parses a record header file.
pub fn read_header(path: &Path) -> Result<RecordHeader> {
    let text = std::fs::read_to_string(path).map_err(|e| not_found(path, e))?;

    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let record_line = lines
        .next()
        .ok_or_else(|| malformed(format!("empty header at {}", path.display())))?;
    let fields: Vec<&str> = record_line.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(malformed(format!("short record line '{record_line}'")));
    }

    let name = fields[0].to_string();
    let channels: usize = fields[1]
        .parse()
        .map_err(|_| malformed(format!("bad channel count '{}'", fields[1])))?;
    if channels == 0 {
        return Err(malformed(format!("record {name} has zero channels")));
    }

    // The rate field may carry a counter frequency after a slash.
    let fs_token = fields[2].split('/').next().unwrap_or(fields[2]);
    let fs: u32 = fs_token
        .parse()
        .map_err(|_| malformed(format!("bad sampling rate '{}'", fields[2])))?;
    if fs == 0 {
        return Err(malformed(format!("record {name} has zero sampling rate")));
    }

    let samples: usize = match fields.get(3) {
        Some(token) => token
            .parse()
            .map_err(|_| malformed(format!("bad sample count '{token}'")))?,
        None => 0,
    };

    let mut signals = Vec::with_capacity(channels);
    for _ in 0..channels {
        let line = lines
            .next()
            .ok_or_else(|| malformed(format!("record {name} is missing signal lines")))?;
        signals.push(parse_signal_line(line)?);
    }

    debug!(
        "header {}: {} channel(s) at {} Hz, {} stated samples",
        name, channels, fs, samples
    );

    Ok(RecordHeader {
        name,
        channels,
        fs,
        samples,
        signals,
    })
}

/// Reads the primary (first) channel of the record's signal file, converted
/// to physical units.
pub fn read_signal(header: &RecordHeader, base_path: &Path) -> Result<Vec<f64>> {
    let spec = &header.signals[0];
    if spec.format != FORMAT_16 {
        return Err(malformed(format!(
            "unsupported signal format {} in record {}",
            spec.format, header.name
        )));
    }

    let dat_path = match base_path.parent() {
        Some(dir) => dir.join(&spec.file_name),
        None => PathBuf::from(&spec.file_name),
    };
    let bytes = std::fs::read(&dat_path).map_err(|e| not_found(&dat_path, e))?;

    let frame_size = 2 * header.channels;
    let frames_available = bytes.len() / frame_size;
    if header.samples > 0 && frames_available < header.samples {
        return Err(malformed(format!(
            "record {} states {} samples but {} holds only {}",
            header.name,
            header.samples,
            spec.file_name,
            frames_available
        )));
    }

    let n = if header.samples > 0 {
        header.samples
    } else {
        frames_available
    };
    if n == 0 {
        return Err(malformed(format!("record {} has an empty signal", header.name)));
    }

    let mut signal = Vec::with_capacity(n);
    for frame in bytes.chunks_exact(frame_size).take(n) {
        let adc = i16::from_le_bytes([frame[0], frame[1]]) as f64;
        signal.push((adc - spec.baseline) / spec.gain);
    }

    Ok(signal)
}

/// Maps an annotation type code to its mnemonic symbol.
fn symbol_for_code(code: u8) -> Option<char> {
    Some(match code {
        1 => 'N',
        2 => 'L',
        3 => 'R',
        4 => 'a',
        5 => 'V',
        6 => 'F',
        7 => 'J',
        8 => 'A',
        9 => 'S',
        10 => 'E',
        11 => 'j',
        12 => '/',
        13 => 'Q',
        14 => '~',
        16 => '|',
        18 => 's',
        19 => 'T',
        20 => '*',
        21 => 'D',
        22 => '"',
        23 => '=',
        24 => 'p',
        25 => 'B',
        26 => '^',
        27 => 't',
        28 => '+',
        29 => 'u',
        30 => '?',
        31 => '!',
        32 => '[',
        33 => ']',
        34 => 'e',
        35 => 'n',
        36 => '@',
        37 => 'x',
        38 => 'f',
        39 => '(',
        40 => ')',
        41 => 'r',
        _ => return None,
    })
}

/// Reads an MIT-format annotation file.
///
/// Each annotation is a 16-bit little-endian word: the high 6 bits are the
/// type code and the low 10 bits the sample delta from the previous event.
/// SKIP extends the delta by a 4-byte interval (high word first); NUM, SUB,
/// and CHN modify fields this crate does not track; AUX carries a skipped
/// free-text payload padded to even length.
pub fn read_annotations(path: &Path) -> Result<AnnotationSet> {
    let bytes = std::fs::read(path).map_err(|e| not_found(path, e))?;

    let mut annotations = AnnotationSet::default();
    let mut time: i64 = 0;
    let mut pos = 0usize;

    while pos + 1 < bytes.len() {
        let word = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]);
        pos += 2;

        if word == 0 {
            break;
        }

        let code = (word >> 10) as u8;
        let delta = (word & 0x03ff) as i64;

        match code {
            CODE_SKIP => {
                if pos + 3 >= bytes.len() {
                    return Err(malformed("truncated SKIP interval in annotations"));
                }
                let high = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]) as u32;
                let low = u16::from_le_bytes([bytes[pos + 2], bytes[pos + 3]]) as u32;
                pos += 4;
                let interval = ((high << 16) | low) as i32 as i64;
                time += interval;
                if time < 0 {
                    return Err(malformed("annotation timeline moves backwards"));
                }
            }
            CODE_NUM | CODE_SUB | CODE_CHN => {
                trace!("ignoring annotation field modifier code {code}");
            }
            CODE_AUX => {
                let skip = (delta + (delta & 1)) as usize;
                if pos + skip > bytes.len() {
                    return Err(malformed("truncated AUX payload in annotations"));
                }
                pos += skip;
            }
            _ => {
                time += delta;
                if let Some(&prev) = annotations.samples.last() {
                    if (time as usize) < prev {
                        return Err(malformed("annotation timeline moves backwards"));
                    }
                }
                match symbol_for_code(code) {
                    Some(symbol) => {
                        annotations.samples.push(time as usize);
                        annotations.symbols.push(symbol);
                    }
                    None => {
                        debug!("skipping unknown annotation code {code} at sample {time}");
                    }
                }
            }
        }
    }

    debug!(
        "read {} annotations from {}",
        annotations.len(),
        path.display()
    );

    Ok(annotations)
}

/// Loads, validates, and cleans one patient/segment recording.
///
/// Reads the record and annotation pair at the conventional path, checks that
/// every annotated event falls inside the signal, and high-pass filters the
/// primary channel to remove baseline wander.
pub fn load_ecg(data_path: &Path, patient_id: u32, segment_id: u32) -> Result<LoadedEcg> {
    let base = record_base_path(data_path, patient_id, segment_id);

    let header = read_header(&base.with_extension("hea"))?;
    let raw = read_signal(&header, &base)?;
    let annotations = read_annotations(&base.with_extension("atr"))?;

    if let Some(&last) = annotations.samples.last() {
        if last >= raw.len() {
            return Err(malformed(format!(
                "annotation at sample {} exceeds signal length {}",
                last,
                raw.len()
            )));
        }
    }

    debug!(
        "loaded record {}: {} samples at {} Hz, {} annotations",
        header.name,
        raw.len(),
        header.fs,
        annotations.len()
    );

    let clean = remove_baseline_wander(&raw, header.fs as f64, BASELINE_CUTOFF_HZ);

    Ok(LoadedEcg {
        clean,
        annotations,
        fs: header.fs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_follows_record_layout() {
        let base = record_base_path(Path::new("/data/waves"), 123, 2);
        assert_eq!(
            base,
            Path::new("/data/waves/p00/p00123/p00123_s02")
        );

        let base = record_base_path(Path::new("/data/waves"), 87231, 14);
        assert_eq!(
            base,
            Path::new("/data/waves/p08/p87231/p87231_s14")
        );
    }

    #[test]
    fn symbol_table_covers_beat_and_marker_codes() {
        assert_eq!(symbol_for_code(1), Some('N'));
        assert_eq!(symbol_for_code(5), Some('V'));
        assert_eq!(symbol_for_code(13), Some('Q'));
        assert_eq!(symbol_for_code(28), Some('+'));
        assert_eq!(symbol_for_code(0), None);
        assert_eq!(symbol_for_code(50), None);
    }

    #[test]
    fn gain_spec_variants_parse() {
        assert_eq!(
            parse_gain_spec("200(12)/mV").unwrap(),
            (200.0, 12.0, "mV".to_string())
        );
        assert_eq!(
            parse_gain_spec("1024/uV").unwrap(),
            (1024.0, 0.0, "uV".to_string())
        );
        assert_eq!(parse_gain_spec("500").unwrap(), (500.0, 0.0, String::new()));
        // Zero gain falls back to the calibration default.
        assert_eq!(
            parse_gain_spec("0/mV").unwrap(),
            (DEFAULT_GAIN, 0.0, "mV".to_string())
        );
        assert!(parse_gain_spec("abc").is_err());
    }

    #[test]
    fn header_with_zero_channels_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p00001_s01.hea");
        std::fs::write(&path, "p00001_s01 0 250 1000\n").unwrap();

        let err = read_header(&path).unwrap_err();
        assert!(matches!(err, EcgError::MalformedRecord(_)), "{err}");
    }

    #[test]
    fn header_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p00001_s01.hea");
        std::fs::write(
            &path,
            "# comment line\n\
             p00001_s01 2 250 2500\n\
             p00001_s01.dat 16 200(0)/mV 16 0 12 345 0 II\n\
             p00001_s01.dat 16 200/mV 16 0 -4 346 0 V\n",
        )
        .unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!(header.name, "p00001_s01");
        assert_eq!(header.channels, 2);
        assert_eq!(header.fs, 250);
        assert_eq!(header.samples, 2500);
        assert_eq!(header.signals.len(), 2);
        assert_eq!(header.signals[0].format, 16);
        assert_eq!(header.signals[0].gain, 200.0);
        assert_eq!(header.signals[0].description, "II");
    }

    #[test]
    fn missing_header_is_data_not_found() {
        let err = read_header(Path::new("/nonexistent/p00001_s01.hea")).unwrap_err();
        assert!(matches!(err, EcgError::DataNotFound { .. }), "{err}");
    }

    #[test]
    fn signal_reads_first_channel_in_physical_units() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("p00001_s01");

        // Two channels, three frames; channel 0 carries 100, 300, -200 adu.
        let mut bytes = Vec::new();
        for (ch0, ch1) in [(100i16, 1i16), (300, 2), (-200, 3)] {
            bytes.extend_from_slice(&ch0.to_le_bytes());
            bytes.extend_from_slice(&ch1.to_le_bytes());
        }
        std::fs::write(base.with_extension("dat"), &bytes).unwrap();

        let header = RecordHeader {
            name: "p00001_s01".into(),
            channels: 2,
            fs: 250,
            samples: 3,
            signals: vec![
                SignalSpec {
                    file_name: "p00001_s01.dat".into(),
                    format: 16,
                    gain: 200.0,
                    baseline: 0.0,
                    units: "mV".into(),
                    description: "II".into(),
                },
                SignalSpec {
                    file_name: "p00001_s01.dat".into(),
                    format: 16,
                    gain: 200.0,
                    baseline: 0.0,
                    units: "mV".into(),
                    description: "V".into(),
                },
            ],
        };

        let signal = read_signal(&header, &base).unwrap();
        assert_eq!(signal, vec![0.5, 1.5, -1.0]);
    }

    #[test]
    fn stated_samples_beyond_file_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("p00001_s01");
        std::fs::write(base.with_extension("dat"), [0u8; 8]).unwrap();

        let header = RecordHeader {
            name: "p00001_s01".into(),
            channels: 1,
            fs: 250,
            samples: 100,
            signals: vec![SignalSpec {
                file_name: "p00001_s01.dat".into(),
                format: 16,
                gain: 200.0,
                baseline: 0.0,
                units: "mV".into(),
                description: "II".into(),
            }],
        };

        let err = read_signal(&header, &base).unwrap_err();
        assert!(matches!(err, EcgError::MalformedRecord(_)), "{err}");
    }

    #[test]
    fn annotations_accumulate_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p00001_s01.atr");

        // N at 100, Q at 150, + at 160, V at 500, EOF.
        let mut bytes = Vec::new();
        for (code, delta) in [(1u16, 100u16), (13, 50), (28, 10), (5, 340)] {
            bytes.extend_from_slice(&((code << 10) | delta).to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let ann = read_annotations(&path).unwrap();
        assert_eq!(ann.samples, vec![100, 150, 160, 500]);
        assert_eq!(ann.symbols, vec!['N', 'Q', '+', 'V']);
    }

    #[test]
    fn skip_and_aux_words_are_honored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p00001_s01.atr");

        let mut bytes = Vec::new();
        // N at 10.
        bytes.extend_from_slice(&((1u16 << 10) | 10).to_le_bytes());
        // SKIP forward by 70000 samples (needs the 4-byte interval).
        bytes.extend_from_slice(&((CODE_SKIP as u16) << 10).to_le_bytes());
        let interval: i32 = 70_000;
        let high = ((interval as u32) >> 16) as u16;
        let low = (interval as u32 & 0xffff) as u16;
        bytes.extend_from_slice(&high.to_le_bytes());
        bytes.extend_from_slice(&low.to_le_bytes());
        // N 5 samples later.
        bytes.extend_from_slice(&((1u16 << 10) | 5).to_le_bytes());
        // AUX with a 3-byte payload, padded to 4.
        bytes.extend_from_slice(&(((CODE_AUX as u16) << 10) | 3).to_le_bytes());
        bytes.extend_from_slice(b"abc\0");
        // V 7 samples later, then EOF.
        bytes.extend_from_slice(&((5u16 << 10) | 7).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let ann = read_annotations(&path).unwrap();
        assert_eq!(ann.samples, vec![10, 70_015, 70_022]);
        assert_eq!(ann.symbols, vec!['N', 'N', 'V']);
    }

    #[test]
    fn rewinding_skip_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p00001_s01.atr");

        let mut bytes = Vec::new();
        // N at 1000 (via SKIP, the delta field only holds 10 bits).
        bytes.extend_from_slice(&((CODE_SKIP as u16) << 10).to_le_bytes());
        let forward: i32 = 1000;
        bytes.extend_from_slice(&(((forward as u32) >> 16) as u16).to_le_bytes());
        bytes.extend_from_slice(&((forward as u32 & 0xffff) as u16).to_le_bytes());
        bytes.extend_from_slice(&(1u16 << 10).to_le_bytes());
        // SKIP back by 900, then N 5 samples later: sample 105 after 1000.
        bytes.extend_from_slice(&((CODE_SKIP as u16) << 10).to_le_bytes());
        let rewind: i32 = -900;
        bytes.extend_from_slice(&(((rewind as u32) >> 16) as u16).to_le_bytes());
        bytes.extend_from_slice(&((rewind as u32 & 0xffff) as u16).to_le_bytes());
        bytes.extend_from_slice(&((1u16 << 10) | 5).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = read_annotations(&path).unwrap_err();
        assert!(matches!(err, EcgError::MalformedRecord(_)), "{err}");
    }

    #[test]
    fn loaded_ecg_views_align_with_annotations() {
        let loaded = LoadedEcg {
            clean: vec![0.0; 600],
            annotations: AnnotationSet {
                samples: vec![100, 300, 500],
                symbols: vec!['N', 'V', 'N'],
            },
            fs: 250,
        };

        assert_eq!(loaded.peaks(), &[100, 300, 500]);
        assert_eq!(loaded.labels(), &['N', 'V', 'N']);
        assert_eq!(loaded.peaks().len(), loaded.labels().len());
    }
}
