//! Encoding and delimiter detection for text sources.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

use super::reader::IngestError;

/// How many bytes of the file head feed the encoding probe.
pub const ENCODING_SAMPLE: usize = 64 * 1024;

/// Delimiter candidates, in vote-tie order.
pub const DELIMITER_CANDIDATES: [char; 4] = [',', ';', '\t', '|'];

/// How many non-empty lines feed the delimiter vote.
pub const DELIMITER_PROBE_LINES: usize = 5;

/// A user-supplied label wins (or fails loudly); otherwise sample-sniff.
pub fn resolve_encoding(
    label: Option<&str>,
    sample: &[u8],
) -> Result<&'static Encoding, IngestError> {
    match label {
        Some(label) => Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| IngestError::Config(format!("unknown encoding: {:?}", label))),
        None => Ok(detect_encoding(sample)),
    }
}

/// BOM first, then utf-8 validation over the sample, then the 1252
/// superset fallback for arbitrary single-byte data.
pub fn detect_encoding(sample: &[u8]) -> &'static Encoding {
    if let Some((encoding, _bom_len)) = Encoding::for_bom(sample) {
        return encoding;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => UTF_8,
        // a multi-byte sequence cut off by the sample boundary is still utf-8
        Err(err) if err.error_len().is_none() => UTF_8,
        Err(_) => WINDOWS_1252,
    }
}

/// Frequency vote over the probe lines: the winning candidate appears at
/// least once on every line, with the highest per-line minimum. Returns
/// `None` when no candidate appears consistently.
pub fn detect_delimiter(lines: &[String]) -> Option<char> {
    let mut best: Option<(char, usize)> = None;
    for candidate in DELIMITER_CANDIDATES {
        let score = lines
            .iter()
            .map(|line| line.chars().filter(|c| *c == candidate).count())
            .min()
            .unwrap_or(0);
        if score > 0 && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((candidate, score));
        }
    }
    best.map(|(c, _)| c)
}
