//! Encoding Detector (spec §4.1, component C1).
//!
//! Reads a sample of a subtitle file, checks for a BOM, falls back to a
//! statistical detector (`chardetng`) over a fixed candidate set, and
//! decodes the full file with the winning label — retrying with CP1252,
//! then ISO-8859-1, then finally lossy UTF-8 if nothing decodes cleanly.
//!
//! Grounded on `jim60105-subx-cli`'s `core/formats/encoding/detector.rs`
//! BOM-then-statistical-then-decode pipeline shape, rebuilt here on top of
//! `encoding_rs`/`chardetng` (the crates that detector's own author ships)
//! instead of hand-rolled byte-pattern heuristics.

use std::path::Path;

use encoding_rs::Encoding;

use crate::error::{LibrarianError, Result};

const SAMPLE_SIZE: usize = 64 * 1024;
const CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Outcome of decoding a subtitle file: the resulting UTF-8 text plus the
/// label of the encoding that was actually used.
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding_label: &'static str,
    /// Set when no candidate cleared the confidence bar and this crate fell
    /// through to permissive UTF-8-with-replacement (spec §4.1 failure mode
    /// `NoConfidentEncoding`).
    pub lossy: bool,
}

pub struct EncodingDetector {
    confidence_threshold: f32,
}

impl Default for EncodingDetector {
    fn default() -> Self {
        Self {
            confidence_threshold: CONFIDENCE_THRESHOLD,
        }
    }
}

impl EncodingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confidence_threshold(threshold: f32) -> Self {
        Self {
            confidence_threshold: threshold,
        }
    }

    /// Detect and decode a subtitle file per the §4.1 algorithm.
    pub fn decode_file(&self, path: &Path) -> Result<DecodedText> {
        let bytes = std::fs::read(path).map_err(LibrarianError::Io)?;
        self.decode_bytes(&bytes)
    }

    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<DecodedText> {
        if bytes.is_empty() {
            return Ok(DecodedText {
                text: String::new(),
                encoding_label: encoding_rs::UTF_8.name(),
                lossy: false,
            });
        }

        let sample_len = bytes.len().min(SAMPLE_SIZE);
        let sample = &bytes[..sample_len];

        let (decoded, encoding_label, lossy) = if let Some(encoding) = detect_bom(bytes) {
            decode_with(encoding, bytes)
        } else if let Some(encoding) = self.statistical_candidate(sample) {
            decode_with(encoding, bytes)
        } else {
            // NoConfidentEncoding: fall through to permissive UTF-8-with-replacement.
            let (text, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
            (text.into_owned(), encoding_rs::UTF_8.name(), had_errors)
        };

        let mut text = decoded.replace("\r\n", "\n").replace('\r', "\n");
        if let Some(stripped) = text.strip_prefix('\u{feff}') {
            text = stripped.to_string();
        }

        Ok(DecodedText {
            text,
            encoding_label,
            lossy,
        })
    }

    /// Run `chardetng` over the sample and accept the guess only if it
    /// clears the confidence bar (spec §4.1 step 3). `chardetng` doesn't
    /// expose a numeric confidence the way some chardet ports do; this
    /// normalizes its guess into the binary "confident enough" signal by
    /// cross-checking a decode of the sample for replacement characters:
    /// `guess.decode` never fails outright (it's replacement-lossy by
    /// construction), so the ratio of replacement characters it actually
    /// produced is what the threshold gates on.
    fn statistical_candidate(&self, sample: &[u8]) -> Option<&'static Encoding> {
        let mut detector = chardetng::EncodingDetector::new();
        detector.feed(sample, true);
        let guess = detector.guess(None, true);

        let (decoded, _, _had_errors) = guess.decode(sample);
        let replacement_ratio = decoded
            .chars()
            .filter(|c| *c == '\u{fffd}')
            .count() as f32
            / decoded.chars().count().max(1) as f32;
        if replacement_ratio > (1.0 - self.confidence_threshold) {
            return None;
        }
        Some(guess)
    }
}

fn detect_bom(bytes: &[u8]) -> Option<&'static Encoding> {
    Encoding::for_bom(bytes).map(|(enc, _len)| enc)
}

/// Decode `bytes` with `encoding`; on decode error retry CP1252, then
/// ISO-8859-1, then finally UTF-8 with replacement characters (spec §4.1
/// step 4). `encoding_rs` decodes are never fatal (they're replacement-char
/// lossy by construction), so "retry" here means re-running with a
/// different label whenever the first attempt produced any replacements.
/// Returns the label of whichever encoding actually produced the text.
fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> (String, &'static str, bool) {
    let (text, _, had_errors) = encoding.decode(bytes);
    if !had_errors {
        return (text.into_owned(), encoding.name(), false);
    }
    let (cp1252, _, cp1252_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
    if !cp1252_errors {
        return (cp1252.into_owned(), encoding_rs::WINDOWS_1252.name(), false);
    }
    let iso_8859_1 = Encoding::for_label(b"iso-8859-1").unwrap_or(encoding_rs::WINDOWS_1252);
    let (latin1, _, latin1_errors) = iso_8859_1.decode(bytes);
    if !latin1_errors {
        return (latin1.into_owned(), iso_8859_1.name(), false);
    }
    let (utf8, _, _) = encoding_rs::UTF_8.decode(bytes);
    (utf8.into_owned(), encoding_rs::UTF_8.name(), true)
}
