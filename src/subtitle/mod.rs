//! Subtitle Parser (spec §4.2, component C2).
//!
//! Three sibling parsers behind one [`SubtitleParser`] trait, dispatched by
//! file extension, grounded in `jim60105-subx-cli`'s `core/formats/{srt,ass}.rs`
//! regex-based line scanning. Shared post-processing (whitespace collapse,
//! tag stripping, corrupt-duration clamping) lives in [`postprocess`] and is
//! applied uniformly after per-format cue extraction.

pub mod ass;
pub mod postprocess;
pub mod smi;
pub mod srt;

use crate::error::{LibrarianError, Result};

/// One timed text segment, `(start_ms, end_ms, content)` (glossary "Cue").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub start_ms: i64,
    pub end_ms: i64,
    pub content: String,
}

/// A parser for one subtitle container format.
pub trait SubtitleParser {
    /// Parse raw (already-decoded) subtitle text into an ordered cue sequence.
    fn parse(&self, text: &str) -> Result<Vec<Cue>>;
}

/// Dispatch to the right parser by file extension and run the shared
/// post-processing pipeline (spec §4.2 "Common post-processing").
pub fn parse_track(extension: &str, text: &str) -> Result<Vec<Cue>> {
    let raw = match extension.to_ascii_lowercase().as_str() {
        "srt" => srt::SrtParser.parse(text)?,
        "smi" | "sami" => smi::SmiParser.parse(text)?,
        "ass" | "ssa" => ass::AssParser.parse(text)?,
        other => {
            return Err(LibrarianError::Parse {
                line: 0,
                message: format!("unsupported subtitle format: {other}"),
            });
        }
    };
    Ok(postprocess::postprocess(raw))
}
