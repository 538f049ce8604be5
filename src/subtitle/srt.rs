//! SubRip (`.srt`) parser (spec §4.2 "SRT").
//!
//! Blocks separated by blank lines; first non-empty line is an index and is
//! ignored; second line is the `HH:MM:SS,mmm --> HH:MM:SS,mmm` timing line
//! (tolerant of `.` instead of `,`); the remainder is cue text. Tolerant of
//! extra whitespace and a missing trailing blank line.
//!
//! Grounded on `jim60105-subx-cli`'s `core/formats/srt.rs` block-splitting
//! and `Regex`-based timing capture.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Cue, SubtitleParser};
use crate::error::{LibrarianError, Result};

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})")
        .expect("valid SRT timing regex")
});

pub struct SrtParser;

impl SubtitleParser for SrtParser {
    fn parse(&self, text: &str) -> Result<Vec<Cue>> {
        let mut cues = Vec::new();
        let mut line_no = 0usize;

        // Split on blank-line separators; tolerant of CRLF already being
        // normalized to LF by the encoding detector and of a missing
        // trailing blank line at EOF.
        for block in text.split("\n\n") {
            let lines: Vec<&str> = block.lines().map(str::trim_end).collect();
            line_no += lines.len() + 1;
            if lines.is_empty() {
                continue;
            }

            // Skip leading blank lines within a block (tolerance for stray whitespace).
            let mut idx = 0;
            while idx < lines.len() && lines[idx].trim().is_empty() {
                idx += 1;
            }
            if idx >= lines.len() {
                continue;
            }
            // lines[idx] is the index line — ignored per spec.
            idx += 1;
            if idx >= lines.len() {
                continue;
            }

            let Some(caps) = TIME_RE.captures(lines[idx]) else {
                continue;
            };
            let start_ms = to_ms(&caps, 1);
            let end_ms = to_ms(&caps, 5);
            idx += 1;

            let content = lines[idx..].join("\n").trim().to_string();
            if content.is_empty() {
                continue;
            }

            cues.push(Cue {
                start_ms,
                end_ms,
                content,
            });
        }

        if cues.is_empty() && !text.trim().is_empty() && !text.contains("-->") {
            return Err(LibrarianError::Parse {
                line: line_no,
                message: "no SRT timing lines found".into(),
            });
        }

        Ok(cues)
    }
}

fn to_ms(caps: &regex::Captures, group: usize) -> i64 {
    let h: i64 = caps[group].parse().unwrap_or(0);
    let m: i64 = caps[group + 1].parse().unwrap_or(0);
    let s: i64 = caps[group + 2].parse().unwrap_or(0);
    let ms_str = &caps[group + 3];
    let ms: i64 = format!("{:0<3}", ms_str)[..3].parse().unwrap_or(0);
    h * 3_600_000 + m * 60_000 + s * 1_000 + ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_block() {
        let text = "1\n00:00:01,000 --> 00:00:02,500\nHello world\n\n2\n00:00:05,000 --> 00:00:06,000\nSecond cue\n";
        let cues = SrtParser.parse(text).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_ms, 1000);
        assert_eq!(cues[0].end_ms, 2500);
        assert_eq!(cues[0].content, "Hello world");
        assert_eq!(cues[1].content, "Second cue");
    }

    #[test]
    fn tolerates_dot_separator() {
        let text = "1\n00:00:01.000 --> 00:00:02.500\nHi\n";
        let cues = SrtParser.parse(text).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].end_ms, 2500);
    }

    #[test]
    fn tolerates_missing_trailing_blank_line() {
        let text = "1\n00:00:01,000 --> 00:00:02,000\nNo trailing blank";
        let cues = SrtParser.parse(text).unwrap();
        assert_eq!(cues.len(), 1);
    }

    #[test]
    fn preserves_multiline_text() {
        let text = "1\n00:00:01,000 --> 00:00:02,000\nLine one\nLine two\n";
        let cues = SrtParser.parse(text).unwrap();
        assert_eq!(cues[0].content, "Line one\nLine two");
    }

    #[test]
    fn empty_input_yields_no_cues() {
        assert_eq!(SrtParser.parse("").unwrap(), vec![]);
    }
}
