//! Advanced SubStation Alpha (`.ass`/`.ssa`) parser (spec §4.2 "ASS/SSA").
//!
//! Parses the `[Events]` section; for each `Dialogue:` line, reads `Start`,
//! `End`, and `Text` according to that section's `Format:` line (column
//! order is not fixed in the format), and strips `{\…}` override blocks.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Cue, SubtitleParser};
use crate::error::Result;

static OVERRIDE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^}]*\}").expect("valid override regex"));

const DEFAULT_FORMAT: &[&str] = &[
    "Layer", "Start", "End", "Style", "Name", "MarginL", "MarginR", "MarginV", "Effect", "Text",
];

pub struct AssParser;

impl SubtitleParser for AssParser {
    fn parse(&self, text: &str) -> Result<Vec<Cue>> {
        let mut cues = Vec::new();
        let mut in_events = false;
        let mut format: Vec<String> = DEFAULT_FORMAT.iter().map(|s| s.to_string()).collect();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.eq_ignore_ascii_case("[Events]") {
                in_events = true;
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                in_events = false;
                continue;
            }
            if !in_events {
                continue;
            }

            if let Some(rest) = strip_prefix_ci(trimmed, "Format:") {
                format = rest.split(',').map(|s| s.trim().to_string()).collect();
                continue;
            }

            let Some(rest) = strip_prefix_ci(trimmed, "Dialogue:") else {
                continue;
            };

            let fields = split_dialogue_fields(rest, format.len());
            let Some(start_idx) = format.iter().position(|f| f.eq_ignore_ascii_case("Start")) else {
                continue;
            };
            let Some(end_idx) = format.iter().position(|f| f.eq_ignore_ascii_case("End")) else {
                continue;
            };
            let Some(text_idx) = format.iter().position(|f| f.eq_ignore_ascii_case("Text")) else {
                continue;
            };

            let (Some(start_raw), Some(end_raw), Some(text_raw)) = (
                fields.get(start_idx),
                fields.get(end_idx),
                fields.get(text_idx),
            ) else {
                continue;
            };

            let (Some(start_ms), Some(end_ms)) = (parse_ass_time(start_raw), parse_ass_time(end_raw))
            else {
                continue;
            };

            let content = strip_ass_markup(text_raw);
            if content.is_empty() {
                continue;
            }

            cues.push(Cue {
                start_ms,
                end_ms,
                content,
            });
        }

        Ok(cues)
    }
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(line[prefix.len()..].trim_start())
    } else {
        None
    }
}

/// The `Text` field may itself contain commas, so split only up to
/// `field_count - 1` times, matching the ASS spec's "last field greedy" rule.
fn split_dialogue_fields(rest: &str, field_count: usize) -> Vec<String> {
    if field_count == 0 {
        return vec![rest.to_string()];
    }
    rest.splitn(field_count, ',').map(|s| s.trim().to_string()).collect()
}

/// ASS timestamps are `H:MM:SS.cc` (centiseconds).
fn parse_ass_time(raw: &str) -> Option<i64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let h: i64 = parts[0].parse().ok()?;
    let m: i64 = parts[1].parse().ok()?;
    let sec_parts: Vec<&str> = parts[2].split('.').collect();
    let s: i64 = sec_parts.first()?.parse().ok()?;
    let cs: i64 = sec_parts.get(1).and_then(|c| c.parse().ok()).unwrap_or(0);
    Some(h * 3_600_000 + m * 60_000 + s * 1_000 + cs * 10)
}

fn strip_ass_markup(raw: &str) -> String {
    let without_overrides = OVERRIDE_RE.replace_all(raw, "");
    without_overrides
        .replace("\\N", "\n")
        .replace("\\n", "\n")
        .replace("\\h", " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "[Script Info]\nTitle: test\n\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\nDialogue: 0,0:00:01.00,0:00:02.50,Default,,0,0,0,,Hello {\\b1}world{\\b0}\n";

    #[test]
    fn parses_dialogue_with_override_blocks() {
        let cues = AssParser.parse(SAMPLE).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].start_ms, 1000);
        assert_eq!(cues[0].end_ms, 2500);
        assert_eq!(cues[0].content, "Hello world");
    }

    #[test]
    fn handles_reordered_format_columns() {
        let text = "[Events]\nFormat: Start, End, Text\nDialogue: 0:00:05.00,0:00:06.00,Reordered\n";
        let cues = AssParser.parse(text).unwrap();
        assert_eq!(cues[0].start_ms, 5000);
        assert_eq!(cues[0].content, "Reordered");
    }

    #[test]
    fn converts_line_break_escapes() {
        let text = "[Events]\nFormat: Start, End, Text\nDialogue: 0:00:01.00,0:00:02.00,Line one\\NLine two\n";
        let cues = AssParser.parse(text).unwrap();
        assert_eq!(cues[0].content, "Line one\nLine two");
    }

    #[test]
    fn ignores_lines_outside_events_section() {
        let text = "[Script Info]\nDialogue: 0:00:01.00,0:00:02.00,Should not parse\n";
        let cues = AssParser.parse(text).unwrap();
        assert!(cues.is_empty());
    }
}
