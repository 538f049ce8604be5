//! Shared post-processing applied uniformly after per-format cue extraction
//! (spec §4.2 "Common post-processing").
//!
//! Collapses consecutive whitespace to one space within a line (newlines
//! between lines of a cue are preserved), discards cues with empty text or
//! `end_ms <= start_ms`, and clamps obviously-corrupt durations (> 60s) to
//! `start_ms + 10_000`, logging a warning for each clamp.

use once_cell::sync::Lazy;
use regex::Regex;

use super::Cue;

const MAX_PLAUSIBLE_DURATION_MS: i64 = 60_000;
const CLAMPED_DURATION_MS: i64 = 10_000;

static INTRA_LINE_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("valid whitespace regex"));

pub fn postprocess(cues: Vec<Cue>) -> Vec<Cue> {
    cues.into_iter().filter_map(postprocess_one).collect()
}

fn postprocess_one(mut cue: Cue) -> Option<Cue> {
    cue.content = collapse_whitespace(&cue.content);
    if cue.content.is_empty() || cue.end_ms <= cue.start_ms {
        return None;
    }

    if cue.end_ms - cue.start_ms > MAX_PLAUSIBLE_DURATION_MS {
        tracing::warn!(
            start_ms = cue.start_ms,
            original_end_ms = cue.end_ms,
            "clamping corrupt subtitle duration"
        );
        cue.end_ms = cue.start_ms + CLAMPED_DURATION_MS;
    }

    Some(cue)
}

fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| INTRA_LINE_WHITESPACE.replace_all(line.trim(), " ").to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(start: i64, end: i64, content: &str) -> Cue {
        Cue {
            start_ms: start,
            end_ms: end,
            content: content.to_string(),
        }
    }

    #[test]
    fn collapses_repeated_spaces_but_keeps_newlines() {
        let cues = postprocess(vec![cue(0, 1000, "Hello    world\nSecond   line")]);
        assert_eq!(cues[0].content, "Hello world\nSecond line");
    }

    #[test]
    fn discards_empty_content() {
        let cues = postprocess(vec![cue(0, 1000, "   ")]);
        assert!(cues.is_empty());
    }

    #[test]
    fn discards_non_positive_duration() {
        let cues = postprocess(vec![cue(1000, 1000, "text"), cue(2000, 1500, "text")]);
        assert!(cues.is_empty());
    }

    #[test]
    fn clamps_corrupt_durations() {
        let cues = postprocess(vec![cue(0, 120_000, "too long")]);
        assert_eq!(cues[0].end_ms, 10_000);
    }

    #[test]
    fn keeps_normal_cues_untouched() {
        let cues = postprocess(vec![cue(1000, 2500, "fine")]);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].end_ms, 2500);
    }
}
