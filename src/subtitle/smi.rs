//! SAMI (`.smi`) parser (spec §4.2 "SMI").
//!
//! HTML-like; cues are introduced by `<SYNC Start=N>`, and a cue's text runs
//! until the next `<SYNC>` tag or end of file. `end_ms` is the next cue's
//! `start_ms` minus 1, or `start_ms + 5000` for the final cue.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Cue, SubtitleParser};
use crate::error::Result;

static SYNC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<SYNC\s+Start\s*=\s*(\d+)[^>]*>").expect("valid SYNC regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<[^>]+>").expect("valid tag regex"));
static BR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<BR\s*/?>").expect("valid BR regex"));

const FINAL_CUE_TAIL_MS: i64 = 5000;

pub struct SmiParser;

impl SubtitleParser for SmiParser {
    fn parse(&self, text: &str) -> Result<Vec<Cue>> {
        let matches: Vec<_> = SYNC_RE.find_iter(text).collect();
        let starts: Vec<i64> = SYNC_RE
            .captures_iter(text)
            .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse().ok()))
            .collect();

        let mut cues = Vec::with_capacity(matches.len());
        for (i, m) in matches.iter().enumerate() {
            let body_start = m.end();
            let body_end = matches.get(i + 1).map(|next| next.start()).unwrap_or(text.len());
            let raw_body = &text[body_start..body_end];
            let content = strip_sami_tags(raw_body);
            if content.is_empty() {
                continue;
            }

            let start_ms = starts[i];
            let end_ms = match starts.get(i + 1) {
                Some(next_start) => (*next_start - 1).max(start_ms + 1),
                None => start_ms + FINAL_CUE_TAIL_MS,
            };

            cues.push(Cue {
                start_ms,
                end_ms,
                content,
            });
        }

        Ok(cues)
    }
}

/// Strip `<BR>`, `<P>`, `<FONT …>` and similar markup, converting `<BR>` to
/// a newline so multi-line cues survive.
fn strip_sami_tags(raw: &str) -> String {
    let with_breaks = BR_RE.replace_all(raw, "\n").to_string();
    let stripped = TAG_RE.replace_all(&with_breaks, "");
    stripped
        .replace("&nbsp;", " ")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_cues_default_tail() {
        let text = "<SYNC Start=5000><P>One\n<SYNC Start=9000><P>Two";
        let cues = SmiParser.parse(text).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_ms, 5000);
        assert_eq!(cues[0].end_ms, 8999);
        assert_eq!(cues[0].content, "One");
        assert_eq!(cues[1].start_ms, 9000);
        assert_eq!(cues[1].end_ms, 14000);
        assert_eq!(cues[1].content, "Two");
    }

    #[test]
    fn strips_font_and_br_tags() {
        let text = "<SYNC Start=1000><P><FONT color=\"white\">Hello<BR>World</FONT>";
        let cues = SmiParser.parse(text).unwrap();
        assert_eq!(cues[0].content, "Hello\nWorld");
    }

    #[test]
    fn empty_cue_bodies_are_dropped() {
        let text = "<SYNC Start=1000><P>&nbsp;\n<SYNC Start=2000><P>Real text";
        let cues = SmiParser.parse(text).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].content, "Real text");
    }
}
