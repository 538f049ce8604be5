//! Language Classifier (spec §4.3, component C3).
//!
//! Computes the ASCII-letter ratio over concatenated cue text to decide
//! *admission* (is this track English enough to index), and separately runs
//! `whatlang` over a sample to *label* the `lang` field. Per the Open
//! Questions section of spec.md, the ratio governs admission; the detector
//! only labels — a Korean-detected track with a high ASCII ratio is still
//! admitted, just tagged `ko`.

const SAMPLE_CHARS: usize = 2000;

/// Outcome of classifying one track's concatenated cue text.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageVerdict {
    /// ISO-639-1 tag, or `"unknown"` if no confident detection was made.
    pub lang: String,
    /// ASCII-letter ratio over all letter-class bytes.
    pub ascii_ratio: f64,
    /// Whether the ratio cleared `min_english_ratio` — governs admission.
    pub is_english_enough: bool,
}

pub fn classify(concatenated_text: &str, min_english_ratio: f64) -> LanguageVerdict {
    let ascii_ratio = ascii_letter_ratio(concatenated_text);
    let is_english_enough = ascii_ratio >= min_english_ratio;

    let sample: String = concatenated_text.chars().take(SAMPLE_CHARS).collect();
    let lang = whatlang::detect(&sample)
        .filter(|info| info.is_reliable())
        .map(|info| info.lang().code().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    LanguageVerdict {
        lang,
        ascii_ratio,
        is_english_enough,
    }
}

/// `R = (ASCII-letter bytes) / (total letter-class bytes)` per spec §4.3.
fn ascii_letter_ratio(text: &str) -> f64 {
    let mut ascii_letters = 0u64;
    let mut all_letters = 0u64;
    for c in text.chars() {
        if c.is_alphabetic() {
            all_letters += 1;
            if c.is_ascii_alphabetic() {
                ascii_letters += 1;
            }
        }
    }
    if all_letters == 0 {
        // No letters at all (e.g. pure punctuation/numbers): treat as
        // vacuously English-admissible rather than rejecting a track with
        // no text to judge.
        return 1.0;
    }
    ascii_letters as f64 / all_letters as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_english_is_admitted() {
        let verdict = classify("Hello world, how are you today?", 0.6);
        assert!(verdict.is_english_enough);
        assert_eq!(verdict.ascii_ratio, 1.0);
    }

    #[test]
    fn pure_korean_is_rejected_by_default_ratio() {
        let verdict = classify("안녕하세요 반갑습니다 오늘도 좋은 하루", 0.6);
        assert!(!verdict.is_english_enough);
        assert_eq!(verdict.ascii_ratio, 0.0);
    }

    #[test]
    fn ratio_governs_admission_even_when_detector_disagrees() {
        // Mostly-ASCII text padded with a little non-Latin noise: ratio test
        // should still admit it even if the detector's label differs.
        let text = "Hello world this is an English subtitle track 안";
        let verdict = classify(text, 0.6);
        assert!(verdict.is_english_enough);
    }

    #[test]
    fn unknown_when_detector_not_reliable() {
        let verdict = classify("a", 0.6);
        assert_eq!(verdict.lang, "unknown");
    }
}
