//! Text cleanup for scraped article bodies.
//!
//! Scraped pages carry navigation chrome, doubled menu phrases and blobs of
//! markup that survived extraction. [`TextCleaner::clean`] runs the three
//! transforms below in order before text reaches the keyword prefilter:
//!
//! 1. [`remove_repeated_phrase`]: drop a phrase that appears doubled near the
//!    top of the page, everywhere it occurs
//! 2. [`filter_noisy_chunks`]: drop fixed-size chunks that are mostly symbols
//! 3. [`normalize`]: line endings, paragraph breaks, spacing, punctuation

use crate::config::CleaningConfig;
use once_cell::sync::Lazy;
use regex::Regex;

static BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t|[ \u{a0}]{2,}").unwrap());
static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{a0}]+([.,;:!?%)\]])").unwrap());
static PARAGRAPH_BREAKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Spaced-out letters are only merged in runs at least this long, so
/// ordinary pairs like "a I" are left alone.
const MIN_SPACED_RUN: usize = 3;

/// Applies the configured cleanup steps to one article.
#[derive(Debug, Clone)]
pub struct TextCleaner {
    config: CleaningConfig,
}

impl TextCleaner {
    pub fn new(config: CleaningConfig) -> Self {
        Self { config }
    }

    pub fn clean(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let deduped = remove_repeated_phrase(
            &lowered,
            self.config.repeated_phrase_min_words,
            self.config.repeated_phrase_scan_words,
        );
        let denoised = filter_noisy_chunks(
            &deduped,
            self.config.chunk_size,
            self.config.max_nontext_ratio,
        );
        normalize(&denoised)
    }
}

/// Remove a doubled phrase picked up from repeated navigation or footers.
///
/// Looks in the first `scan_words` words for the longest run of at least
/// `min_words` words immediately followed by an identical run (leftmost on
/// ties), then removes every occurrence of that run from the whole text.
/// Text without such a run is returned unchanged.
pub fn remove_repeated_phrase(text: &str, min_words: usize, scan_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let window = &words[..words.len().min(scan_words)];
    let Some(phrase) = find_doubled_phrase(window, min_words.max(1)) else {
        return text.to_string();
    };

    let mut kept = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        if words[i..].starts_with(phrase) {
            i += phrase.len();
        } else {
            kept.push(words[i]);
            i += 1;
        }
    }
    kept.join(" ")
}

fn find_doubled_phrase<'a, 'w>(window: &'w [&'a str], min_words: usize) -> Option<&'w [&'a str]> {
    let longest = window.len() / 2;
    for len in (min_words..=longest).rev() {
        for start in 0..=window.len() - 2 * len {
            let first = &window[start..start + len];
            if first == &window[start + len..start + 2 * len] {
                return Some(first);
            }
        }
    }
    None
}

/// Drop chunks whose share of symbol characters exceeds `max_ratio`.
///
/// Chunks are `chunk_size` characters long, extended to the next whitespace
/// so that no word is cut in half. Survivors are rejoined with single spaces.
pub fn filter_noisy_chunks(text: &str, chunk_size: usize, max_ratio: f64) -> String {
    split_chunks(text, chunk_size)
        .into_iter()
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty() && nontext_ratio(chunk) <= max_ratio)
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_chunks(text: &str, chunk_size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, ch) in text.char_indices() {
        if count >= chunk_size && ch.is_whitespace() {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

fn nontext_ratio(chunk: &str) -> f64 {
    let total = chunk.chars().count();
    if total == 0 {
        return 0.0;
    }
    let noise = chunk
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    noise as f64 / total as f64
}

/// Normalize whitespace and punctuation spacing.
///
/// - `\r\n` and `\r` become `\n`
/// - each line is stripped; runs of two or more spaces (or a tab) act as word
///   boundaries and collapse to one space, except between two single
///   letters, where the boundary stays a double space so a later pass still
///   sees it
/// - spaced-out letters ("w o r d") are merged, never across a boundary
/// - whitespace before closing punctuation is removed
/// - runs of blank lines collapse to a single paragraph break
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines = unified
        .split('\n')
        .map(normalize_line)
        .collect::<Vec<_>>()
        .join("\n");
    PARAGRAPH_BREAKS
        .replace_all(&lines, "\n\n")
        .trim()
        .to_string()
}

fn normalize_line(line: &str) -> String {
    let mut joined = String::new();
    let segments = BOUNDARY
        .split(line.trim())
        .map(|segment| {
            SPACE_BEFORE_PUNCT
                .replace_all(&merge_spaced_letters(segment), "$1")
                .into_owned()
        })
        .filter(|segment| !segment.is_empty());
    for segment in segments {
        if !joined.is_empty() {
            let letters_meet = joined.rsplit(' ').next().is_some_and(is_single)
                && segment.split(' ').next().is_some_and(is_single);
            joined.push_str(if letters_meet { "  " } else { " " });
        }
        joined.push_str(&segment);
    }
    SPACE_BEFORE_PUNCT
        .replace_all(&joined, "$1")
        .trim()
        .to_string()
}

/// Merge runs of single-character tokens inside one boundary segment.
fn merge_spaced_letters(segment: &str) -> String {
    let tokens: Vec<&str> = segment.split(' ').filter(|t| !t.is_empty()).collect();
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut run: Vec<&str> = Vec::new();

    for token in tokens {
        if is_single(token) {
            run.push(token);
        } else {
            flush_run(&mut run, &mut out);
            out.push(token.to_string());
        }
    }
    flush_run(&mut run, &mut out);
    out.join(" ")
}

fn is_single(token: &str) -> bool {
    let mut chars = token.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_alphanumeric())
}

fn flush_run(run: &mut Vec<&str>, out: &mut Vec<String>) {
    if run.len() >= MIN_SPACED_RUN {
        out.push(run.concat());
    } else {
        out.extend(run.iter().map(|t| t.to_string()));
    }
    run.clear();
}

/// Keep the words in `[words_start, words_end)`.
///
/// The leading words of a scraped page are usually navigation. Texts too
/// short to have any words past `words_start` are kept from the beginning.
pub fn trim_words(text: &str, words_start: usize, words_end: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let end = words.len().min(words_end);
    let start = if words_start < end { words_start } else { 0 };
    words[start..end].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubled_phrase_removed_everywhere() {
        assert_eq!(
            remove_repeated_phrase("A B A B rest of article", 1, 200),
            "rest of article"
        );
    }

    #[test]
    fn test_doubled_phrase_removed_outside_scan_window() {
        let text = "menu home menu home the story continues and menu home appears again";
        assert_eq!(
            remove_repeated_phrase(text, 2, 4),
            "the story continues and appears again"
        );
    }

    #[test]
    fn test_longest_doubled_phrase_wins() {
        // "x y z x y z" beats the shorter "a a" that appears first.
        let text = "a a x y z x y z end";
        assert_eq!(remove_repeated_phrase(text, 1, 200), "a a end");
    }

    #[test]
    fn test_leftmost_doubled_phrase_wins_on_ties() {
        let text = "p q p q r s r s";
        assert_eq!(remove_repeated_phrase(text, 2, 200), "r s r s");
    }

    #[test]
    fn test_no_doubled_phrase_returns_input() {
        let text = "Severe floods\ndisplaced thousands.";
        assert_eq!(remove_repeated_phrase(text, 3, 200), text);
    }

    #[test]
    fn test_phrase_shorter_than_minimum_is_ignored() {
        let text = "the the cat sat";
        assert_eq!(remove_repeated_phrase(text, 2, 200), text);
    }

    #[test]
    fn test_noisy_chunks_are_dropped() {
        let text = format!(
            "{} {}",
            "floods displaced thousands of people across the western region",
            "{}<>{}[]{}<>{}/*/*/*/*/*//**//**##@@!!$$%%^^&&**(())"
        );
        let cleaned = filter_noisy_chunks(&text, 20, 0.3);
        assert!(cleaned.contains("floods displaced thousands"));
        assert!(!cleaned.contains("<>"));
    }

    #[test]
    fn test_chunks_do_not_split_words() {
        let text = "internationally recognized humanitarian organizations responded";
        let chunks = split_chunks(text, 5);
        for chunk in chunks {
            assert!(text.split_whitespace().any(|w| w == chunk.trim()));
        }
    }

    #[test]
    fn test_nontext_ratio() {
        assert_eq!(nontext_ratio("abcd"), 0.0);
        assert_eq!(nontext_ratio("ab{}"), 0.5);
        assert_eq!(nontext_ratio(""), 0.0);
    }

    #[test]
    fn test_normalize_line_endings_and_paragraphs() {
        let text = "first line\r\n\r\n\r\n\r\nsecond line\rthird";
        assert_eq!(normalize(text), "first line\n\nsecond line\nthird");
    }

    #[test]
    fn test_normalize_spaced_letters_respect_boundaries() {
        assert_eq!(normalize("w o r d  n e x t"), "word next");
        assert_eq!(normalize("the  f l o o d s  came"), "the floods came");
    }

    #[test]
    fn test_boundary_between_single_letters_survives() {
        assert_eq!(normalize("a  b c"), "a  b c");
        assert_eq!(normalize("plan  a b"), "plan a b");
        assert_eq!(normalize("a  b c  d e f"), "a  b c def");
        assert_eq!(normalize("x y  z w  v ."), "x y  z w v.");
    }

    #[test]
    fn test_normalize_keeps_short_single_letter_pairs() {
        assert_eq!(normalize("plan a b"), "plan a b");
    }

    #[test]
    fn test_normalize_removes_space_before_punctuation() {
        assert_eq!(
            normalize("  floods hit Nairobi , killing 12 .  "),
            "floods hit Nairobi, killing 12."
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "Severe   floods displaced  thousands  in March 2021 .\r\n\r\n\r\nMore  rain is expected ; officials said",
            "  b r e a k i n g  news :\n\n\n\n  t h e  river burst its banks !",
            "plain text with nothing to fix.",
            "tab\tseparated\tcolumns\n \n \nand blank lines",
            "a  b c",
            "x y  z w  v .",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_trim_words_window() {
        let text = (0..10).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(trim_words(&text, 2, 5), "w2 w3 w4");
        assert_eq!(trim_words(&text, 20, 5), "w0 w1 w2 w3 w4");
        assert_eq!(trim_words("short text", 50, 1500), "short text");
    }

    #[test]
    fn test_cleaner_lowercases_and_strips_boilerplate() {
        let cleaner = TextCleaner::new(CleaningConfig {
            repeated_phrase_min_words: 2,
            ..CleaningConfig::default()
        });
        let cleaned = cleaner.clean("Sign Up Now Sign Up Now Floods hit the coast . Sign Up Now");
        assert_eq!(cleaned, "floods hit the coast.");
    }
}
