//! Sentence boundaries.
//!
//! The extractor only needs the last sentence of the text before a marker and
//! the first sentence after it, so splitters yield spans lazily.

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// Splits text into ordered sentence spans.
pub trait SentenceSplitter: Send + Sync {
    /// Lazy, finite, ordered sentence spans of `text`. Spans are trimmed and
    /// never empty.
    fn sentences<'t>(&self, text: &'t str) -> Box<dyn Iterator<Item = &'t str> + 't>;
}

/// Abbreviations whose trailing period does not end a sentence, lowercased and
/// without the final period.
static ABBREVIATIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "al", "fig", "figs", "eq", "eqs", "ref", "refs", "vs", "cf", "e.g", "i.e", "approx",
        "no", "sec", "ch", "vol", "pp", "dr", "mr", "mrs", "ms", "st",
    ]
    .into_iter()
    .collect()
});

/// Rule-based splitter: `.`, `!` or `?` followed by whitespace (or the end of
/// the text) ends a sentence, unless the period closes a known abbreviation.
/// A trailing fragment without a terminator is yielded as the last span.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleSplitter;

impl SentenceSplitter for RuleSplitter {
    fn sentences<'t>(&self, text: &'t str) -> Box<dyn Iterator<Item = &'t str> + 't> {
        Box::new(RuleSentences { text, pos: 0 })
    }
}

struct RuleSentences<'t> {
    text: &'t str,
    pos: usize,
}

impl RuleSentences<'_> {
    fn ends_abbreviation(&self, start: usize, period: usize) -> bool {
        let before = &self.text[start..period];
        let word = before
            .rsplit(char::is_whitespace)
            .next()
            .unwrap_or("")
            .to_lowercase();
        ABBREVIATIONS.contains(word.as_str())
    }

    /// Byte offset just past the next sentence terminator at or after `start`.
    fn next_boundary(&self, start: usize) -> Option<usize> {
        let rest = &self.text[start..];
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if !matches!(c, '.' | '!' | '?') {
                continue;
            }
            let at_break = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
            if !at_break {
                continue;
            }
            if c == '.' && self.ends_abbreviation(start, start + i) {
                continue;
            }
            return Some(start + i + c.len_utf8());
        }
        None
    }
}

impl<'t> Iterator for RuleSentences<'t> {
    type Item = &'t str;

    fn next(&mut self) -> Option<&'t str> {
        while self.pos < self.text.len() {
            let start = self.pos;
            let end = self.next_boundary(start).unwrap_or(self.text.len());
            self.pos = end;
            let span = self.text[start..end].trim();
            if !span.is_empty() {
                return Some(span);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(text: &str) -> Vec<&str> {
        RuleSplitter.sentences(text).collect()
    }

    #[test]
    fn splits_on_terminators() {
        assert_eq!(
            split("First one. Second one! Third? Fourth"),
            vec!["First one.", "Second one!", "Third?", "Fourth"]
        );
    }

    #[test]
    fn keeps_abbreviations_and_decimals() {
        assert_eq!(
            split("Smith et al. found p 0.05 in Fig. 2, e.g. here. Done."),
            vec!["Smith et al. found p 0.05 in Fig. 2, e.g. here.", "Done."]
        );
    }

    #[test]
    fn single_capital_ends_a_sentence() {
        assert_eq!(
            split("Prior work showed X. Recent results"),
            vec!["Prior work showed X.", "Recent results"]
        );
    }

    #[test]
    fn empty_and_blank_text_yield_nothing() {
        assert!(split("").is_empty());
        assert!(split("   ").is_empty());
    }

    #[test]
    fn is_lazy() {
        let mut spans = RuleSplitter.sentences("One. Two. Three.");
        assert_eq!(spans.next(), Some("One."));
        assert_eq!(spans.next(), Some("Two."));
    }
}
