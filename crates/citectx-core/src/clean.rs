//! Text cleaning applied to each sibling before it joins a context window.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

static PAREN_PAIR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^()]*\)").unwrap());
static SQUARE_PAIR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\[\]]*\]").unwrap());
static UNMATCHED_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^.*[)\]]").unwrap());
static UNMATCHED_OPEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)[(\[].*$").unwrap());

/// Remove bracketed notation in three ordered passes:
///
/// 1. complete `(...)` and `[...]` pairs, innermost first, until none remain;
/// 2. everything up to and including the last remaining closing bracket
///    (the tail of a bracket opened in an earlier sibling);
/// 3. everything from the first remaining opening bracket onward
///    (the head of a bracket closed in a later sibling).
///
/// The order matters: swapping passes 2 and 3 changes the output for text
/// such as `a) b (c`.
pub fn strip_brackets(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = PAREN_PAIR_RE.replace_all(&current, "");
        let next = SQUARE_PAIR_RE.replace_all(&next, "").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    let current = UNMATCHED_CLOSE_RE.replace(&current, "");
    UNMATCHED_OPEN_RE.replace(&current, "").into_owned()
}

fn is_allowed(c: char) -> bool {
    c.is_alphanumeric() || c == '.' || c == ','
}

/// Keep letters, digits, `.`, `,` and spaces. Any whitespace becomes a space
/// and runs of spaces collapse to one. Leading and trailing spaces survive so
/// that adjacent siblings still join on a word boundary.
pub fn keep_allowed_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else if is_allowed(c) {
            out.push(c);
            last_space = false;
        }
    }
    out
}

/// Full per-sibling cleaning.
pub fn clean_sibling_text(text: &str) -> String {
    keep_allowed_chars(&strip_brackets(text))
}

/// Collapse runs of spaces left where two cleaned pieces meet.
pub(crate) fn collapse_spaces(text: &str) -> Cow<'_, str> {
    if !text.contains("  ") {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c == ' ' {
            if !last_space {
                out.push(c);
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_complete_pairs_repeatedly() {
        assert_eq!(strip_brackets("a (b [c] d) e"), "a  e");
        assert_eq!(strip_brackets("x [1], [2-4] y"), "x ,  y");
        assert_eq!(strip_brackets("((nested)) ok"), " ok");
    }

    #[test]
    fn removes_unmatched_closing_remainder() {
        assert_eq!(strip_brackets("2, 3] showed that"), " showed that");
        assert_eq!(strip_brackets("a) b) c"), " c");
    }

    #[test]
    fn removes_unmatched_opening_remainder() {
        assert_eq!(strip_brackets("as reported by [Smith, "), "as reported by ");
        assert_eq!(strip_brackets("one ( two ( three"), "one ");
    }

    #[test]
    fn pass_order_is_close_then_open() {
        // The closing pass eats "a)"; the opening pass then drops "(c".
        assert_eq!(strip_brackets("a) b (c"), " b ");
    }

    #[test]
    fn allow_list_drops_symbols_and_collapses_whitespace() {
        assert_eq!(
            keep_allowed_chars("p < 0.05;\n\tn = 12, see  §3 "),
            "p 0.05 n 12, see 3 "
        );
        assert_eq!(keep_allowed_chars("Über-naïve"), "Übernaïve");
    }

    #[test]
    fn cleaning_is_idempotent() {
        for sample in [
            "Prior work [1] showed X. ",
            "a) b (c",
            "2, 3] showed (see Fig. 2) that [4",
            "  ((x)) [y] (z ",
            "plain text, nothing to do.",
            "]][[((",
        ] {
            let once = clean_sibling_text(sample);
            assert_eq!(clean_sibling_text(&once), once, "input: {sample:?}");
            let stripped = strip_brackets(sample);
            assert_eq!(strip_brackets(&stripped), stripped, "input: {sample:?}");
        }
    }

    #[test]
    fn collapse_only_allocates_when_needed() {
        assert!(matches!(collapse_spaces("a b"), Cow::Borrowed(_)));
        assert_eq!(collapse_spaces("a  b   c"), "a b c");
    }
}
