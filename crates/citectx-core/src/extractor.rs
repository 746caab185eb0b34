//! Citation-context extraction.
//!
//! For every `<xref ref-type="bibr" rid="...">` marker pointing at a reference,
//! the extractor collects the running text around it from the marker's direct
//! siblings, strips bracketed notation and stray symbols, and trims the result
//! to the sentence just before the marker and the sentence just after it.
//!
//! Only text siblings contribute. A sibling that is itself an element (a
//! figure, a nested paragraph, another marker) is skipped without descending
//! into it, so context never leaks in from nested structure.

use serde::Serialize;

use crate::clean::{clean_sibling_text, collapse_spaces};
use crate::markup::{Element, MarkupTree, Node, NodeId, strip_inline_formatting};
use crate::sentence::SentenceSplitter;

/// Text around one citation marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextWindow {
    /// The sentence ending at the marker; possibly empty.
    pub before: String,
    /// The sentence starting after the marker; possibly empty.
    pub after: String,
}

impl ContextWindow {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

/// Whether `el` is a bibliographic citation marker for `marker_id`.
pub fn is_citation_marker(el: &Element, marker_id: &str) -> bool {
    el.name.eq_ignore_ascii_case("xref")
        && el.attribute("ref-type") == Some("bibr")
        && el.attribute("rid") == Some(marker_id)
}

pub struct ContextExtractor<'s> {
    splitter: &'s dyn SentenceSplitter,
    before_len: usize,
    after_len: usize,
}

impl<'s> ContextExtractor<'s> {
    /// `before_len` and `after_len` bound, in characters, how much cleaned
    /// text is gathered on each side before sentence trimming.
    pub fn new(splitter: &'s dyn SentenceSplitter, before_len: usize, after_len: usize) -> Self {
        Self {
            splitter,
            before_len,
            after_len,
        }
    }

    /// Windows for each occurrence of `marker_id` in `document`, in document
    /// order. Occurrences whose window is empty on both sides are skipped.
    ///
    /// Markup that cannot be parsed yields no windows.
    pub fn extract(&self, document: &str, marker_id: &str) -> Occurrences<'_, 's> {
        let stripped = strip_inline_formatting(document);
        let tree = match MarkupTree::parse(&stripped) {
            Ok(tree) => Some(tree),
            Err(e) => {
                tracing::debug!(marker_id, error = %e, "unparseable document, no occurrences");
                None
            }
        };
        let markers = tree
            .as_ref()
            .map(|t| t.find_elements(|el| is_citation_marker(el, marker_id)))
            .unwrap_or_default();
        Occurrences {
            extractor: self,
            tree,
            markers: markers.into_iter(),
        }
    }

    fn window_at(&self, tree: &MarkupTree, marker: NodeId) -> ContextWindow {
        let before = sweep(tree.preceding_siblings(marker), self.before_len, Side::Before);
        let after = sweep(tree.following_siblings(marker), self.after_len, Side::After);
        ContextWindow {
            before: self
                .splitter
                .sentences(&before)
                .last()
                .unwrap_or("")
                .to_string(),
            after: self
                .splitter
                .sentences(&after)
                .next()
                .unwrap_or("")
                .to_string(),
        }
    }
}

/// Lazy sequence of context windows for one marker id in one document.
pub struct Occurrences<'e, 's> {
    extractor: &'e ContextExtractor<'s>,
    tree: Option<MarkupTree>,
    markers: std::vec::IntoIter<NodeId>,
}

impl Iterator for Occurrences<'_, '_> {
    type Item = ContextWindow;

    fn next(&mut self) -> Option<ContextWindow> {
        let tree = self.tree.as_ref()?;
        for marker in self.markers.by_ref() {
            let window = self.extractor.window_at(tree, marker);
            if !window.is_empty() {
                return Some(window);
            }
        }
        None
    }
}

/// Extract windows with a one-off extractor.
pub fn extract(
    document: &str,
    marker_id: &str,
    splitter: &dyn SentenceSplitter,
    before_len: usize,
    after_len: usize,
) -> Vec<ContextWindow> {
    ContextExtractor::new(splitter, before_len, after_len)
        .extract(document, marker_id)
        .collect()
}

#[derive(Clone, Copy)]
enum Side {
    Before,
    After,
}

/// Gather cleaned text from `siblings` (nearest first) until at least `len`
/// characters are collected, then cut to `len` characters on the side away
/// from the marker.
fn sweep<'t>(siblings: impl Iterator<Item = &'t Node>, len: usize, side: Side) -> String {
    let mut pieces = Vec::new();
    let mut collected = 0;
    for node in siblings {
        if collected >= len {
            break;
        }
        let Node::Text(text) = node else {
            continue;
        };
        let cleaned = clean_sibling_text(text);
        collected += cleaned.chars().count();
        pieces.push(cleaned);
    }
    if let Side::Before = side {
        pieces.reverse();
    }
    let joined = pieces.concat();
    let joined = collapse_spaces(&joined);
    let window = match side {
        Side::Before => last_chars(&joined, len),
        Side::After => first_chars(&joined, len),
    };
    window.trim().to_string()
}

fn first_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((at, _)) => &text[..at],
        None => text,
    }
}

fn last_chars(text: &str, n: usize) -> &str {
    let total = text.chars().count();
    if total <= n {
        return text;
    }
    match text.char_indices().nth(total - n) {
        Some((at, _)) => &text[at..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentence::RuleSplitter;

    const MARKER: &str = r#"<xref ref-type="bibr" rid="b1">1</xref>"#;

    fn windows(doc: &str, before: usize, after: usize) -> Vec<ContextWindow> {
        extract(doc, "b1", &RuleSplitter, before, after)
    }

    fn window(before: &str, after: &str) -> ContextWindow {
        ContextWindow {
            before: before.into(),
            after: after.into(),
        }
    }

    #[test]
    fn trims_to_neighbouring_sentences() {
        let doc = format!(
            "<article><p>Prior work [1] showed X. Recent results {MARKER} confirm Y. Further study continues.</p></article>"
        );
        assert_eq!(
            windows(&doc, 50, 50),
            vec![window("Recent results", "confirm Y.")]
        );
    }

    #[test]
    fn self_closing_marker() {
        let doc = r#"<p>Prior work [1] showed X. Recent results <XREF ref-type="bibr" rid="b1"/> confirm Y. Further study continues.</p>"#;
        assert_eq!(
            windows(doc, 50, 100),
            vec![window("Recent results", "confirm Y.")]
        );
    }

    #[test]
    fn zero_lengths_give_no_window() {
        let doc = format!("<p>Some text before {MARKER} and after.</p>");
        assert!(windows(&doc, 0, 0).is_empty());
        let extractor = ContextExtractor::new(&RuleSplitter, 0, 0);
        let tree = MarkupTree::parse(&doc).unwrap();
        let marker = tree.find_elements(|el| is_citation_marker(el, "b1"))[0];
        assert_eq!(extractor.window_at(&tree, marker), ContextWindow::default());
    }

    #[test]
    fn keeps_the_last_characters_before_and_first_after() {
        // The cut happens before trimming, so the space next to the marker
        // uses up one of the four characters on each side.
        let doc = format!("<p>abcdefghij {MARKER} klmnopqrst</p>");
        assert_eq!(windows(&doc, 4, 4), vec![window("hij", "klm")]);
    }

    #[test]
    fn nested_elements_are_not_flattened() {
        let doc = format!(
            "<p>Known fact. <fig><caption>hidden words</caption></fig> near the marker {MARKER} then <list><item>more hidden</item></list> done.</p>"
        );
        let found = windows(&doc, 200, 200);
        assert_eq!(found, vec![window("near the marker", "then done.")]);
    }

    #[test]
    fn inline_formatting_is_read_through() {
        let doc = format!(
            "<p>Growth of <italic>Escherichia coli</italic> was <bold>slow</bold> {MARKER} overall.</p>"
        );
        assert_eq!(
            windows(&doc, 100, 100),
            vec![window("Growth of Escherichia coli was slow", "overall.")]
        );
    }

    #[test]
    fn one_window_per_occurrence_in_document_order() {
        let doc = format!(
            "<body><p>First claim {MARKER}.</p><p>Unrelated <xref ref-type=\"bibr\" rid=\"b2\">2</xref> text.</p><p>Second claim {MARKER} again.</p><p>{MARKER}</p></body>"
        );
        let found = windows(&doc, 100, 100);
        assert_eq!(
            found,
            vec![window("First claim", "."), window("Second claim", "again.")]
        );
    }

    #[test]
    fn marker_match_is_exact() {
        let doc = r#"<p>Text <xref ref-type="fig" rid="b1">F1</xref> and <xref ref-type="bibr" rid="b10">10</xref> end.</p>"#;
        assert!(windows(doc, 100, 100).is_empty());
    }

    #[test]
    fn malformed_markup_yields_nothing() {
        let doc = format!("<p>Text {MARKER} more <!-- cut off");
        assert!(windows(&doc, 100, 100).is_empty());
    }

    #[test]
    fn stray_end_tag_does_not_drop_the_document() {
        let doc = format!(
            "<body><p>Known fact. Recent results {MARKER} confirm Y.</p></div><p>Later {MARKER} again.</p></body>"
        );
        assert_eq!(
            windows(&doc, 100, 100),
            vec![
                window("Recent results", "confirm Y."),
                window("Later", "again."),
            ]
        );
    }

    #[test]
    fn brackets_split_across_siblings() {
        // "[" opens in the text before the marker and "]" closes after it.
        let doc = format!("<p>Methods differ. As shown [see {MARKER}, 2] later work agrees.</p>");
        assert_eq!(
            windows(&doc, 100, 100),
            vec![window("As shown", "later work agrees.")]
        );
    }

    #[test]
    fn iteration_can_stop_early() {
        let doc = format!("<p>One {MARKER} two.</p><p>Three {MARKER} four.</p>");
        let extractor = ContextExtractor::new(&RuleSplitter, 100, 100);
        let mut occurrences = extractor.extract(&doc, "b1");
        assert_eq!(occurrences.next(), Some(window("One", "two.")));
    }
}
