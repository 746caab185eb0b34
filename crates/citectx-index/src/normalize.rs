use unicode_normalization::UnicodeNormalization;

/// Normalize a reference title into its index key.
///
/// Composes Unicode (NFC), collapses whitespace runs to a single space, trims,
/// and lowercases. Punctuation is kept: two titles that differ only in
/// punctuation stay distinct keys and are reconciled through shared pub ids.
pub fn normalize_title(title: &str) -> String {
    let composed: String = title.nfc().collect();
    composed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
