use unicode_normalization::UnicodeNormalization;

const FALLBACK_SLUG: &str = "search";

/// Turns free text into a lowercase ASCII slug joined by `-`.
///
/// Accented characters are decomposed and their marks dropped, anything else
/// outside `[a-z0-9]` separates words. Empty results fall back to `search`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for ch in input.nfkd() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else if ch.is_ascii() || ch.is_whitespace() {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}
