//! URL canonicalization.
//!
//! Strips tracking query parameters and sorts the rest by key so the same
//! page always produces the same string, which in turn keeps dedupe keys
//! stable.

use feruca::{Collator, Locale, Tailoring};
use url::Url;

/// Normalizes `raw_url`.
///
/// A non-empty `canonical_override` (typically the page's declared canonical
/// link) is parsed instead of `raw_url`. If the chosen string does not parse
/// as an absolute URL, `raw_url` is returned unchanged.
///
/// Parameters whose key matches any of `strip_patterns` are removed. A
/// pattern ending in `*` matches keys by prefix, any other pattern must
/// equal the key exactly. Surviving parameters are stably sorted by key
/// using root-locale collation (`_x`, `a`, `b`, `B`), and an empty query is
/// dropped along with its `?`.
pub fn canonicalize(
    raw_url: &str,
    strip_patterns: &[String],
    canonical_override: Option<&str>,
) -> String {
    let chosen = canonical_override.filter(|link| !link.is_empty()).unwrap_or(raw_url);

    let Ok(mut url) = Url::parse(chosen) else {
        return raw_url.to_string();
    };

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_stripped(key, strip_patterns))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut collator = key_collator();
    params.sort_by(|a, b| collator.collate(a.0.as_str(), b.0.as_str()));

    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    url.to_string()
}

/// Root-locale UCA collator with punctuation kept significant, matching
/// the default ordering of browser locale comparison.
fn key_collator() -> Collator {
    Collator::new(Tailoring::Cldr(Locale::Root), false, true)
}

/// Whether `key` matches any strip pattern.
fn is_stripped(key: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    })
}
