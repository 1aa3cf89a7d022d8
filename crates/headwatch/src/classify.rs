//! Protection-page and boilerplate-error detection.
//!
//! Both predicates are pure substring checks against curated phrase lists.
//! A protection page only triggers a retry; boilerplate error text only
//! keeps a title or description from counting as content.

/// Markers of interstitial pages served instead of real content:
/// challenge wording, CDN/edge protection banners, CAPTCHA and cookie prompts.
const PROTECTION_MARKERS: &[&str] = &[
    "just a moment",
    "checking your browser",
    "ddos protection",
    "ddos-guard",
    "attention required! | cloudflare",
    "cloudflare ray id",
    "cf-browser-verification",
    "captcha",
    "verify you are human",
    "please enable cookies",
];

/// Generic error-page phrases. The bare word "error" is not on this list.
const ERROR_PAGE_PHRASES: &[&str] = &[
    "404",
    "not found",
    "page not found",
    "server error",
    "access denied",
    "forbidden",
    "bad gateway",
    "service unavailable",
    "ошибка",
];

/// Whether an already-lowercased response body looks like a protection page.
pub fn is_protection_page(lowercased_body: &str) -> bool {
    PROTECTION_MARKERS
        .iter()
        .any(|marker| lowercased_body.contains(marker))
}

/// Whether a short title/description text is a generic error-page phrase.
pub fn is_boilerplate_error_text(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return false;
    }
    ERROR_PAGE_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

/// Whether text counts as real content: non-empty after trimming and not boilerplate.
pub fn is_meaningful_text(text: &str) -> bool {
    !text.trim().is_empty() && !is_boilerplate_error_text(text)
}
