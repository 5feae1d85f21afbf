//! Recognizing anti-bot challenge pages.
//!
//! Both fetch strategies can receive a well-formed 200 response whose
//! body is an interstitial challenge instead of the real page. Marker
//! matching is crude but these strings have been stable for years.

const CHALLENGE_MARKERS: &[&str] = &[
    // Cloudflare interstitial title and script hooks
    "Just a moment...",
    "cf-challenge",
    "challenge-platform",
    "_cf_chl",
    // Cloudflare block page
    "Attention Required! | Cloudflare",
    // Turnstile / managed challenge copy
    "Verifying you are human",
    "Checking if the site connection is secure",
];

/// True when the markup looks like a bot-defense interstitial rather
/// than real content.
pub(crate) fn looks_like_challenge(html: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|m| html.contains(m))
}
