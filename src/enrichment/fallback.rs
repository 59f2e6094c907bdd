//! Deterministic, local slug and summary derivation.
//!
//! Used synchronously when an article is written and as the terminal path of
//! every enrichment task, so none of these functions can fail.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Upper bound for any stored summary, in characters.
pub const SUMMARY_MAX_CHARS: usize = 200;

/// Slug used when nothing URL-safe survives cleanup.
pub const UNTITLED_SLUG: &str = "untitled";

/// Summary for content that has no readable text (e.g. only tags).
pub const EMPTY_TEXT_SUMMARY: &str = "No text content.";

const MAX_SUMMARY_SENTENCES: usize = 3;
const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];
const ELLIPSIS: &str = "...";

static SCRIPT_STYLE_RE: OnceLock<Regex> = OnceLock::new();
static TAG_RE: OnceLock<Regex> = OnceLock::new();
static ENTITY_RE: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();
static SLUG_DISALLOWED_RE: OnceLock<Regex> = OnceLock::new();
static SLUG_SEPARATOR_RE: OnceLock<Regex> = OnceLock::new();

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("hard-coded regex must compile"))
}

/// Slug from a title; never empty.
pub fn simple_slug(title: &str) -> String {
    let slug = clean_slug(title);
    if slug.is_empty() {
        UNTITLED_SLUG.to_string()
    } else {
        slug
    }
}

/// Slug cleanup without the placeholder. May return an empty string.
pub fn clean_slug(text: &str) -> String {
    let lower = text.to_lowercase();
    let kept = cached(&SLUG_DISALLOWED_RE, r"[^a-z0-9\s-]").replace_all(&lower, "");
    let joined = cached(&SLUG_SEPARATOR_RE, r"[\s-]+").replace_all(&kept, "-");
    joined.trim_matches('-').to_string()
}

/// Up to three leading sentences of the stripped content, at most 200 chars.
pub fn simple_summary(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }

    let text = strip_markup(content);
    if text.is_empty() {
        return EMPTY_TEXT_SUMMARY.to_string();
    }

    let sentences: Vec<&str> = text
        .split(SENTENCE_TERMINATORS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_SUMMARY_SENTENCES)
        .collect();

    let summary = if text.contains(SENTENCE_TERMINATORS) && !sentences.is_empty() {
        format!("{}.", sentences.join(". "))
    } else {
        text
    };

    truncate_chars(&summary, SUMMARY_MAX_CHARS)
}

/// Removes `<script>`/`<style>` bodies, tags and entities, collapsing whitespace.
///
/// Tags are removed before entities are decoded, so escaped text such as
/// `5 &lt; 6 and 7 &gt; 3` survives as literal comparison signs. Decoded text
/// that spells out a tag (`&lt;b&gt;`) is stripped in a second pass.
pub fn strip_markup(html: &str) -> String {
    let without_blocks = cached(
        &SCRIPT_STYLE_RE,
        r"(?is)<(?:script|style)\b[^>]*>.*?</(?:script|style)\s*>",
    )
    .replace_all(html, " ");
    let tag = cached(&TAG_RE, r"(?s)<!--.*?-->|</?[a-zA-Z][^<>]*>|<[!?][^<>]*>");
    let without_tags = tag.replace_all(&without_blocks, " ");
    let decoded = decode_entities(&without_tags);
    let plain = tag.replace_all(&decoded, " ");
    cached(&WHITESPACE_RE, r"\s+")
        .replace_all(&plain, " ")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    cached(&ENTITY_RE, r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);")
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Truncates on a char boundary, marking the cut with `...` inside `max`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    let head: String = text.chars().take(keep).collect();
    format!("{}{}", head.trim_end(), ELLIPSIS)
}
