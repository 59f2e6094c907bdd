//! Prompt construction and token budgets for the enrichment tasks.

use crate::enrichment::fallback::{strip_markup, truncate_chars, SUMMARY_MAX_CHARS};

pub const SLUG_MAX_TOKENS: u32 = 50;
pub const SUMMARY_MAX_TOKENS: u32 = 200;

const SLUG_PREVIEW_CHARS: usize = 200;
const SUMMARY_INPUT_CHARS: usize = 10_000;

pub fn slug_prompt(title: &str, content: &str) -> String {
    let mut prompt = String::from(
        "Generate a unique, SEO-friendly URL slug for this article. The slug should be:\n\
         - 3-5 words maximum\n\
         - All lowercase\n\
         - Words separated by hyphens\n\
         - Descriptive and relevant to the content\n\
         - No special characters except hyphens\n\n",
    );
    prompt.push_str(&format!("Title: {}\n", title.trim()));

    let preview = strip_markup(content);
    if !preview.is_empty() {
        prompt.push_str(&format!(
            "Content preview: {}\n\n",
            truncate_chars(&preview, SLUG_PREVIEW_CHARS)
        ));
    }

    prompt.push_str("Generate only the slug, no additional text:");
    prompt
}

pub fn summary_prompt(content: &str) -> String {
    // Long bodies are cut before they reach the request
    let text = truncate_chars(&strip_markup(content), SUMMARY_INPUT_CHARS);
    format!(
        "Generate a brief, engaging summary of this article content in 2-3 sentences. \
         The summary should:\n\
         - Be at most {} characters\n\
         - Capture the main points\n\
         - Be written in a professional tone\n\
         - Not include HTML tags or markdown\n\n\
         Content: {}\n\n\
         Summary:",
        SUMMARY_MAX_CHARS, text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_prompt_includes_stripped_preview() {
        let prompt = slug_prompt("Hello, World! 2024", "<p>Intro <b>text</b></p>");
        assert!(prompt.contains("Title: Hello, World! 2024\n"));
        assert!(prompt.contains("Content preview: Intro text\n"));
        assert!(prompt.ends_with("no additional text:"));
    }

    #[test]
    fn slug_prompt_skips_empty_preview() {
        let prompt = slug_prompt("Title", "<div></div>");
        assert!(!prompt.contains("Content preview"));
    }

    #[test]
    fn summary_prompt_is_markup_free_and_bounded() {
        let content = format!("<p>{}</p>", "x".repeat(20_000));
        let prompt = summary_prompt(&content);
        assert!(!prompt.contains("<p>"));
        assert!(prompt.contains("at most 200 characters"));
        assert!(prompt.len() < 11_000);
    }
}
