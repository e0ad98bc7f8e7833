//! The placeholder wire syntax embedded in drafts.
//!
//! `{{MERMAID:<desc>}}` and `{{HTML:<desc>}}` are case-sensitive and mark
//! slots for generated diagram/prototype code. `{{image+<prompt>}}` is
//! case-insensitive and marks an image request. Descriptions never contain
//! `}}`.

use once_cell::sync::Lazy;
use regex::Regex;

use quill_core::Placeholder;

pub static MERMAID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{MERMAID:([^}]+)\}\}").unwrap());
pub static HTML_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{HTML:([^}]+)\}\}").unwrap());
pub static IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{\{image\+([^}]+)\}\}").unwrap());

static MERMAID_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)```mermaid\n(.*?)\n```").unwrap());
static HTML_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)```html\n(.*?)\n```").unwrap());

/// Extract diagram and prototype placeholders from a draft.
///
/// Ids are positional and 1-based (`mermaid_1`, `html_1`, ...); every writer
/// pass regenerates them from scratch.
pub fn extract_placeholders(draft: &str) -> (Vec<Placeholder>, Vec<Placeholder>) {
    let mermaid = MERMAID_RE
        .captures_iter(draft)
        .enumerate()
        .map(|(i, cap)| Placeholder {
            id: format!("mermaid_{}", i + 1),
            description: cap[1].trim().to_string(),
        })
        .collect();
    let html = HTML_RE
        .captures_iter(draft)
        .enumerate()
        .map(|(i, cap)| Placeholder {
            id: format!("html_{}", i + 1),
            description: cap[1].trim().to_string(),
        })
        .collect();
    (mermaid, html)
}

/// Distinct image prompts in draft order.
pub fn image_prompts(draft: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in IMAGE_RE.captures_iter(draft) {
        let prompt = cap[1].trim().to_string();
        if !prompt.is_empty() && !seen.contains(&prompt) {
            seen.push(prompt);
        }
    }
    seen
}

pub fn has_image_placeholders(draft: &str) -> bool {
    IMAGE_RE
        .captures_iter(draft)
        .any(|cap| !cap[1].trim().is_empty())
}

/// Bodies of fenced mermaid blocks, in document order.
pub fn mermaid_blocks(text: &str) -> Vec<String> {
    MERMAID_BLOCK_RE
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Bodies of fenced html blocks, in document order.
pub fn html_blocks(text: &str) -> Vec<String> {
    HTML_BLOCK_RE
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Replace the body of the nth fenced block of the given kind, keeping the
/// fence itself intact. Returns the text unchanged when the index is out of
/// range.
pub fn replace_block_body(text: &str, kind: BlockKind, index: usize, new_body: &str) -> String {
    let re = match kind {
        BlockKind::Mermaid => &*MERMAID_BLOCK_RE,
        BlockKind::Html => &*HTML_BLOCK_RE,
    };
    let span = match re.captures_iter(text).nth(index) {
        Some(cap) => match cap.get(1) {
            Some(m) => (m.start(), m.end()),
            None => return text.to_string(),
        },
        None => return text.to_string(),
    };
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..span.0]);
    out.push_str(new_body.trim());
    out.push_str(&text[span.1..]);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Mermaid,
    Html,
}
