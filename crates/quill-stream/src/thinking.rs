/// Phrases that indicate the model is narrating its own prompt internals;
/// thinking fragments containing them are dropped from the preview.
const BANNED_PHRASES: &[&str] = &[
    "system prompt",
    "system message",
    "my instructions",
    "the instructions above",
];

/// Caps the thinking text surfaced to observers at a per-run character
/// budget and filters prompt-internals leakage.
///
/// The full thinking stream is never stored; this only shapes the preview.
pub struct ThinkingPreview {
    remaining: usize,
}

impl ThinkingPreview {
    pub fn new(budget_chars: usize) -> Self {
        Self {
            remaining: budget_chars,
        }
    }

    /// Feed one thinking fragment; returns the text to surface, if any.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if self.remaining == 0 || fragment.is_empty() {
            return None;
        }
        let lowered = fragment.to_lowercase();
        if BANNED_PHRASES.iter().any(|p| lowered.contains(p)) {
            return None;
        }

        let count = fragment.chars().count();
        if count <= self.remaining {
            self.remaining -= count;
            return Some(fragment.to_string());
        }

        let truncated: String = fragment.chars().take(self.remaining).collect();
        self.remaining = 0;
        Some(truncated)
    }

    /// Whether the budget is spent.
    pub fn exhausted(&self) -> bool {
        self.remaining == 0
    }
}

impl Default for ThinkingPreview {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_text_within_budget() {
        let mut preview = ThinkingPreview::new(100);
        assert_eq!(preview.push("pondering").as_deref(), Some("pondering"));
        assert!(!preview.exhausted());
    }

    #[test]
    fn truncates_at_the_budget_then_drops() {
        let mut preview = ThinkingPreview::new(5);
        assert_eq!(preview.push("abcdefgh").as_deref(), Some("abcde"));
        assert!(preview.exhausted());
        assert!(preview.push("more").is_none());
    }

    #[test]
    fn budget_counts_chars_not_bytes() {
        let mut preview = ThinkingPreview::new(2);
        assert_eq!(preview.push("思考中").as_deref(), Some("思考"));
    }

    #[test]
    fn filters_prompt_internals() {
        let mut preview = ThinkingPreview::new(1000);
        assert!(preview.push("the System Prompt says to be terse").is_none());
        // A dropped fragment does not consume budget.
        assert_eq!(preview.push("ok").as_deref(), Some("ok"));
    }
}
