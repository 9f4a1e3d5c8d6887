//! # Utilities Module
//!
//! ## Purpose
//! Common helpers used throughout the rulebook search core for text handling
//! and performance measurement.
//!
//! ## Input/Output Specification
//! - **Input**: Various data types requiring common operations
//! - **Output**: Processed text, timing measurements

use std::time::Instant;

/// Performance timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: String,
}

/// Text processing utilities
pub struct TextUtils;

impl Timer {
    /// Start a new timer with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("Timer '{}' completed in {}ms", self.name, elapsed);
        elapsed
    }
}

impl TextUtils {
    /// Truncate text to at most `max_chars` characters with an ellipsis.
    /// Counts characters, not bytes; rulebook text is not ASCII-only.
    pub fn truncate(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut.trim_end())
    }

    /// First `max_words` words of longer content.
    pub fn extract_preview(text: &str, max_words: usize) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= max_words {
            return text.to_string();
        }
        format!("{}...", words[..max_words].join(" "))
    }

    /// Count words in text
    pub fn word_count(text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_is_char_boundary_safe() {
        let text = "règle après règle après règle";
        let truncated = TextUtils::truncate(text, 10);
        assert!(truncated.ends_with("..."));
        assert!(truncated.chars().count() <= 10);
    }

    #[test]
    fn truncate_leaves_short_text_alone() {
        assert_eq!(TextUtils::truncate("short", 100), "short");
    }

    #[test]
    fn preview_keeps_word_boundaries() {
        let preview = TextUtils::extract_preview("one two three four five", 3);
        assert_eq!(preview, "one two three...");
    }

    #[test]
    fn timer_reports_elapsed_time() {
        let timer = Timer::new("test");
        assert!(timer.elapsed_ms() < 1000);
    }
}
