//! Static model allowlist.
//!
//! One pattern per line; a display name passes when any pattern is a
//! substring of it. An empty (or absent) filter passes everything.

use std::collections::HashSet;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    patterns: HashSet<String>,
}

impl ModelFilter {
    /// Load patterns from a file. A missing file is not an error: it means no
    /// filtering. Any other I/O failure is surfaced so startup can abort.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err),
        };
        Ok(Self::from_lines(&text))
    }

    pub fn from_lines(text: &str) -> Self {
        let patterns = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(String::as_str)
    }

    pub fn matches(&self, display_name: &str) -> bool {
        self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|pattern| display_name.contains(pattern.as_str()))
    }
}

/// Whether a model advertises tool calling.
pub fn supports_tools(supported_parameters: &[String]) -> bool {
    supported_parameters
        .iter()
        .any(|param| param == "tools" || param == "tool_choice")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_passes_everything() {
        let filter = ModelFilter::default();
        assert!(filter.matches("anything"));
        assert!(filter.matches(""));
    }

    #[test]
    fn substring_match_on_any_pattern() {
        let filter = ModelFilter::from_lines("mistral\nqwen");
        assert!(filter.matches("mistral-7b:free"));
        assert!(filter.matches("qwen-2:free"));
        assert!(!filter.matches("llama-3:free"));
    }

    #[test]
    fn lines_are_trimmed_and_blanks_dropped() {
        let filter = ModelFilter::from_lines("  mistral  \n\n\n   \nqwen\n");
        assert_eq!(filter.len(), 2);
        assert!(filter.matches("mistral-7b"));
    }

    #[test]
    fn missing_file_means_no_filter() {
        let dir = tempfile::tempdir().unwrap();
        let filter = ModelFilter::load(dir.path().join("does-not-exist")).unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn file_contents_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter");
        std::fs::write(&path, "deepseek\n").unwrap();
        let filter = ModelFilter::load(&path).unwrap();
        assert!(filter.matches("deepseek-r1:free"));
        assert!(!filter.matches("mistral-7b:free"));
    }

    #[test]
    fn tool_support_detection() {
        let tools = vec!["temperature".to_owned(), "tools".to_owned()];
        let tool_choice = vec!["tool_choice".to_owned()];
        let neither = vec!["temperature".to_owned(), "top_p".to_owned()];
        assert!(supports_tools(&tools));
        assert!(supports_tools(&tool_choice));
        assert!(!supports_tools(&neither));
        assert!(!supports_tools(&[]));
    }
}
