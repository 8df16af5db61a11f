//! Page progress extraction from OCR log lines.

use lazy_static::lazy_static;
use regex::Regex;

/// Prefix of lines relayed from Tesseract.
pub const TESSERACT_PREFIX: &str = "[tesseract]";

lazy_static! {
    /// Ordered most specific first; the first match wins.
    static ref PAGE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)processing\s+page\s+(\d+)\s+of\s+(\d+)").unwrap(),
        Regex::new(r"(?i)page\s+(\d+)\s+of\s+(\d+)").unwrap(),
        Regex::new(r"(?i)page\s+(\d+)\s*/\s*(\d+)").unwrap(),
        Regex::new(r"(?i)(\d+)\s+of\s+(\d+)\s+pages").unwrap(),
        Regex::new(r"(?i)(\d+)\s*/\s*(\d+)\s+pages").unwrap(),
    ];
}

/// Extract `(current, total)` from a log line.
pub fn parse_page_progress(line: &str) -> Option<(u32, u32)> {
    PAGE_PATTERNS.iter().find_map(|pattern| {
        let caps = pattern.captures(line)?;
        let current = caps.get(1)?.as_str().parse().ok()?;
        let total = caps.get(2)?.as_str().parse().ok()?;
        Some((current, total))
    })
}

/// Rewrite Tesseract relay lines for display.
pub fn display_line(line: &str) -> std::borrow::Cow<'_, str> {
    match line.strip_prefix(TESSERACT_PREFIX) {
        Some(rest) => format!("Tesseract: {}", rest.trim()).into(),
        None => line.into(),
    }
}

/// Turns a line stream into a non-decreasing fraction.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    last: Option<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns the fraction to report alongside it.
    pub fn observe(&mut self, line: &str) -> Option<f64> {
        if let Some((current, total)) = parse_page_progress(line) {
            if total > 0 {
                let fraction = (current as f64 / total as f64).clamp(0.0, 1.0);
                self.last = Some(self.last.map_or(fraction, |prev| prev.max(fraction)));
            }
        }
        self.last
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_recognized_forms() {
        assert_eq!(parse_page_progress("Page 3/20"), Some((3, 20)));
        assert_eq!(parse_page_progress("Page 3 of 20"), Some((3, 20)));
        assert_eq!(parse_page_progress("3/20 pages"), Some((3, 20)));
        assert_eq!(parse_page_progress("3 of 20 pages"), Some((3, 20)));
        assert_eq!(parse_page_progress("Processing page 3 of 20"), Some((3, 20)));
        assert_eq!(parse_page_progress("   PAGE 12 OF 40 done"), Some((12, 40)));
        assert_eq!(parse_page_progress("Optimizing images"), None);
    }

    #[test]
    fn test_fractions_are_monotonic() {
        let mut tracker = ProgressTracker::new();
        let fractions: Vec<f64> = ["Page 1/10", "Page 3/10", "noise", "Page 7/10", "Page 10/10"]
            .iter()
            .filter_map(|line| tracker.observe(line))
            .collect();
        assert_eq!(fractions, vec![0.1, 0.3, 0.3, 0.7, 1.0]);
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_regression_and_overflow_are_clamped() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe("unrelated"), None);
        assert_eq!(tracker.observe("Page 5/10"), Some(0.5));
        assert_eq!(tracker.observe("Page 2/10"), Some(0.5));
        assert_eq!(tracker.observe("Page 12/10"), Some(1.0));
        assert_eq!(tracker.observe("Page 1/0"), Some(1.0));
    }

    #[test]
    fn test_tesseract_lines_are_relabelled() {
        assert_eq!(display_line("[tesseract]  lots of diacritics"), "Tesseract: lots of diacritics");
        assert_eq!(display_line("Start processing 4 pages"), "Start processing 4 pages");
    }
}
