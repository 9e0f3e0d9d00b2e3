// crates/core/src/progress.rs
//! Percentage extraction from downloader stdout.
//!
//! The downloader prints one progress record per line (`--newline`). Any
//! line without a `<number>%` token is ignored: it produces no state change
//! and no event.

use regex_lite::Regex;
use std::sync::OnceLock;

static PERCENT_RE: OnceLock<Regex> = OnceLock::new();

fn percent_re() -> &'static Regex {
    PERCENT_RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)%").expect("valid percent regex"))
}

/// Extract the first percentage on `line`, clamped to `[0, 100]`.
pub fn parse_percent(line: &str) -> Option<f64> {
    let caps = percent_re().captures(line)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0))
}

/// Turns a stream of output lines into a non-decreasing progress sequence.
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    last: Option<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new progress value if `line` parsed and moved progress forward.
    ///
    /// Out-of-order (lower) and repeated values are dropped.
    pub fn observe(&mut self, line: &str) -> Option<f64> {
        let value = parse_percent(line)?;
        match self.last {
            Some(last) if value <= last => None,
            _ => {
                self.last = Some(value);
                Some(value)
            }
        }
    }

    /// Last accepted value, 0 if nothing has been accepted yet.
    pub fn current(&self) -> f64 {
        self.last.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percent_template_output() {
        assert_eq!(parse_percent("  42.3%"), Some(42.3));
        assert_eq!(parse_percent("100%"), Some(100.0));
        assert_eq!(parse_percent("[download]   7.0% of 10.00MiB"), Some(7.0));
    }

    #[test]
    fn test_parse_percent_first_match_wins() {
        assert_eq!(parse_percent("12.5% then 80%"), Some(12.5));
    }

    #[test]
    fn test_parse_percent_rejects_malformed() {
        assert_eq!(parse_percent(""), None);
        assert_eq!(parse_percent("[info] Downloading webpage"), None);
        assert_eq!(parse_percent("N/A%"), None);
        assert_eq!(parse_percent("% 50"), None);
    }

    #[test]
    fn test_parse_percent_clamps() {
        assert_eq!(parse_percent("250%"), Some(100.0));
    }

    #[test]
    fn test_tracker_is_monotonic() {
        let mut tracker = ProgressTracker::new();
        let lines = ["10%", "garbage", "35.0%", "20%", "35%", "72%", "100%"];
        let accepted: Vec<f64> = lines.iter().filter_map(|l| tracker.observe(l)).collect();
        assert_eq!(accepted, vec![10.0, 35.0, 72.0, 100.0]);
        assert_eq!(tracker.current(), 100.0);
    }

    #[test]
    fn test_tracker_accepts_zero_first() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.current(), 0.0);
        assert_eq!(tracker.observe("0.0%"), Some(0.0));
        assert_eq!(tracker.observe("0.0%"), None);
    }
}
