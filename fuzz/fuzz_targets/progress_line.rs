// Feeds arbitrary downloader output through the progress tracker.
//
// Invariants: parsing never panics, every parsed value is within 0..=100, and
// observed values strictly increase.
#![no_main]

use libfuzzer_sys::fuzz_target;
use mediaferry_core::{parse_percent, ProgressTracker};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let mut tracker = ProgressTracker::new();
    let mut last = None;

    for line in text.split(['\r', '\n']) {
        if let Some(p) = parse_percent(line) {
            assert!((0.0..=100.0).contains(&p));
        }
        if let Some(p) = tracker.observe(line) {
            if let Some(prev) = last {
                assert!(p > prev);
            }
            last = Some(p);
        }
    }
});
