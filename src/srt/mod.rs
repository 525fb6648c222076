//! SRT subtitle model and serialization
//!
//! The reference subtitle file anchors the whole pipeline: its ids and
//! timings are what the translation LLM is asked to preserve, and what the
//! merger falls back to.

pub mod parse;
pub mod time;

pub use parse::parse_srt;

use crate::srt::time::format_srt_range;

/// One reference subtitle entry
#[derive(Debug, Clone, PartialEq)]
pub struct SrtEntry {
    /// Original numeric id from the file
    pub id: u32,
    /// Start time in seconds (offset already applied)
    pub start_sec: f64,
    /// End time in seconds, always greater than `start_sec`
    pub end_sec: f64,
    /// Subtitle text, possibly multi-line
    pub text: String,
}

impl SrtEntry {
    pub fn duration(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

/// Serialize entries in standard SRT form, ids as stored.
pub fn serialize(entries: &[SrtEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{}\n{}\n{}\n\n",
            entry.id,
            format_srt_range(entry.start_sec, entry.end_sec),
            entry.text
        ));
    }
    out
}

/// Last end minus first start, or 0 for an empty set.
pub fn span_seconds(entries: &[SrtEntry]) -> f64 {
    match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => (last.end_sec - first.start_sec).max(0.0),
        _ => 0.0,
    }
}

/// Entries whose interval overlaps `[start_sec, end_sec]` — fully contained
/// or crossing either boundary. Ids are preserved.
pub fn slice_overlapping(entries: &[SrtEntry], start_sec: f64, end_sec: f64) -> Vec<SrtEntry> {
    entries
        .iter()
        .filter(|e| e.start_sec < end_sec && e.end_sec > start_sec)
        .cloned()
        .collect()
}
