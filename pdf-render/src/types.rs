use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Everything the renderer needs about the calendar being printed. A pure
/// function of these fields produces the SVG — no hidden
/// state, no wall-clock reads.
#[derive(Debug, Clone)]
pub struct CalendarConfig {
    pub calendar_id: String,
    pub template_id: String,
    /// Bumped by the editor whenever the user changes layout/theme; part of
    /// the fingerprint tuple so a re-render after an edit gets a new key.
    pub config_version: i64,
    pub year: i32,
    pub months: Vec<u32>,
    pub print_size: PrintSize,
}

#[derive(Debug, Clone, Copy)]
pub struct PrintSize {
    pub width_in: f32,
    pub height_in: f32,
    pub dpi: u32,
}

impl Default for PrintSize {
    fn default() -> Self {
        Self {
            width_in: 36.0,
            height_in: 23.0,
            dpi: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub date: NaiveDate,
    pub title: String,
}

/// The output of a successful render.
pub struct RenderedPdf {
    pub bytes: Vec<u8>,
    /// Hex-encoded SHA-256 of `bytes`, recorded on the calendar row.
    pub bytes_hash: String,
    /// Deterministic cache key derived from `(template_id, config_version, events_hash, library_version)`.
    pub fingerprint: String,
}
