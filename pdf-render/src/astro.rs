//! Stand-in for the external astronomical/holiday computation library that
//! the SVG generator calls (explicitly out of scope; treated as a pure
//! function). Exposed as a pure, deterministic function plus a version
//! constant so the fingerprint tuple in `fingerprint::compute` stays stable
//! whenever the overlay rules change.

use serde::Serialize;

/// Bump whenever the overlay rules below change; participates in the PDF
/// fingerprint so cached renders are invalidated correctly.
pub const LIBRARY_VERSION: &str = "astro-overlays-v1";

#[derive(Debug, Clone, Serialize)]
pub struct DayOverlay {
    pub day: u32,
    pub label: &'static str,
}

/// Deterministic overlays for a given (year, month): a small set of fixed
/// holidays plus a lunar-phase marker on a day derived from the month
/// number. Not astronomically accurate — a pure placeholder for the real
/// external library this crate would call in production.
pub fn overlays_for_month(year: i32, month: u32) -> Vec<DayOverlay> {
    let mut overlays = Vec::new();

    if month == 1 {
        overlays.push(DayOverlay {
            day: 1,
            label: "New Year's Day",
        });
    }
    if month == 7 {
        overlays.push(DayOverlay {
            day: 4,
            label: "Independence Day",
        });
    }
    if month == 12 {
        overlays.push(DayOverlay {
            day: 25,
            label: "Christmas Day",
        });
    }

    let full_moon_day = ((year as u32).wrapping_mul(13) + month.wrapping_mul(7)) % 28 + 1;
    overlays.push(DayOverlay {
        day: full_moon_day,
        label: "Full Moon",
    });

    overlays
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = overlays_for_month(2026, 3);
        let b = overlays_for_month(2026, 3);
        assert_eq!(
            a.iter().map(|o| (o.day, o.label)).collect::<Vec<_>>(),
            b.iter().map(|o| (o.day, o.label)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn known_holidays_present() {
        let overlays = overlays_for_month(2026, 12);
        assert!(overlays.iter().any(|o| o.label == "Christmas Day" && o.day == 25));
    }
}
