use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::astro;
use crate::types::{CalendarConfig, CalendarEvent, PrintSize};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Build the calendar SVG deterministically from `config`, `events`, and the
/// (pure) astronomy/holiday overlay function. Layout is a
/// simple grid: one row per requested month, one column per day.
pub fn build(config: &CalendarConfig, events: &[CalendarEvent]) -> String {
    let PrintSize {
        width_in,
        height_in,
        dpi,
    } = config.print_size;

    let width_px = (width_in * dpi as f32) as u32;
    let height_px = (height_in * dpi as f32) as u32;
    let row_height = height_px as f32 / config.months.len().max(1) as f32;

    let mut events_by_month: BTreeMap<u32, Vec<&CalendarEvent>> = BTreeMap::new();
    for event in events {
        use chrono::Datelike;
        events_by_month
            .entry(event.date.month())
            .or_default()
            .push(event);
    }

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width_px}" height="{height_px}" viewBox="0 0 {width_px} {height_px}">"#
    );
    let _ = write!(
        svg,
        r#"<rect width="{width_px}" height="{height_px}" fill="#ffffff"/>"#
    );

    for (row, &month) in config.months.iter().enumerate() {
        let y = row as f32 * row_height;
        let month_name = MONTH_NAMES
            .get((month as usize).wrapping_sub(1))
            .copied()
            .unwrap_or("Unknown");

        let _ = write!(
            svg,
            r#"<g data-month="{month}"><text x="16" y="{text_y}" font-size="28" font-family="sans-serif">{month_name} {year}</text>"#,
            text_y = y + 32.0,
            year = config.year,
        );

        let overlays = astro::overlays_for_month(config.year, month);
        let mut overlay_by_day: BTreeMap<u32, &str> = BTreeMap::new();
        for overlay in &overlays {
            overlay_by_day.insert(overlay.day, overlay.label);
        }

        let days_in_month = days_in_month(config.year, month);
        let column_width = width_px as f32 / days_in_month as f32;

        for day in 1..=days_in_month {
            let x = (day - 1) as f32 * column_width;
            let cell_y = y + 40.0;
            let _ = write!(
                svg,
                r#"<rect x="{x}" y="{cell_y}" width="{column_width}" height="{cell_height}" fill="none" stroke="#cccccc"/><text x="{tx}" y="{ty}" font-size="12">{day}</text>"#,
                cell_height = row_height - 40.0,
                tx = x + 4.0,
                ty = cell_y + 16.0,
            );

            if let Some(label) = overlay_by_day.get(&day) {
                let _ = write!(
                    svg,
                    r#"<text x="{tx}" y="{ty}" font-size="9" fill="#1a5fb4">{label}</text>"#,
                    tx = x + 4.0,
                    ty = cell_y + 30.0,
                );
            }
        }

        if let Some(month_events) = events_by_month.get(&month) {
            for (index, event) in month_events.iter().enumerate() {
                use chrono::Datelike;
                let x = (event.date.day() - 1) as f32 * column_width;
                let ty = y + 40.0 + row_height - 44.0 - index as f32 * 10.0;
                if ty > y + 40.0 {
                    let _ = write!(
                        svg,
                        r#"<text x="{tx}" y="{ty}" font-size="8" fill="#26a269">{title}</text>"#,
                        tx = x + 4.0,
                        title = escape(&event.title),
                    );
                }
            }
        }

        svg.push_str("</g>");
    }

    svg.push_str("</svg>");
    svg
}

fn days_in_month(year: i32, month: u32) -> u32 {
    use chrono::NaiveDate;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid month");
    let first_of_this = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
    (first_of_next - first_of_this).num_days() as u32
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_is_deterministic() {
        let config = CalendarConfig {
            calendar_id: "cal-1".to_owned(),
            template_id: "classic".to_owned(),
            config_version: 1,
            year: 2026,
            months: vec![1, 2],
            print_size: Default::default(),
        };
        let a = build(&config, &[]);
        let b = build(&config, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn days_in_month_handles_leap_year() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
    }
}
