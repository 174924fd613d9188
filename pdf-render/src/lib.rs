//! Deterministic calendar SVG generation, watermarking, and transcoding to
//! PDF. Kept free of any job-queue or object-storage
//! concerns — the PDF handler in `job-worker` is the only caller.

pub mod astro;
pub mod fingerprint;
mod svg;
pub mod types;
mod watermark;

use sha2::{Digest, Sha256};
use thiserror::Error;

pub use types::{CalendarConfig, CalendarEvent, PrintSize, RenderedPdf};

#[derive(Error, Debug)]
pub enum PdfRenderError {
    #[error("invalid svg produced by the layout generator: {0}")]
    InvalidSvg(String),
    #[error("transcoding exceeded the configured page size")]
    PageTooLarge,
}

/// Render a calendar to a PDF. Rendering the same `(config, events,
/// watermark)` twice produces byte-identical output —
/// the function reads no wall-clock state and performs no I/O.
pub fn render(
    config: &CalendarConfig,
    events: &[CalendarEvent],
    watermark: bool,
) -> Result<RenderedPdf, PdfRenderError> {
    let events_hash = fingerprint::hash_events(events);
    let fingerprint = fingerprint::compute(
        &config.template_id,
        config.config_version,
        &events_hash,
        astro::LIBRARY_VERSION,
    );

    let width_px = (config.print_size.width_in * config.print_size.dpi as f32) as u32;
    let height_px = (config.print_size.height_in * config.print_size.dpi as f32) as u32;

    let base_svg = svg::build(config, events);
    let final_svg = watermark::apply(&base_svg, watermark, width_px, height_px);

    let mut usvg_options = usvg::Options::default();
    usvg_options.dpi = config.print_size.dpi as f32;

    let tree = usvg::Tree::from_str(&final_svg, &usvg_options)
        .map_err(|error| PdfRenderError::InvalidSvg(error.to_string()))?;

    let conversion_options = svg2pdf::ConversionOptions::default();
    let page_options = svg2pdf::PageOptions {
        dpi: config.print_size.dpi as f32,
        ..Default::default()
    };

    let bytes = svg2pdf::to_pdf(&tree, conversion_options, page_options);

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let bytes_hash = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();

    Ok(RenderedPdf {
        bytes,
        bytes_hash,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_config() -> CalendarConfig {
        CalendarConfig {
            calendar_id: "cal-1".to_owned(),
            template_id: "classic".to_owned(),
            config_version: 3,
            year: 2026,
            months: vec![1, 2, 3],
            print_size: PrintSize::default(),
        }
    }

    #[test]
    fn render_is_byte_identical_across_calls() {
        let config = sample_config();
        let events = vec![CalendarEvent {
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            title: "Launch day".to_owned(),
        }];

        let first = render(&config, &events, true).expect("render succeeds");
        let second = render(&config, &events, true).expect("render succeeds");

        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.bytes_hash, second.bytes_hash);
    }

    #[test]
    fn watermark_flag_changes_output() {
        let config = sample_config();
        let watermarked = render(&config, &[], true).expect("render succeeds");
        let paid = render(&config, &[], false).expect("render succeeds");
        assert_ne!(watermarked.bytes_hash, paid.bytes_hash);
    }

    #[test]
    fn fingerprint_is_independent_of_watermark_flag() {
        let config = sample_config();
        let watermarked = render(&config, &[], true).expect("render succeeds");
        let paid = render(&config, &[], false).expect("render succeeds");
        assert_eq!(watermarked.fingerprint, paid.fingerprint);
    }
}
