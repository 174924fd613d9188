use std::fmt::Write as _;

/// Composite the watermark policy into an already-built SVG document, at the
/// SVG level so it participates in transcoding. Free tier gets
/// a tiled diagonal overlay; paid tier gets a small footer instead.
pub fn apply(svg: &str, watermark: bool, width_px: u32, height_px: u32) -> String {
    let overlay = if watermark {
        tiled_diagonal_overlay(width_px, height_px)
    } else {
        paid_footer(width_px, height_px)
    };

    match svg.rfind("</svg>") {
        Some(index) => format!("{}{}{}", &svg[..index], overlay, &svg[index..]),
        None => format!("{svg}{overlay}"),
    }
}

fn tiled_diagonal_overlay(width_px: u32, height_px: u32) -> String {
    let tile = 400;
    let mut overlay = String::new();
    overlay.push_str(r#"<g opacity="0.12">"#);

    let mut y = 0i64;
    while y < height_px as i64 + tile {
        let mut x = 0i64;
        while x < width_px as i64 + tile {
            let _ = write!(
                overlay,
                r#"<text x="{x}" y="{y}" font-size="48" font-family="sans-serif" fill="#000000" transform="rotate(-30 {x} {y})">SAMPLE</text>"#,
            );
            x += tile;
        }
        y += tile;
    }

    overlay.push_str("</g>");
    overlay
}

fn paid_footer(width_px: u32, height_px: u32) -> String {
    format!(
        r#"<text x="{x}" y="{y}" font-size="14" fill="#888888" text-anchor="end">printed with calyx</text>"#,
        x = width_px.saturating_sub(16),
        y = height_px.saturating_sub(16),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermarked_svg_contains_sample_tiles() {
        let base = r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100"></svg>"#;
        let watermarked = apply(base, true, 100, 100);
        assert!(watermarked.contains("SAMPLE"));
    }

    #[test]
    fn paid_tier_gets_footer_not_tiles() {
        let base = r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100"></svg>"#;
        let rendered = apply(base, false, 100, 100);
        assert!(!rendered.contains("SAMPLE"));
        assert!(rendered.contains("printed with calyx"));
    }
}
