//! PNG/JPG/PDF conversion of finished card SVGs, in-process via resvg and svg2pdf.
//!
//! Output depends on the fonts installed on the machine; it is not bit-exact across systems.

/// SVG user units per inch.
pub const CSS_DPI: f32 = 96.0;

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("failed to parse card SVG: {0}")]
    SvgParse(String),
    #[error("invalid raster size: {0}")]
    InvalidSize(String),
    #[error("failed to allocate a {width}x{height} pixmap")]
    PixmapAlloc { width: u32, height: u32 },
    #[error("failed to encode PNG: {0}")]
    PngEncode(String),
    #[error("invalid background color `{0}`")]
    Background(String),
    #[error("JPG output needs an opaque background color (got `{0}`)")]
    JpegOpaqueBackgroundRequired(String),
    #[error("failed to encode JPG: {0}")]
    JpegEncode(String),
    #[error("failed to convert SVG to PDF: {0}")]
    PdfConvert(String),
}

pub type Result<T> = std::result::Result<T, RasterError>;

/// How the card's SVG size maps to output pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RasterSize {
    /// Multiplier on the SVG's user-unit size.
    Scale(f32),
    /// Output width in pixels; height follows the aspect ratio.
    Width(u32),
    /// Dots per inch, with the SVG measured at 96 user units per inch.
    Dpi(f32),
}

impl RasterSize {
    /// The uniform scale factor for a document `svg_width` user units wide.
    pub fn scale_for(&self, svg_width: f32) -> Result<f32> {
        let scale = match *self {
            Self::Scale(s) => s,
            Self::Dpi(dpi) => dpi / CSS_DPI,
            Self::Width(px) => {
                if svg_width <= 0.0 {
                    return Err(RasterError::InvalidSize(format!(
                        "document width is {svg_width}"
                    )));
                }
                px as f32 / svg_width
            }
        };
        if scale.is_finite() && scale > 0.0 {
            Ok(scale)
        } else {
            Err(RasterError::InvalidSize(format!("{self:?}")))
        }
    }
}

#[derive(Debug, Clone)]
pub struct RasterOptions {
    pub size: RasterSize,
    pub background: Option<String>,
    pub jpeg_quality: u8,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            size: RasterSize::Scale(1.0),
            background: None,
            jpeg_quality: 90,
        }
    }
}

pub fn svg_to_png(svg: &str, options: &RasterOptions) -> Result<Vec<u8>> {
    let pixmap = svg_to_pixmap(svg, options.size, options.background.as_deref())?;
    pixmap
        .encode_png()
        .map_err(|e| RasterError::PngEncode(e.to_string()))
}

pub fn svg_to_jpeg(svg: &str, options: &RasterOptions) -> Result<Vec<u8>> {
    let bg = options.background.as_deref().unwrap_or("white");
    let color = parse_color(bg).ok_or_else(|| RasterError::Background(bg.to_string()))?;
    if color.alpha() < 1.0 {
        return Err(RasterError::JpegOpaqueBackgroundRequired(bg.to_string()));
    }

    let pixmap = svg_to_pixmap(svg, options.size, Some(bg))?;
    let (w, h) = (pixmap.width(), pixmap.height());
    // Opaque background, so every alpha byte is 255.
    let rgb: Vec<u8> = pixmap
        .data()
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();

    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, options.jpeg_quality.clamp(1, 100))
        .encode(&rgb, w, h, image::ExtendedColorType::Rgb8)
        .map_err(|e| RasterError::JpegEncode(e.to_string()))?;
    Ok(out)
}

/// Converts to a single-page vector PDF; raster sizing does not apply.
pub fn svg_to_pdf(svg: &str) -> Result<Vec<u8>> {
    let mut opt = svg2pdf::usvg::Options::default();
    opt.fontdb_mut().load_system_fonts();
    opt.font_family = "Arial".to_string();
    let tree = svg2pdf::usvg::Tree::from_str(svg, &opt)
        .map_err(|e| RasterError::SvgParse(e.to_string()))?;
    svg2pdf::to_pdf(
        &tree,
        svg2pdf::ConversionOptions::default(),
        svg2pdf::PageOptions::default(),
    )
    .map_err(|e| RasterError::PdfConvert(e.to_string()))
}

fn svg_to_pixmap(svg: &str, size: RasterSize, background: Option<&str>) -> Result<tiny_skia::Pixmap> {
    let mut opt = usvg::Options::default();
    opt.fontdb_mut().load_system_fonts();
    opt.font_family = "Arial".to_string();
    let tree = usvg::Tree::from_str(svg, &opt)
        .map_err(|e| RasterError::SvgParse(e.to_string()))?;

    // usvg already maps the root viewBox onto this size.
    let doc = tree.size();
    let scale = size.scale_for(doc.width())?;
    let width = (doc.width() * scale).ceil().max(1.0) as u32;
    let height = (doc.height() * scale).ceil().max(1.0) as u32;
    tracing::debug!(width, height, scale, "rasterizing card");

    let mut pixmap =
        tiny_skia::Pixmap::new(width, height).ok_or(RasterError::PixmapAlloc { width, height })?;
    if let Some(bg) = background {
        let color = parse_color(bg).ok_or_else(|| RasterError::Background(bg.to_string()))?;
        pixmap.fill(color);
    }
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(scale, scale),
        &mut pixmap.as_mut(),
    );
    Ok(pixmap)
}

/// Parses `transparent`, `white`, `black` and `#rgb`/`#rgba`/`#rrggbb`/`#rrggbbaa`.
pub fn parse_color(text: &str) -> Option<tiny_skia::Color> {
    let s = text.trim().to_ascii_lowercase();
    let rgba = match s.as_str() {
        "transparent" => [0, 0, 0, 0],
        "white" => [255, 255, 255, 255],
        "black" => [0, 0, 0, 255],
        _ => {
            let hex = s.strip_prefix('#')?;
            if !hex.is_ascii() {
                return None;
            }
            let digit = |i: usize, n: usize| u8::from_str_radix(&hex[i..i + n], 16).ok();
            match hex.len() {
                3 | 4 => {
                    let mut out = [255u8; 4];
                    for (i, slot) in out.iter_mut().enumerate().take(hex.len()) {
                        *slot = digit(i, 1)? * 17;
                    }
                    out
                }
                6 | 8 => {
                    let mut out = [255u8; 4];
                    for (i, slot) in out.iter_mut().enumerate().take(hex.len() / 2) {
                        *slot = digit(i * 2, 2)?;
                    }
                    out
                }
                _ => return None,
            }
        }
    };
    Some(tiny_skia::Color::from_rgba8(rgba[0], rgba[1], rgba[2], rgba[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="40" viewBox="0 0 20 40"><rect width="20" height="40" fill="black"/></svg>"#;

    fn png_dimensions(bytes: &[u8]) -> (u32, u32) {
        let w = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
        let h = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
        (w, h)
    }

    #[test]
    fn png_output_honors_every_sizing_mode() {
        for (size, expected) in [
            (RasterSize::Scale(2.0), (40, 80)),
            (RasterSize::Width(50), (50, 100)),
            (RasterSize::Dpi(192.0), (40, 80)),
        ] {
            let options = RasterOptions {
                size,
                ..Default::default()
            };
            let bytes = svg_to_png(CARD, &options).unwrap();
            assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"));
            assert_eq!(png_dimensions(&bytes), expected, "{size:?}");
        }
    }

    #[test]
    fn jpeg_requires_an_opaque_background() {
        let options = RasterOptions {
            background: Some("#ffffff80".into()),
            ..Default::default()
        };
        assert!(matches!(
            svg_to_jpeg(CARD, &options),
            Err(RasterError::JpegOpaqueBackgroundRequired(_))
        ));
        let bytes = svg_to_jpeg(CARD, &RasterOptions::default()).unwrap();
        assert!(bytes.starts_with(&[0xFF, 0xD8]));
    }

    #[test]
    fn pdf_output_has_pdf_signature() {
        assert!(svg_to_pdf(CARD).unwrap().starts_with(b"%PDF-"));
    }

    #[test]
    fn colors_parse_in_short_and_long_forms() {
        let c = parse_color("#f00").unwrap();
        assert_eq!(c.to_color_u8().red(), 255);
        assert_eq!(parse_color("#00ff0080").unwrap().to_color_u8().alpha(), 128);
        assert_eq!(parse_color("Transparent").unwrap().alpha(), 0.0);
        assert!(parse_color("#12345").is_none());
        assert!(parse_color("teal").is_none());
    }

    #[test]
    fn zero_or_negative_sizes_are_rejected() {
        assert!(RasterSize::Scale(0.0).scale_for(10.0).is_err());
        assert!(RasterSize::Width(100).scale_for(0.0).is_err());
        assert_eq!(RasterSize::Dpi(300.0).scale_for(10.0).unwrap(), 3.125);
    }
}
