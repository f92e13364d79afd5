use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use unicode_width::UnicodeWidthChar;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    pub font_family: Option<String>,
    pub font_size: f64,
    pub font_weight: Option<String>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: None,
            font_size: 28.0,
            font_weight: None,
        }
    }
}

impl TextStyle {
    pub fn new(font_family: impl Into<String>, font_size: f64) -> Self {
        Self {
            font_family: Some(font_family.into()),
            font_size,
            font_weight: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextMetrics {
    pub width: f64,
    pub height: f64,
    pub line_count: usize,
}

/// Measures a run of text. Implementations must be pure: the same input always yields the same
/// metrics, which keeps layout idempotent.
pub trait TextMeasurer {
    fn measure(&self, text: &str, style: &TextStyle) -> TextMetrics;
}

/// Font-independent measurer: every display column is `font_size * char_width_factor` wide.
///
/// Column widths come from `unicode-width`, so CJK ideographs count double and combining marks
/// count zero. Any whitespace counts as one column.
#[derive(Debug, Clone, Default)]
pub struct DeterministicTextMeasurer {
    pub char_width_factor: f64,
    pub line_height_factor: f64,
}

impl DeterministicTextMeasurer {
    fn factors(&self) -> (f64, f64) {
        let char_width_factor = if self.char_width_factor == 0.0 {
            0.6
        } else {
            self.char_width_factor
        };
        let line_height_factor = if self.line_height_factor == 0.0 {
            1.2
        } else {
            self.line_height_factor
        };
        (char_width_factor, line_height_factor)
    }
}

fn display_columns(line: &str) -> usize {
    line.chars()
        .map(|c| {
            if c.is_whitespace() {
                1
            } else {
                c.width().unwrap_or(0)
            }
        })
        .sum()
}

impl TextMeasurer for DeterministicTextMeasurer {
    fn measure(&self, text: &str, style: &TextStyle) -> TextMetrics {
        let (char_width_factor, line_height_factor) = self.factors();
        let font_size = style.font_size.max(1.0);

        let mut max_cols = 0usize;
        let mut line_count = 0usize;
        for line in text.split('\n') {
            line_count += 1;
            max_cols = max_cols.max(display_columns(line.trim_end_matches('\r')));
        }

        TextMetrics {
            width: max_cols as f64 * font_size * char_width_factor,
            height: line_count as f64 * font_size * line_height_factor,
            line_count,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FontLoadError {
    #[error("failed to read font {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse font {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

/// Measures with the horizontal advances of a real TrueType/OpenType face.
///
/// Characters the face has no glyph for fall back to `fallback_char_width_factor * font_size`.
/// The face is re-parsed per call; `ttf_parser::Face::parse` only reads table offsets.
#[derive(Debug, Clone)]
pub struct FontFileTextMeasurer {
    data: Vec<u8>,
    index: u32,
    units_per_em: f64,
    line_gap_factor: f64,
    pub fallback_char_width_factor: f64,
}

impl FontFileTextMeasurer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FontLoadError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| FontLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(data, 0).map_err(|message| FontLoadError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_bytes(data: Vec<u8>, index: u32) -> Result<Self, String> {
        let face = ttf_parser::Face::parse(&data, index).map_err(|e| e.to_string())?;
        let units_per_em = f64::from(face.units_per_em().max(1));
        let ascender = f64::from(face.ascender());
        let descender = f64::from(face.descender());
        let line_gap = f64::from(face.line_gap());
        let line_gap_factor = ((ascender - descender + line_gap) / units_per_em).max(0.5);
        Ok(Self {
            data,
            index,
            units_per_em,
            line_gap_factor,
            fallback_char_width_factor: 0.6,
        })
    }

    fn line_width(&self, face: Option<&ttf_parser::Face<'_>>, line: &str, font_size: f64) -> f64 {
        let scale = font_size / self.units_per_em;
        line.chars()
            .map(|ch| {
                face.and_then(|f| f.glyph_index(ch))
                    .and_then(|gid| face.and_then(|f| f.glyph_hor_advance(gid)))
                    .map(|adv| f64::from(adv) * scale)
                    .unwrap_or_else(|| {
                        if ch.is_whitespace() || ch.width().unwrap_or(0) > 0 {
                            font_size * self.fallback_char_width_factor
                        } else {
                            0.0
                        }
                    })
            })
            .sum()
    }
}

impl TextMeasurer for FontFileTextMeasurer {
    fn measure(&self, text: &str, style: &TextStyle) -> TextMetrics {
        let font_size = style.font_size.max(1.0);
        let face = ttf_parser::Face::parse(&self.data, self.index).ok();

        let mut width = 0.0f64;
        let mut line_count = 0usize;
        for line in text.split('\n') {
            line_count += 1;
            width = width.max(self.line_width(face.as_ref(), line.trim_end_matches('\r'), font_size));
        }

        TextMetrics {
            width,
            height: line_count as f64 * font_size * self.line_gap_factor,
            line_count,
        }
    }
}
