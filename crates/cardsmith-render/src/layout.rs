//! Line layout: places a token stream inside a rectangular slot.
//!
//! The pass keeps a single `(x, y)` cursor where `y` is the baseline of the current line. Text
//! runs and inline formulas flow left to right and wrap before any token whose ink would cross the
//! right margin; block formulas get a line of their own, centered in the usable width. A token
//! wider than the whole usable width is placed at line start, so wrapping always makes progress.

use crate::formula::{ConversionError, FormulaRenderer, VectorFragment};
use crate::text::{TextMeasurer, TextStyle};
use cardsmith_core::{Align, LayoutConfig, OverflowPolicy, Token, TokenKind, tokenize};

const EPS: f64 = 1e-9;

/// A named rectangle of the template, in document coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Slot {
    pub fn new(id: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub font_family: String,
    pub font_size: f64,
    pub fill: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentContent {
    Text(TextRun),
    Formula {
        fragment: VectorFragment,
        block: bool,
    },
}

/// One placed token.
///
/// `y` is the baseline of the line the fragment belongs to; the fragment's box spans
/// `y - ascent ..= y + descent`. `width` is the ink width (trailing whitespace excluded).
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedFragment {
    pub content: FragmentContent,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub ascent: f64,
    pub descent: f64,
    pub line: usize,
    /// Index of the source token in the stream.
    pub token: usize,
}

impl PositionedFragment {
    pub fn top(&self) -> f64 {
        self.y - self.ascent
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.descent
    }

    pub fn is_block(&self) -> bool {
        matches!(self.content, FragmentContent::Formula { block: true, .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    Conversion(ConversionError),
    /// Removed by [`OverflowPolicy::Clip`].
    Clipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DroppedToken {
    pub token: usize,
    pub markup: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayoutOutcome {
    pub fragments: Vec<PositionedFragment>,
    pub dropped: Vec<DroppedToken>,
    /// Lowest edge reached by any fragment before clipping.
    pub bottom: f64,
    /// Whether content reached below `slot.y + slot.height - margins.bottom`.
    pub overflow: bool,
}

impl LayoutOutcome {
    pub fn conversion_failures(&self) -> impl Iterator<Item = &DroppedToken> {
        self.dropped
            .iter()
            .filter(|d| matches!(d.reason, DropReason::Conversion(_)))
    }
}

struct Cursor {
    x: f64,
    y: f64,
    line: usize,
    line_has_content: bool,
}

impl Cursor {
    fn new_line(&mut self, left: f64, line_h: f64) {
        self.y += line_h;
        self.x = left;
        self.line += 1;
        self.line_has_content = false;
    }
}

pub fn layout_markup(
    markup: &str,
    slot: &Slot,
    config: &LayoutConfig,
    measurer: &dyn TextMeasurer,
    formulas: &dyn FormulaRenderer,
) -> LayoutOutcome {
    layout_tokens(tokenize(markup), slot, config, measurer, formulas)
}

pub fn layout_tokens<'a>(
    tokens: impl IntoIterator<Item = Token<'a>>,
    slot: &Slot,
    config: &LayoutConfig,
    measurer: &dyn TextMeasurer,
    formulas: &dyn FormulaRenderer,
) -> LayoutOutcome {
    let m = config.margins;
    let left = slot.x + m.left;
    let right = slot.x + slot.width - m.right;
    let usable = (right - left).max(0.0);
    let font_size = config.font_size;
    let line_h = config.line_height_px();
    let rise = font_size * config.baseline_ratio;
    let style = TextStyle::new(config.font_family.clone(), font_size);

    let mut cur = Cursor {
        x: left,
        y: slot.y + m.top + font_size,
        line: 0,
        line_has_content: false,
    };
    let mut after_block = false;
    let mut out = LayoutOutcome::default();

    for (index, token) in tokens.into_iter().enumerate() {
        match token.kind {
            TokenKind::Newline => {
                // The block already ended its line.
                if !after_block {
                    cur.new_line(left, line_h);
                }
                after_block = false;
            }
            TokenKind::Word | TokenKind::Space => {
                after_block = false;
                let advance = measurer.measure(token.text, &style).width;
                let ink = measurer.measure(token.text.trim_end(), &style).width;
                if cur.line_has_content && cur.x + ink > right + EPS {
                    cur.new_line(left, line_h);
                }
                out.fragments.push(PositionedFragment {
                    content: FragmentContent::Text(TextRun {
                        text: token.text.to_string(),
                        font_family: config.font_family.clone(),
                        font_size,
                        fill: config.text_color.clone(),
                    }),
                    x: cur.x,
                    y: cur.y,
                    width: ink,
                    ascent: rise,
                    descent: font_size - rise,
                    line: cur.line,
                    token: index,
                });
                cur.x += advance;
                cur.line_has_content = true;
            }
            TokenKind::InlineFormula => {
                let fragment = match formulas.render(token.markup(), config.formula_scale) {
                    Ok(f) => f,
                    Err(e) => {
                        record_failure(&mut out, slot, index, token, e);
                        continue;
                    }
                };
                after_block = false;
                if cur.line_has_content && cur.x + fragment.width > right + EPS {
                    cur.new_line(left, line_h);
                }
                let width = fragment.width;
                out.fragments.push(PositionedFragment {
                    x: cur.x,
                    y: cur.y,
                    width,
                    ascent: rise,
                    descent: fragment.height - rise,
                    line: cur.line,
                    token: index,
                    content: FragmentContent::Formula {
                        fragment,
                        block: false,
                    },
                });
                cur.x += width + config.inline_gap;
                cur.line_has_content = true;
            }
            TokenKind::BlockFormula => {
                let fragment = match formulas.render(token.markup(), config.formula_scale) {
                    Ok(f) => f,
                    Err(e) => {
                        record_failure(&mut out, slot, index, token, e);
                        continue;
                    }
                };
                if cur.line_has_content {
                    cur.new_line(left, line_h);
                }
                let top = cur.y - font_size;
                let height = fragment.height;
                let width = fragment.width;
                out.fragments.push(PositionedFragment {
                    x: left + ((usable - width) / 2.0).max(0.0),
                    y: cur.y,
                    width,
                    ascent: font_size,
                    descent: height - font_size,
                    line: cur.line,
                    token: index,
                    content: FragmentContent::Formula {
                        fragment,
                        block: true,
                    },
                });
                tracing::debug!(slot = %slot.id, top, height, "placed block formula");
                let next_y = (top + height + line_h).max(cur.y);
                cur.new_line(left, 0.0);
                cur.y = next_y;
                after_block = true;
            }
        }
    }

    align_lines(&mut out.fragments, config.align, left, usable);

    let bound = slot.y + slot.height - m.bottom;
    out.bottom = out
        .fragments
        .iter()
        .map(PositionedFragment::bottom)
        .fold(slot.y + m.top, f64::max);
    out.overflow = out.bottom > bound + EPS;

    if out.overflow {
        match config.overflow {
            OverflowPolicy::Warn => {
                tracing::warn!(
                    slot = %slot.id,
                    bottom = out.bottom,
                    limit = bound,
                    "content overflows slot"
                );
            }
            OverflowPolicy::Clip => {
                let (kept, clipped): (Vec<_>, Vec<_>) = std::mem::take(&mut out.fragments)
                    .into_iter()
                    .partition(|f| f.bottom() <= bound + EPS);
                tracing::warn!(
                    slot = %slot.id,
                    clipped = clipped.len(),
                    "clipped fragments overflowing slot"
                );
                out.fragments = kept;
                out.dropped.extend(clipped.into_iter().map(|f| DroppedToken {
                    token: f.token,
                    markup: fragment_markup(&f),
                    reason: DropReason::Clipped,
                }));
            }
        }
    }

    out
}

fn record_failure(
    out: &mut LayoutOutcome,
    slot: &Slot,
    index: usize,
    token: Token<'_>,
    error: ConversionError,
) {
    tracing::warn!(slot = %slot.id, markup = token.markup(), %error, "dropping formula");
    out.dropped.push(DroppedToken {
        token: index,
        markup: token.markup().to_string(),
        reason: DropReason::Conversion(error),
    });
}

fn fragment_markup(f: &PositionedFragment) -> String {
    match &f.content {
        FragmentContent::Text(run) => run.text.clone(),
        FragmentContent::Formula { .. } => String::from("<formula>"),
    }
}

/// Shifts every flowed line by its free space. Block formulas are centered already.
fn align_lines(fragments: &mut [PositionedFragment], align: Align, left: f64, usable: f64) {
    if align == Align::Left {
        return;
    }
    let mut start = 0;
    while start < fragments.len() {
        let line = fragments[start].line;
        let end = fragments[start..]
            .iter()
            .position(|f| f.line != line)
            .map_or(fragments.len(), |n| start + n);
        let run = &mut fragments[start..end];
        start = end;

        if run.iter().any(PositionedFragment::is_block) {
            continue;
        }
        let extent = run
            .iter()
            .map(|f| f.x + f.width)
            .fold(left, f64::max)
            - left;
        let free = (usable - extent).max(0.0);
        let shift = match align {
            Align::Left => 0.0,
            Align::Center => free / 2.0,
            Align::Right => free,
        };
        for f in run.iter_mut() {
            f.x += shift;
        }
    }
}

#[cfg(test)]
mod tests;
