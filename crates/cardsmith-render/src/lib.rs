#![forbid(unsafe_code)]

//! Layout and SVG assembly for cardsmith cards.
//!
//! Data flows leaves first: [`text`] and [`formula`] measure content, [`layout`] positions a token
//! stream inside a slot, [`compose`] turns positioned fragments into SVG nodes, and [`template`]
//! merges them into the card template.

pub mod compose;
pub mod formula;
pub mod layout;
pub mod svgdom;
pub mod template;
pub mod text;

use std::path::PathBuf;

pub use compose::{ComposedSlot, compose_slot};
pub use formula::{
    CachedFormulaRenderer, ConversionError, FormulaRenderer, LatexFormulaRenderer, Toolchain,
    VectorFragment,
};
pub use layout::{
    DropReason, DroppedToken, FragmentContent, LayoutOutcome, PositionedFragment, Slot, TextRun,
    layout_markup, layout_tokens,
};
pub use svgdom::{SvgDocument, SvgElement, SvgNode, SvgParseError};
pub use template::{SlotIndex, Template};
pub use text::{
    DeterministicTextMeasurer, FontFileTextMeasurer, TextMeasurer, TextMetrics, TextStyle,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid SVG template: {0}")]
    Template(#[from] SvgParseError),
    #[error("slot `{name}` not found in template")]
    MissingSlot { name: String },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported image type: {}", path.display())]
    UnsupportedImage { path: PathBuf },
    #[error(transparent)]
    Formula(#[from] ConversionError),
}

pub type Result<T> = std::result::Result<T, Error>;
