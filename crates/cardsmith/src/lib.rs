#![forbid(unsafe_code)]

//! `cardsmith` turns card records into printable cards: an SVG template with named placeholder
//! slots is filled with titles, prose mixed with LaTeX formulas, images and standalone formulas.
//!
//! The pipeline lives in [`card`] (one card) and [`batch`] (a whole deck on a rayon pool). The
//! building blocks are re-exported from `cardsmith-core` and `cardsmith-render`.
//!
//! # Features
//!
//! - `raster`: enable PNG/JPG/PDF output via pure-Rust SVG rasterization/conversion

pub mod batch;
pub mod card;
#[cfg(feature = "raster")]
pub mod raster;

use std::path::PathBuf;

pub use batch::{BatchOptions, BatchSummary, CardReport, OutputFormat, WrittenCard, run_batch};
pub use card::{CardError, CardOutput, CardRenderer, SlotReport, SlotStatus};
pub use cardsmith_core::{
    Align, CardRecord, DeckEntry, LayoutConfig, Margins, OverflowPolicy, Token, TokenKind,
    load_card_dirs, load_deck_file, tokenize,
};
pub use cardsmith_render::{
    CachedFormulaRenderer, ConversionError, DeterministicTextMeasurer, FontFileTextMeasurer,
    FormulaRenderer, LatexFormulaRenderer, Template, TextMeasurer, Toolchain, VectorFragment,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Deck(#[from] cardsmith_core::Error),
    #[error(transparent)]
    Render(#[from] cardsmith_render::Error),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Loads the deck at `path`: a deck file, or a directory with one sub-directory per card.
pub fn load_deck(path: impl AsRef<std::path::Path>) -> Result<Vec<DeckEntry>> {
    let path = path.as_ref();
    let entries = if path.is_dir() {
        load_card_dirs(path)?
    } else {
        load_deck_file(path)?
    };
    Ok(entries)
}
