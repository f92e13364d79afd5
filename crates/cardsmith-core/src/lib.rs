#![forbid(unsafe_code)]

//! Card markup tokenizer and configuration model (headless, no I/O beyond deck loading).
//!
//! Design goals:
//! - pure, restartable tokenization of mixed prose + formula markup
//! - explicit value objects for layout settings (no process-wide state)
//! - per-card isolation: one malformed record never poisons the rest of a deck

pub mod config;
pub mod deck;
pub mod error;
pub mod markup;

pub use config::{Align, CardRecord, LayoutConfig, Margins, OverflowPolicy};
pub use deck::{DeckEntry, load_card_dirs, load_deck_file, parse_deck_csv, parse_deck_value};
pub use error::{Error, Result};
pub use markup::{Token, TokenKind, Tokens, tokenize};
