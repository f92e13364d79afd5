//! Deck-wide rendering on a rayon pool.
//!
//! Cards are independent: each one clones the template, renders and writes its own files. A card
//! whose record failed to load, or whose files cannot be written, is reported and the batch keeps
//! going. Reports come back in deck order regardless of scheduling.

use crate::card::{CardError, CardRenderer, SlotReport, SlotStatus};
use crate::{Error, Result};
use cardsmith_core::DeckEntry;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Svg,
    Png,
    Jpeg,
    Pdf,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Pdf => "pdf",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(Self::Svg),
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "pdf" => Ok(Self::Pdf),
            other => Err(format!("unknown output format `{other}` (expected svg, png, jpg or pdf)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub out_dir: PathBuf,
    /// The SVG is always written; any other format is converted from it.
    pub format: OutputFormat,
    /// Worker threads; `None` uses rayon's default.
    pub jobs: Option<usize>,
    /// Stop scheduling new cards after the first failed card.
    pub fail_fast: bool,
    #[cfg(feature = "raster")]
    pub raster: crate::raster::RasterOptions,
}

impl BatchOptions {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            format: OutputFormat::Svg,
            jobs: None,
            fail_fast: false,
            #[cfg(feature = "raster")]
            raster: crate::raster::RasterOptions::default(),
        }
    }
}

/// Files written for one card.
#[derive(Debug)]
pub struct WrittenCard {
    pub svg: PathBuf,
    /// The converted file for non-SVG formats, or why conversion failed. The SVG is kept either
    /// way.
    pub converted: Option<std::result::Result<PathBuf, String>>,
}

#[derive(Debug)]
pub struct CardReport {
    pub id: String,
    pub slots: Vec<SlotReport>,
    pub result: std::result::Result<WrittenCard, CardError>,
}

impl CardReport {
    pub fn produced_svg(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub cards: usize,
    pub rendered: usize,
    pub failed: usize,
    pub aborted: usize,
    pub conversion_failed: usize,
    pub slots_ok: usize,
    pub slots_skipped: usize,
    pub slots_failed: usize,
}

impl BatchSummary {
    pub fn from_reports(reports: &[CardReport]) -> Self {
        let mut s = Self {
            cards: reports.len(),
            ..Self::default()
        };
        for r in reports {
            match &r.result {
                Ok(written) => {
                    s.rendered += 1;
                    if matches!(written.converted, Some(Err(_))) {
                        s.conversion_failed += 1;
                    }
                }
                Err(CardError::Aborted) => s.aborted += 1,
                Err(_) => s.failed += 1,
            }
            for slot in &r.slots {
                match slot.status {
                    SlotStatus::Ok => s.slots_ok += 1,
                    SlotStatus::Skip => s.slots_skipped += 1,
                    SlotStatus::Fail => s.slots_failed += 1,
                }
            }
        }
        s
    }

    /// Every card produced its SVG.
    pub fn is_success(&self) -> bool {
        self.rendered == self.cards
    }
}

/// Converts a card id into a safe file stem: anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn file_stem_for(id: &str) -> String {
    let id = id.trim();
    if id.is_empty() {
        return "card".to_string();
    }
    let stem: String = id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if stem.starts_with('.') {
        format!("_{stem}")
    } else {
        stem
    }
}

/// Renders every entry and writes `<out_dir>/<id>.svg` (plus the converted file, if any).
/// Cards sharing a file stem get `-2`, `-3`, ... suffixes in deck order.
///
/// `abort` can be raised from outside (or by `fail_fast`) to skip the cards not yet started;
/// those are reported as [`CardError::Aborted`].
pub fn run_batch(
    renderer: &CardRenderer,
    entries: Vec<DeckEntry>,
    options: &BatchOptions,
    abort: &AtomicBool,
) -> Result<Vec<CardReport>> {
    std::fs::create_dir_all(&options.out_dir).map_err(|source| Error::Io {
        path: options.out_dir.clone(),
        source,
    })?;
    let stems = unique_stems(&entries);

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = options.jobs {
        builder = builder.num_threads(n.max(1));
    }
    let pool = builder.build()?;
    tracing::debug!(
        cards = entries.len(),
        threads = pool.current_num_threads(),
        "starting batch"
    );

    let reports = pool.install(|| {
        entries
            .into_par_iter()
            .zip(stems)
            .map(|(entry, stem)| {
                if abort.load(Ordering::SeqCst) {
                    return CardReport {
                        id: entry.id,
                        slots: Vec::new(),
                        result: Err(CardError::Aborted),
                    };
                }
                let report = render_entry(renderer, entry, &stem, options);
                if options.fail_fast && !report.produced_svg() {
                    abort.store(true, Ordering::SeqCst);
                }
                report
            })
            .collect::<Vec<_>>()
    });
    Ok(reports)
}

fn render_entry(
    renderer: &CardRenderer,
    entry: DeckEntry,
    stem: &str,
    options: &BatchOptions,
) -> CardReport {
    let card = match entry.record {
        Ok(card) => card,
        Err(e) => {
            tracing::warn!(card = %entry.id, error = %e, "skipping malformed card");
            return CardReport {
                id: entry.id,
                slots: Vec::new(),
                result: Err(CardError::Config(e)),
            };
        }
    };

    let output = renderer.render(&card);
    let result = write_outputs(&output.svg, &options.out_dir, stem, options);
    CardReport {
        id: output.id,
        slots: output.slots,
        result,
    }
}

fn write_outputs(
    svg: &str,
    out_dir: &Path,
    stem: &str,
    options: &BatchOptions,
) -> std::result::Result<WrittenCard, CardError> {
    let svg_path = out_dir.join(format!("{stem}.svg"));
    write_file(&svg_path, svg.as_bytes())?;

    let converted = match options.format {
        OutputFormat::Svg => None,
        format => {
            let path = out_dir.join(format!("{stem}.{}", format.extension()));
            let result = convert(svg, format, options).and_then(|bytes| {
                write_file(&path, &bytes).map_err(|e| e.to_string())?;
                Ok(path)
            });
            if let Err(e) = &result {
                tracing::warn!(card = %stem, format = format.extension(), error = %e, "conversion failed; SVG kept");
            }
            Some(result)
        }
    };

    Ok(WrittenCard {
        svg: svg_path,
        converted,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> std::result::Result<(), CardError> {
    std::fs::write(path, bytes).map_err(|source| CardError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(feature = "raster")]
fn convert(
    svg: &str,
    format: OutputFormat,
    options: &BatchOptions,
) -> std::result::Result<Vec<u8>, String> {
    use crate::raster;
    let out = match format {
        OutputFormat::Svg => return Ok(svg.as_bytes().to_vec()),
        OutputFormat::Png => raster::svg_to_png(svg, &options.raster),
        OutputFormat::Jpeg => raster::svg_to_jpeg(svg, &options.raster),
        OutputFormat::Pdf => raster::svg_to_pdf(svg),
    };
    out.map_err(|e| e.to_string())
}

#[cfg(not(feature = "raster"))]
fn convert(
    svg: &str,
    format: OutputFormat,
    _options: &BatchOptions,
) -> std::result::Result<Vec<u8>, String> {
    match format {
        OutputFormat::Svg => Ok(svg.as_bytes().to_vec()),
        other => Err(format!(
            "{} output needs the `raster` feature",
            other.extension()
        )),
    }
}

/// One stem per entry, distinct even on case-insensitive filesystems.
fn unique_stems(entries: &[DeckEntry]) -> Vec<String> {
    let mut taken = HashSet::new();
    entries
        .iter()
        .map(|e| {
            let base = file_stem_for(&e.id);
            let mut stem = base.clone();
            let mut n = 1;
            while !taken.insert(stem.to_ascii_lowercase()) {
                n += 1;
                stem = format!("{base}-{n}");
            }
            if n > 1 {
                tracing::warn!(card = %e.id, file = %stem, "duplicate card id; writing a suffixed file");
            }
            stem
        })
        .collect()
}
