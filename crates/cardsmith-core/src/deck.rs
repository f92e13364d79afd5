//! Deck loading: one record per card, either from a single tabular/structured file or from a
//! directory holding one sub-directory per card.
//!
//! A deck that cannot be read at all is an error. A single malformed record is not: it becomes a
//! [`DeckEntry`] carrying the error so the batch can report it and move on.

use crate::config::CardRecord;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const CARD_CONFIG_NAMES: &[&str] = &["config.yml", "config.yaml", "card.yml", "config.json"];

#[derive(Debug)]
pub struct DeckEntry {
    /// Best-effort card id, available even when the record failed to parse.
    pub id: String,
    pub record: Result<CardRecord>,
}

impl DeckEntry {
    fn from_record(record: Result<CardRecord>, fallback_id: String) -> Self {
        let id = match &record {
            Ok(card) => card.id.clone(),
            Err(_) => fallback_id,
        };
        Self { id, record }
    }
}

fn row_id(index: usize) -> String {
    format!("{:03}", index + 1)
}

/// Loads a deck file, dispatching on its extension.
pub fn load_deck_file(path: impl AsRef<Path>) -> Result<Vec<DeckEntry>> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let base_dir = path.parent().map(Path::to_path_buf);

    let entries = match ext.as_str() {
        "yml" | "yaml" => {
            let value: Value = serde_yaml::from_str(&text).map_err(|e| Error::InvalidDeck {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            parse_deck_value(&value).map_err(|message| Error::InvalidDeck {
                path: path.to_path_buf(),
                message,
            })?
        }
        "json" => {
            let value: Value = serde_json::from_str(&text).map_err(|e| Error::InvalidDeck {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            parse_deck_value(&value).map_err(|message| Error::InvalidDeck {
                path: path.to_path_buf(),
                message,
            })?
        }
        "csv" | "tsv" | "txt" => parse_deck_csv(&text).map_err(|message| Error::InvalidDeck {
            path: path.to_path_buf(),
            message,
        })?,
        _ => {
            return Err(Error::UnsupportedDeckFormat {
                path: path.to_path_buf(),
            });
        }
    };

    Ok(entries
        .into_iter()
        .map(|mut entry| {
            if let (Ok(card), Some(dir)) = (&mut entry.record, base_dir.as_ref()) {
                if card.base_dir.is_none() {
                    card.base_dir = Some(dir.clone());
                }
            }
            entry
        })
        .collect())
}

/// Accepts either a list of records or `{ defaults: {...}, cards: [...] }`.
///
/// `defaults` is merged underneath every record (record keys win).
pub fn parse_deck_value(value: &Value) -> std::result::Result<Vec<DeckEntry>, String> {
    let (defaults, cards) = match value {
        Value::Array(cards) => (None, cards),
        Value::Object(map) => {
            let Some(Value::Array(cards)) = map.get("cards") else {
                return Err("expected a list of cards or a mapping with a `cards` list".into());
            };
            let defaults = match map.get("defaults") {
                None | Some(Value::Null) => None,
                Some(Value::Object(d)) => Some(d),
                Some(_) => return Err("`defaults` must be a mapping".into()),
            };
            (defaults, cards)
        }
        _ => return Err("expected a list of cards or a mapping with a `cards` list".into()),
    };

    Ok(cards
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let fallback = row_id(idx);
            let merged = match (defaults, raw) {
                (Some(d), Value::Object(card)) => {
                    let mut out = d.clone();
                    for (k, v) in card {
                        out.insert(k.clone(), v.clone());
                    }
                    Value::Object(out)
                }
                _ => raw.clone(),
            };
            let fallback_id = raw
                .get("id")
                .and_then(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .unwrap_or_else(|| fallback.clone());
            DeckEntry::from_record(CardRecord::from_value(&merged, &fallback), fallback_id)
        })
        .collect())
}

/// Parses a delimited table with a header row. The delimiter is `;` when the header contains
/// one, `\t` when it contains a tab, and `,` otherwise. Fields may be double-quoted; `""` inside
/// quotes is a literal quote and quoted fields may span lines.
pub fn parse_deck_csv(text: &str) -> std::result::Result<Vec<DeckEntry>, String> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let header_line = text.lines().next().unwrap_or_default();
    let delimiter = if header_line.contains(';') {
        ';'
    } else if header_line.contains('\t') {
        '\t'
    } else {
        ','
    };

    let mut rows = split_delimited(text, delimiter)?.into_iter();
    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();

    let mut out = Vec::new();
    for (idx, row) in rows.enumerate() {
        if row.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let fallback = row_id(idx);
        let mut map = Map::new();
        for (key, field) in header.iter().zip(row.iter()) {
            if key.is_empty() {
                continue;
            }
            map.insert(key.clone(), Value::String(field.replace("\\n", "\n")));
        }
        let record = if row.len() > header.len() {
            Err(Error::invalid_card(
                &fallback,
                format!(
                    "row has {} fields but the header has {}",
                    row.len(),
                    header.len()
                ),
            ))
        } else {
            CardRecord::from_value(&Value::Object(map.clone()), &fallback)
        };
        let fallback_id = map
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or(fallback);
        out.push(DeckEntry::from_record(record, fallback_id));
    }
    Ok(out)
}

fn split_delimited(text: &str, delimiter: char) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                c => field.push(c),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => in_quotes = true,
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            c if c == delimiter => row.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

/// Loads one card per sub-directory of `dir`, sorted by directory name.
///
/// Each card directory holds a configuration file (see `CARD_CONFIG_NAMES`) plus its assets; the
/// directory name is the default card id and relative asset paths resolve inside it.
pub fn load_card_dirs(dir: impl AsRef<Path>) -> Result<Vec<DeckEntry>> {
    let dir = dir.as_ref();
    let read = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut card_dirs: Vec<PathBuf> = read
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    card_dirs.sort();

    Ok(card_dirs
        .into_iter()
        .map(|card_dir| {
            let fallback_id = card_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "card".to_string());
            let record = load_card_dir(&card_dir, &fallback_id);
            DeckEntry::from_record(record, fallback_id)
        })
        .collect())
}

fn load_card_dir(card_dir: &Path, fallback_id: &str) -> Result<CardRecord> {
    let Some(config_path) = CARD_CONFIG_NAMES
        .iter()
        .map(|name| card_dir.join(name))
        .find(|p| p.is_file())
    else {
        return Err(Error::MissingCardConfig {
            dir: card_dir.to_path_buf(),
        });
    };

    let text = std::fs::read_to_string(&config_path).map_err(|e| Error::io(&config_path, e))?;
    let is_json = config_path.extension().is_some_and(|e| e == "json");
    let value: Value = if is_json {
        serde_json::from_str(&text).map_err(|e| Error::invalid_card(fallback_id, e.to_string()))?
    } else {
        serde_yaml::from_str(&text).map_err(|e| Error::invalid_card(fallback_id, e.to_string()))?
    };
    Ok(CardRecord::from_value(&value, fallback_id)?.with_base_dir(card_dir))
}
