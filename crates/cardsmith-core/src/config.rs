use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

impl Align {
    pub fn as_str(&self) -> &'static str {
        match self {
            Align::Left => "left",
            Align::Center => "center",
            Align::Right => "right",
        }
    }
}

impl FromStr for Align {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "start" => Ok(Self::Left),
            "center" | "centre" | "middle" => Ok(Self::Center),
            "right" | "end" => Ok(Self::Right),
            _ => Err(()),
        }
    }
}

/// What to do when laid-out content runs past the bottom of its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Keep every fragment and log a warning.
    #[default]
    Warn,
    /// Drop fragments whose bottom edge crosses the slot's bottom margin.
    Clip,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 12.0,
            right: 10.0,
            bottom: 10.0,
            left: 10.0,
        }
    }
}

impl Margins {
    pub fn uniform(v: f64) -> Self {
        Self {
            top: v,
            right: v,
            bottom: v,
            left: v,
        }
    }
}

/// Settings for one layout pass. Every knob the line layout engine reads lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub font_family: String,
    pub font_size: f64,
    /// Line height as a multiple of `font_size`.
    pub line_height: f64,
    pub margins: Margins,
    /// Horizontal space added after every inline formula.
    pub inline_gap: f64,
    /// Inline formulas are lifted by `font_size * baseline_ratio` above the text baseline.
    pub baseline_ratio: f64,
    /// Scale handed to the formula renderer; applied once when the formula is typeset.
    pub formula_scale: f64,
    pub text_color: Option<String>,
    pub align: Align,
    pub overflow: OverflowPolicy,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            font_family: "Arial".to_string(),
            font_size: 28.0,
            line_height: 1.3,
            margins: Margins::default(),
            inline_gap: 5.0,
            baseline_ratio: 0.82,
            formula_scale: 2.5,
            text_color: None,
            align: Align::Left,
            overflow: OverflowPolicy::Warn,
        }
    }
}

impl LayoutConfig {
    pub fn line_height_px(&self) -> f64 {
        self.font_size * self.line_height
    }

    pub fn with_align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }

    /// Applies the per-card overrides carried by `card`.
    pub fn for_card(&self, card: &CardRecord) -> Self {
        let mut out = self.clone();
        if let Some(v) = card.font_size {
            out.font_size = v;
        }
        if let Some(v) = card.line_height {
            out.line_height = v;
        }
        if let Some(v) = card.text_color.as_ref() {
            out.text_color = Some(v.clone());
        }
        out
    }
}

/// One card's configuration. Missing keys leave the matching slot untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CardRecord {
    pub id: String,
    pub title: Option<String>,
    pub text1: Option<String>,
    pub text2: Option<String>,
    pub image_path: Option<PathBuf>,
    pub formula1: Option<String>,
    pub formula2: Option<String>,
    pub bg_color: Option<String>,
    pub frame_color: Option<String>,
    pub text_color: Option<String>,
    pub font_size: Option<f64>,
    pub line_height: Option<f64>,
    /// Per-slot alignment, keyed by slot name or by content key (`text1`, `title`, ...).
    pub align: IndexMap<String, Align>,
    /// Directory that relative asset paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

const KNOWN_KEYS: &[&str] = &[
    "id",
    "title",
    "text1",
    "text2",
    "image_path",
    "image",
    "formula1",
    "formula2",
    "bg_color",
    "frame_color",
    "text_color",
    "font_size",
    "line_height",
    "align",
];

impl CardRecord {
    /// Builds a record from a JSON-like map (YAML and CSV rows are converted to this shape).
    ///
    /// `fallback_id` is used when the record carries no usable `id`.
    pub fn from_value(value: &Value, fallback_id: &str) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::invalid_card(
                fallback_id,
                format!("expected a mapping, found {}", value_kind(value)),
            ));
        };

        let id = match map.get("id") {
            None => fallback_id.to_string(),
            Some(v) if is_blank(v) => fallback_id.to_string(),
            Some(v) => scalar_string(v)
                .map(|s| s.trim().to_string())
                .ok_or_else(|| Error::invalid_card(fallback_id, "`id` must be a string or number"))?,
        };

        let mut card = CardRecord {
            id: id.clone(),
            ..Default::default()
        };

        card.title = optional_text(map, "title", &id)?;
        card.text1 = optional_text(map, "text1", &id)?;
        card.text2 = optional_text(map, "text2", &id)?;
        card.formula1 = optional_text(map, "formula1", &id)?;
        card.formula2 = optional_text(map, "formula2", &id)?;
        card.bg_color = optional_text(map, "bg_color", &id)?;
        card.frame_color = optional_text(map, "frame_color", &id)?;
        card.text_color = optional_text(map, "text_color", &id)?;

        let image = match optional_text(map, "image_path", &id)? {
            Some(v) => Some(v),
            None => optional_text(map, "image", &id)?,
        };
        card.image_path = image.map(PathBuf::from);

        card.font_size = optional_positive(map, "font_size", &id)?;
        card.line_height = optional_positive(map, "line_height", &id)?;

        if let Some(align) = map.get("align") {
            match align {
                Value::Null => {}
                Value::Object(entries) => {
                    for (slot, v) in entries {
                        card.align.insert(slot.clone(), parse_align(v, slot, &id)?);
                    }
                }
                other => {
                    return Err(Error::invalid_card(
                        &id,
                        format!("`align` must be a mapping, found {}", value_kind(other)),
                    ));
                }
            }
        }

        for (key, v) in map {
            if let Some(slot) = key.strip_prefix("align_") {
                if is_blank(v) {
                    continue;
                }
                card.align.insert(slot.to_string(), parse_align(v, key, &id)?);
            } else if !KNOWN_KEYS.contains(&key.as_str()) {
                tracing::debug!(card = %id, key = %key, "ignoring unknown card key");
            }
        }

        Ok(card)
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// The image path resolved against [`CardRecord::base_dir`].
    pub fn resolved_image_path(&self) -> Option<PathBuf> {
        let path = self.image_path.as_ref()?;
        Some(resolve_relative(self.base_dir.as_deref(), path))
    }

    /// Alignment for a slot: looked up by slot name first, then by content key.
    pub fn align_for(&self, slot_name: &str, content_key: &str) -> Option<Align> {
        self.align
            .get(slot_name)
            .or_else(|| self.align.get(content_key))
            .copied()
    }
}

fn resolve_relative(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn optional_text(map: &Map<String, Value>, key: &str, id: &str) -> Result<Option<String>> {
    let Some(v) = map.get(key) else {
        return Ok(None);
    };
    if is_blank(v) {
        return Ok(None);
    }
    scalar_string(v).map(Some).ok_or_else(|| {
        Error::invalid_card(
            id,
            format!("`{key}` must be text, found {}", value_kind(v)),
        )
    })
}

fn optional_positive(map: &Map<String, Value>, key: &str, id: &str) -> Result<Option<f64>> {
    let Some(v) = map.get(key) else {
        return Ok(None);
    };
    if is_blank(v) {
        return Ok(None);
    }
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() && n > 0.0 => Ok(Some(n)),
        _ => Err(Error::invalid_card(
            id,
            format!("`{key}` must be a positive number"),
        )),
    }
}

fn parse_align(v: &Value, key: &str, id: &str) -> Result<Align> {
    v.as_str()
        .and_then(|s| s.parse::<Align>().ok())
        .ok_or_else(|| {
            Error::invalid_card(
                id,
                format!("alignment for `{key}` must be one of left, center, right"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_reads_known_keys_and_aliases() {
        let v = json!({
            "id": 7,
            "title": "Pythagoras",
            "text1": "Let $a$ and $b$ be legs",
            "image": "img/tri.png",
            "font_size": "24",
            "align": { "text1_slot": "center" },
            "align_title": "right",
        });
        let card = CardRecord::from_value(&v, "001").unwrap();
        assert_eq!(card.id, "7");
        assert_eq!(card.title.as_deref(), Some("Pythagoras"));
        assert_eq!(card.image_path, Some(PathBuf::from("img/tri.png")));
        assert_eq!(card.font_size, Some(24.0));
        assert_eq!(card.align_for("text1_slot", "text1"), Some(Align::Center));
        assert_eq!(card.align_for("title_slot", "title"), Some(Align::Right));
        assert_eq!(card.align_for("text2_slot", "text2"), None);
    }

    #[test]
    fn blank_values_mean_missing() {
        let v = json!({ "text1": "  ", "font_size": "", "image_path": null });
        let card = CardRecord::from_value(&v, "002").unwrap();
        assert_eq!(card.id, "002");
        assert!(card.text1.is_none());
        assert!(card.font_size.is_none());
        assert!(card.image_path.is_none());
    }

    #[test]
    fn malformed_values_are_reported() {
        let bad_size = json!({ "font_size": "huge" });
        let err = CardRecord::from_value(&bad_size, "003").unwrap_err();
        assert!(err.to_string().contains("font_size"), "{err}");

        let bad_align = json!({ "align": { "text1": "diagonal" } });
        assert!(CardRecord::from_value(&bad_align, "004").is_err());

        let not_a_map = json!(["text1"]);
        assert!(CardRecord::from_value(&not_a_map, "005").is_err());

        let negative = json!({ "line_height": -1 });
        assert!(CardRecord::from_value(&negative, "006").is_err());
    }

    #[test]
    fn image_paths_resolve_against_base_dir() {
        let v = json!({ "image_path": "art.png" });
        let card = CardRecord::from_value(&v, "a")
            .unwrap()
            .with_base_dir("/decks/a");
        assert_eq!(
            card.resolved_image_path(),
            Some(PathBuf::from("/decks/a/art.png"))
        );
    }

    #[test]
    fn card_overrides_apply_to_layout_config() {
        let card = CardRecord {
            font_size: Some(20.0),
            text_color: Some("#333".to_string()),
            ..Default::default()
        };
        let cfg = LayoutConfig::default().for_card(&card);
        assert_eq!(cfg.font_size, 20.0);
        assert_eq!(cfg.line_height, 1.3);
        assert_eq!(cfg.text_color.as_deref(), Some("#333"));
        assert!((cfg.line_height_px() - 26.0).abs() < 1e-9);
    }

    #[test]
    fn layout_config_deserializes_partially() {
        let cfg: LayoutConfig =
            serde_yaml::from_str("font_size: 18\noverflow: clip\nmargins: { left: 4 }\n").unwrap();
        assert_eq!(cfg.font_size, 18.0);
        assert_eq!(cfg.overflow, OverflowPolicy::Clip);
        assert_eq!(cfg.margins.left, 4.0);
        assert_eq!(cfg.margins.top, 12.0);
        assert_eq!(cfg.font_family, "Arial");
    }
}
