//! One card through the pipeline: clone the template, apply the color overrides, fill every slot
//! the record names and serialize the result.
//!
//! Slot problems never fail a card. A missing placeholder or asset is a `skip`, a formula that
//! cannot be typeset is dropped from its slot (or fails a fitted formula slot), and the card
//! still produces an SVG.

use cardsmith_core::{Align, CardRecord, LayoutConfig};
use cardsmith_render::formula::ensure_math_delimiters;
use cardsmith_render::template::DEFAULT_PRESERVE_ASPECT_RATIO;
use cardsmith_render::{
    DeterministicTextMeasurer, FormulaRenderer, Template, TextMeasurer, compose_slot,
    layout_markup,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Element ids recolored by the `bg_color` / `frame_color` overrides, with the paint property.
pub const BACKGROUND_ELEMENT: (&str, &str) = ("background", "fill");
pub const FRAME_ELEMENT: (&str, &str) = ("frame", "stroke");

/// Content keys laid out as flowing text, with their default alignment.
const TEXT_KEYS: &[(&str, Option<Align>)] = &[
    ("title", Some(Align::Center)),
    ("text1", None),
    ("text2", None),
];

/// Content keys fitted into their slot as a single formula.
const FORMULA_KEYS: &[&str] = &["formula1", "formula2"];

const IMAGE_KEY: &str = "image";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Ok,
    Skip,
    Fail,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Skip => "skip",
            Self::Fail => "fail",
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotReport {
    pub slot: String,
    pub status: SlotStatus,
    /// Tokens left out of a laid-out slot: failed conversions plus clipped fragments.
    pub dropped: usize,
    pub overflow: bool,
    pub message: Option<String>,
}

impl SlotReport {
    fn ok(slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            status: SlotStatus::Ok,
            dropped: 0,
            overflow: false,
            message: None,
        }
    }

    fn skip(slot: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: SlotStatus::Skip,
            message: Some(message.into()),
            ..Self::ok(slot)
        }
    }

    fn fail(slot: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: SlotStatus::Fail,
            message: Some(message.into()),
            ..Self::ok(slot)
        }
    }
}

/// A rendered card.
#[derive(Debug, Clone, PartialEq)]
pub struct CardOutput {
    pub id: String,
    pub svg: String,
    pub slots: Vec<SlotReport>,
}

impl CardOutput {
    pub fn count(&self, status: SlotStatus) -> usize {
        self.slots.iter().filter(|s| s.status == status).count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error(transparent)]
    Config(#[from] cardsmith_core::Error),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("aborted before rendering")]
    Aborted,
}

/// Renders cards against one parsed template.
///
/// The renderer is shared across worker threads; every call to [`CardRenderer::render`] works on
/// its own clone of the template.
#[derive(Clone)]
pub struct CardRenderer {
    template: Template,
    layout: LayoutConfig,
    measurer: Arc<dyn TextMeasurer + Send + Sync>,
    formulas: Arc<dyn FormulaRenderer + Send + Sync>,
    preserve_aspect_ratio: String,
}

impl std::fmt::Debug for CardRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardRenderer")
            .field("slots", &self.template.slot_index().len())
            .field("layout", &self.layout)
            .field("preserve_aspect_ratio", &self.preserve_aspect_ratio)
            .finish_non_exhaustive()
    }
}

impl CardRenderer {
    pub fn new(template: Template, formulas: Arc<dyn FormulaRenderer + Send + Sync>) -> Self {
        Self {
            template,
            layout: LayoutConfig::default(),
            measurer: Arc::new(DeterministicTextMeasurer::default()),
            formulas,
            preserve_aspect_ratio: DEFAULT_PRESERVE_ASPECT_RATIO.to_string(),
        }
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_measurer(mut self, measurer: Arc<dyn TextMeasurer + Send + Sync>) -> Self {
        self.measurer = measurer;
        self
    }

    pub fn with_preserve_aspect_ratio(mut self, value: impl Into<String>) -> Self {
        self.preserve_aspect_ratio = value.into();
        self
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// The template slot backing a content key: `{key}_slot` first, then `{key}` itself.
    pub fn slot_for(&self, key: &str) -> Option<String> {
        let index = self.template.slot_index();
        [format!("{key}_slot"), key.to_string()]
            .into_iter()
            .find(|name| index.contains(name))
    }

    pub fn render(&self, card: &CardRecord) -> CardOutput {
        let mut doc = self.template.clone();
        let config = self.layout.for_card(card);
        let mut slots = Vec::new();

        for ((element, property), color) in [
            (BACKGROUND_ELEMENT, card.bg_color.as_deref()),
            (FRAME_ELEMENT, card.frame_color.as_deref()),
        ] {
            let Some(color) = color else { continue };
            if doc.recolor(element, property, color) {
                slots.push(SlotReport::ok(element));
            } else {
                tracing::warn!(card = %card.id, element, "no element to recolor");
                slots.push(SlotReport::skip(element, format!("no element with id `{element}`")));
            }
        }

        for &(key, default_align) in TEXT_KEYS {
            let Some(text) = text_for(card, key) else { continue };
            slots.push(self.fill_text(&mut doc, card, &config, key, text, default_align));
        }

        if let Some(path) = card.resolved_image_path() {
            slots.push(self.fill_image(&mut doc, card, path));
        }

        for &key in FORMULA_KEYS {
            let Some(markup) = text_for(card, key) else { continue };
            slots.push(self.fill_formula(&mut doc, card, &config, key, markup));
        }

        CardOutput {
            id: card.id.clone(),
            svg: doc.to_svg_string(),
            slots,
        }
    }

    fn fill_text(
        &self,
        doc: &mut Template,
        card: &CardRecord,
        config: &LayoutConfig,
        key: &str,
        text: &str,
        default_align: Option<Align>,
    ) -> SlotReport {
        let Some(name) = self.slot_for(key) else {
            return missing_slot(card, key);
        };
        let Some(slot) = doc.slot(&name).cloned() else {
            return missing_slot(card, key);
        };

        let align = card
            .align_for(&name, key)
            .or(default_align)
            .unwrap_or(config.align);
        let config = config.clone().with_align(align);
        let outcome = layout_markup(text, &slot, &config, &*self.measurer, &*self.formulas);

        let mut report = SlotReport::ok(&name);
        report.dropped = outcome.dropped.len();
        report.overflow = outcome.overflow;
        if let Some(first) = outcome.conversion_failures().next() {
            let failed = outcome.conversion_failures().count();
            report.message = Some(format!("{failed} formula(s) dropped; first `{}`", first.markup));
        } else if outcome.overflow {
            report.message = Some("content overflows the slot".to_string());
        }

        let composed = compose_slot(&name, &outcome.fragments);
        match doc.place_composed(&name, composed, Some(config.font_size)) {
            Ok(()) => report,
            Err(e) => SlotReport::fail(name, e.to_string()),
        }
    }

    fn fill_image(&self, doc: &mut Template, card: &CardRecord, path: PathBuf) -> SlotReport {
        let Some(name) = self.slot_for(IMAGE_KEY) else {
            return missing_slot(card, IMAGE_KEY);
        };
        if !path.is_file() {
            tracing::warn!(card = %card.id, path = %path.display(), "image not found");
            return SlotReport::skip(name, format!("image not found: {}", path.display()));
        }
        match doc.place_image(&name, &path, &self.preserve_aspect_ratio) {
            Ok(()) => SlotReport::ok(name),
            Err(e) => SlotReport::fail(name, e.to_string()),
        }
    }

    fn fill_formula(
        &self,
        doc: &mut Template,
        card: &CardRecord,
        config: &LayoutConfig,
        key: &str,
        markup: &str,
    ) -> SlotReport {
        let Some(name) = self.slot_for(key) else {
            return missing_slot(card, key);
        };
        let fragment = match self
            .formulas
            .render(&ensure_math_delimiters(markup), config.formula_scale)
        {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(card = %card.id, slot = %name, error = %e, "formula conversion failed");
                return SlotReport::fail(name, e.to_string());
            }
        };
        let align = card.align_for(&name, key).unwrap_or(Align::Center);
        match doc.place_fitted_formula(&name, &fragment, align) {
            Ok(()) => SlotReport::ok(name),
            Err(e) => SlotReport::fail(name, e.to_string()),
        }
    }
}

fn text_for<'a>(card: &'a CardRecord, key: &str) -> Option<&'a str> {
    let v = match key {
        "title" => card.title.as_deref(),
        "text1" => card.text1.as_deref(),
        "text2" => card.text2.as_deref(),
        "formula1" => card.formula1.as_deref(),
        "formula2" => card.formula2.as_deref(),
        _ => None,
    }?;
    if v.trim().is_empty() { None } else { Some(v) }
}

fn missing_slot(card: &CardRecord, key: &str) -> SlotReport {
    let name = format!("{key}_slot");
    tracing::warn!(card = %card.id, slot = %name, "slot not found in template");
    SlotReport::skip(name, "slot not found in template")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardsmith_render::{ConversionError, VectorFragment};

    const TEMPLATE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="300" viewBox="0 0 200 300">
<rect id="background" width="200" height="300" style="fill:#ffffff"/>
<rect id="title_slot" x="10" y="10" width="180" height="40"/>
<rect id="text1" x="10" y="60" width="180" height="120"/>
<rect id="formula1_slot" x="10" y="200" width="180" height="80"/>
</svg>"##;

    struct Boxes;

    impl FormulaRenderer for Boxes {
        fn render(&self, markup: &str, _scale: f64) -> Result<VectorFragment, ConversionError> {
            if markup.contains("fail") {
                return Err(ConversionError::ToolFailed {
                    tool: "latex".into(),
                    status: Some(1),
                    diagnostics: "! Undefined control sequence.".into(),
                });
            }
            VectorFragment::from_svg(
                r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 40 20"><path d="M0 0h40v20z"/></svg>"#,
            )
        }
    }

    fn renderer() -> CardRenderer {
        CardRenderer::new(Template::parse(TEMPLATE).unwrap(), Arc::new(Boxes))
    }

    fn status_of<'a>(out: &'a CardOutput, slot: &str) -> &'a SlotReport {
        out.slots
            .iter()
            .find(|s| s.slot == slot)
            .unwrap_or_else(|| panic!("no report for {slot}: {:?}", out.slots))
    }

    #[test]
    fn content_keys_fall_back_to_bare_slot_names() {
        let r = renderer();
        assert_eq!(r.slot_for("title").as_deref(), Some("title_slot"));
        assert_eq!(r.slot_for("text1").as_deref(), Some("text1"));
        assert_eq!(r.slot_for("text2"), None);
    }

    #[test]
    fn missing_slots_and_keys_are_reported_not_fatal() {
        let card = CardRecord {
            id: "c1".into(),
            title: Some("Hello".into()),
            text2: Some("nowhere to go".into()),
            frame_color: Some("#f00".into()),
            ..Default::default()
        };
        let out = renderer().render(&card);
        assert_eq!(status_of(&out, "title_slot").status, SlotStatus::Ok);
        assert_eq!(status_of(&out, "text2_slot").status, SlotStatus::Skip);
        assert_eq!(status_of(&out, "frame").status, SlotStatus::Skip);
        // Keys the record does not carry produce no report at all.
        assert!(out.slots.iter().all(|s| s.slot != "text1"));
        assert!(out.svg.contains(r#"id="title_slot_content""#));
        assert!(out.svg.contains(r#"id="text1""#));
    }

    #[test]
    fn dropped_formulas_keep_the_slot_ok() {
        let card = CardRecord {
            id: "c2".into(),
            text1: Some(r"Area $\fail$ is $a$.".into()),
            formula1: Some(r"\fail".into()),
            ..Default::default()
        };
        let out = renderer().render(&card);
        let text = status_of(&out, "text1");
        assert_eq!(text.status, SlotStatus::Ok);
        assert_eq!(text.dropped, 1);
        assert!(text.message.as_deref().unwrap().contains(r"$\fail$"));

        let formula = status_of(&out, "formula1_slot");
        assert_eq!(formula.status, SlotStatus::Fail);
        assert!(formula.message.as_deref().unwrap().contains("latex failed"));
        assert_eq!(out.count(SlotStatus::Fail), 1);
    }

    #[test]
    fn color_overrides_apply_to_background_and_text() {
        let card = CardRecord {
            id: "c3".into(),
            title: Some("Colors".into()),
            bg_color: Some("#102030".into()),
            text_color: Some("#abcdef".into()),
            ..Default::default()
        };
        let out = renderer().render(&card);
        assert_eq!(status_of(&out, "background").status, SlotStatus::Ok);
        assert!(out.svg.contains("fill:#102030"));
        assert!(out.svg.contains(r##"fill="#abcdef""##));
    }

    #[test]
    fn renders_do_not_leak_into_the_shared_template() {
        let r = renderer();
        let card = CardRecord {
            id: "c4".into(),
            title: Some("Once".into()),
            ..Default::default()
        };
        let _ = r.render(&card);
        assert!(r.template().slot("title_slot").is_some());
        let again = r.render(&card);
        assert_eq!(status_of(&again, "title_slot").status, SlotStatus::Ok);
    }
}
