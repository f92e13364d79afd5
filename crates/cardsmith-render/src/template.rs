//! Card templates: an SVG document with named placeholder rectangles ("slots").
//!
//! A slot is any element whose `id` or `inkscape:label` names it. Its geometry comes from the
//! element itself when it is a `<rect>`, else from its first descendant `<rect>`; that rectangle is
//! the placeholder that gets replaced. The [`SlotIndex`] is built once at parse time. Replacing a
//! placeholder swaps one node for another, so the recorded tree paths stay valid across edits.

use crate::compose::{ComposedSlot, embed_fragment, fragment_prefix};
use crate::formula::{VectorFragment, parse_length};
use crate::layout::Slot;
use crate::svgdom::{SvgDocument, SvgElement, SvgNode, fmt_num};
use crate::{Error, Result};
use base64::Engine as _;
use cardsmith_core::Align;
use indexmap::IndexMap;
use std::path::Path;

/// Fraction of the slot kept free on each side of a fitted formula.
pub const FITTED_FORMULA_MARGIN: f64 = 0.06;

pub const DEFAULT_PRESERVE_ASPECT_RATIO: &str = "xMidYMid meet";

#[derive(Debug, Clone, PartialEq)]
pub struct SlotEntry {
    pub slot: Slot,
    /// Tree path of the placeholder `<rect>`.
    pub rect_path: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotIndex {
    entries: IndexMap<String, SlotEntry>,
}

impl SlotIndex {
    pub fn build(root: &SvgElement) -> Self {
        let mut entries = IndexMap::new();
        root.walk(|path, el| {
            for name in [el.id(), el.attr("inkscape:label")].into_iter().flatten() {
                if name.is_empty() || entries.contains_key(name) {
                    continue;
                }
                let Some((rect_path, rect)) = placeholder_rect(path, el) else {
                    continue;
                };
                let Some(slot) = rect_geometry(name, rect) else {
                    tracing::debug!(slot = name, "placeholder rect has no usable size");
                    continue;
                };
                entries.insert(name.to_string(), SlotEntry { slot, rect_path });
            }
        });
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&SlotEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn placeholder_rect<'a>(path: &[usize], el: &'a SvgElement) -> Option<(Vec<usize>, &'a SvgElement)> {
    if el.local_name() == "rect" {
        return Some((path.to_vec(), el));
    }
    let mut found = None;
    el.walk(|sub, child| {
        if found.is_none() && !sub.is_empty() && child.local_name() == "rect" {
            let mut full = path.to_vec();
            full.extend_from_slice(sub);
            found = Some((full, child));
        }
    });
    found
}

fn rect_geometry(name: &str, rect: &SvgElement) -> Option<Slot> {
    let num = |attr: &str| rect.attr(attr).and_then(parse_length);
    let width = num("width")?;
    let height = num("height")?;
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(Slot::new(
        name,
        num("x").unwrap_or(0.0),
        num("y").unwrap_or(0.0),
        width,
        height,
    ))
}

/// A parsed template. Clone it per card; the clone owns its tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    doc: SvgDocument,
    index: SlotIndex,
    defs_path: Vec<usize>,
}

impl Template {
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = SvgDocument::parse(text)?;

        // `<defs>` goes in before indexing so that inserting it never shifts a recorded path.
        let defs_idx = match doc
            .root
            .children
            .iter()
            .position(|c| matches!(c, SvgNode::Element(e) if e.local_name() == "defs"))
        {
            Some(idx) => idx,
            None => {
                doc.root
                    .children
                    .insert(0, SvgNode::Element(SvgElement::new("defs")));
                0
            }
        };

        let index = SlotIndex::build(&doc.root);
        tracing::debug!(slots = index.len(), "indexed template slots");
        Ok(Self {
            doc,
            index,
            defs_path: vec![defs_idx],
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn slot_index(&self) -> &SlotIndex {
        &self.index
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.index.get(name).map(|e| &e.slot)
    }

    pub fn document(&self) -> &SvgDocument {
        &self.doc
    }

    pub fn to_svg_string(&self) -> String {
        self.doc.to_svg_string()
    }

    pub fn add_defs(&mut self, nodes: Vec<SvgNode>) {
        if nodes.is_empty() {
            return;
        }
        if let Some(defs) = self.doc.root.element_at_mut(&self.defs_path) {
            defs.children.extend(nodes);
        }
    }

    /// Replaces the slot's placeholder with `content`. The placeholder's own `transform` is
    /// carried over so the content stays in the placeholder's coordinate space.
    pub fn replace_slot(&mut self, name: &str, mut content: SvgElement) -> Result<()> {
        let entry = self.index.get(name).ok_or_else(|| Error::MissingSlot {
            name: name.to_string(),
        })?;
        let target = self
            .doc
            .root
            .element_at_mut(&entry.rect_path)
            .ok_or_else(|| Error::MissingSlot {
                name: name.to_string(),
            })?;

        if let Some(placeholder_transform) = target.attr("transform") {
            let combined = match content.attr("transform") {
                Some(own) => format!("{placeholder_transform} {own}"),
                None => placeholder_transform.to_string(),
            };
            content.set_attr("transform", combined);
        }
        *target = content;
        Ok(())
    }

    /// Inserts laid-out slot content, merging its definitions into the document `<defs>`.
    ///
    /// `font_size`, when given, is also written into the group's `style` so text the slot group
    /// inherits matches the layout's font size.
    pub fn place_composed(
        &mut self,
        name: &str,
        composed: ComposedSlot,
        font_size: Option<f64>,
    ) -> Result<()> {
        if !self.index.contains(name) {
            return Err(Error::MissingSlot {
                name: name.to_string(),
            });
        }
        let mut group = composed.group;
        if let Some(size) = font_size {
            let style = set_style_property(
                group.attr("style").unwrap_or_default(),
                "font-size",
                &format!("{}px", fmt_num(size)),
            );
            group.set_attr("style", style);
        }
        self.add_defs(composed.defs);
        self.replace_slot(name, group)
    }

    /// Embeds the image at `path` as a base64 data URI using the placeholder's geometry.
    pub fn place_image(
        &mut self,
        name: &str,
        path: &Path,
        preserve_aspect_ratio: &str,
    ) -> Result<()> {
        let slot = self
            .slot(name)
            .cloned()
            .ok_or_else(|| Error::MissingSlot {
                name: name.to_string(),
            })?;
        let mime = image_mime(path).ok_or_else(|| Error::UnsupportedImage {
            path: path.to_path_buf(),
        })?;
        let bytes = std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);

        let image = SvgElement::new("image")
            .with_attr("id", format!("{name}_content"))
            .with_attr("x", fmt_num(slot.x))
            .with_attr("y", fmt_num(slot.y))
            .with_attr("width", fmt_num(slot.width))
            .with_attr("height", fmt_num(slot.height))
            .with_attr("preserveAspectRatio", preserve_aspect_ratio)
            .with_attr("href", format!("data:{mime};base64,{data}"));
        self.replace_slot(name, image)
    }

    /// Fits a single formula into the slot: uniform scale leaving [`FITTED_FORMULA_MARGIN`] on
    /// each side, horizontal `align`, vertically centered.
    pub fn place_fitted_formula(
        &mut self,
        name: &str,
        fragment: &VectorFragment,
        align: Align,
    ) -> Result<()> {
        let slot = self
            .slot(name)
            .cloned()
            .ok_or_else(|| Error::MissingSlot {
                name: name.to_string(),
            })?;

        let fw = if fragment.width > 0.0 { fragment.width } else { 1.0 };
        let fh = if fragment.height > 0.0 { fragment.height } else { 1.0 };
        let m = FITTED_FORMULA_MARGIN;
        let mut scale = f64::min(
            slot.width * (1.0 - 2.0 * m) / fw,
            slot.height * (1.0 - 2.0 * m) / fh,
        );
        if !(scale.is_finite() && scale > 0.0) {
            scale = 1.0;
        }

        let tx = match align {
            Align::Left => slot.x + slot.width * m,
            Align::Center => slot.x + (slot.width - fw * scale) / 2.0,
            Align::Right => slot.x + slot.width - fw * scale - slot.width * m,
        } - fragment.origin_x * scale;
        let ty = slot.y + (slot.height - fh * scale) / 2.0 - fragment.origin_y * scale;

        let transform = format!(
            "translate({},{}) scale({})",
            fmt_num(tx),
            fmt_num(ty),
            fmt_scale(scale)
        );
        let mut embedded = embed_fragment(fragment, &fragment_prefix(name, 0), transform);
        embedded.group.set_attr("id", format!("{name}_content"));
        embedded.group.set_attr("class", "formula formula-fitted");
        self.add_defs(embedded.defs);
        self.replace_slot(name, embedded.group)
    }

    /// Sets a paint property (`fill`, `stroke`) on the element with the given id, in both its
    /// presentation attribute and its inline style. Returns `false` when no such element exists.
    pub fn recolor(&mut self, element_id: &str, property: &str, color: &str) -> bool {
        let mut found = false;
        self.doc.root.for_each_mut(|el| {
            if found || el.id() != Some(element_id) {
                return;
            }
            found = true;
            el.set_attr(property, color);
            if let Some(style) = el.attr("style") {
                let style = set_style_property(style, property, color);
                el.set_attr("style", style);
            }
        });
        found
    }
}

fn fmt_scale(v: f64) -> String {
    let s = format!("{v:.6}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() { "0".to_string() } else { s.to_string() }
}

/// Replaces `property` in an inline CSS declaration list, appending it when absent.
pub fn set_style_property(style: &str, property: &str, value: &str) -> String {
    let mut decls: Vec<String> = Vec::new();
    let mut replaced = false;
    for decl in style.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let name = decl.split(':').next().unwrap_or_default().trim();
        if name.eq_ignore_ascii_case(property) {
            if !replaced {
                decls.push(format!("{property}:{value}"));
                replaced = true;
            }
        } else {
            decls.push(decl.to_string());
        }
    }
    if !replaced {
        decls.push(format!("{property}:{value}"));
    }
    decls.join(";")
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => return None,
    })
}
