//! Turns positioned fragments into SVG nodes ready to be merged into a card document.
//!
//! Every embedded formula gets its own id prefix (`{slot_id}__f{n}__`). Ids, `#` hrefs and
//! `url(#...)` references inside the formula are rewritten with it, so glyph definitions of two
//! formulas can never collide with each other or with the template. `<defs>` children are hoisted
//! out of the fragment so the caller can merge them into the document's `<defs>`.

use crate::formula::VectorFragment;
use crate::layout::{FragmentContent, PositionedFragment, TextRun};
use crate::svgdom::{SvgElement, SvgNode, fmt_num};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// A slot's composed content: one group for the slot plus the definitions it references.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedSlot {
    pub group: SvgElement,
    pub defs: Vec<SvgNode>,
}

/// An embedded fragment: the positioned group and its hoisted definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedFragment {
    pub group: SvgElement,
    pub defs: Vec<SvgNode>,
}

fn re_url_ref() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?#([^)'"\s]+)['"]?\s*\)"#).expect("valid regex")
    })
}

pub fn fragment_prefix(slot_id: &str, n: usize) -> String {
    format!("{slot_id}__f{n}__")
}

pub fn compose_slot(slot_id: &str, fragments: &[PositionedFragment]) -> ComposedSlot {
    let mut group = SvgElement::new("g")
        .with_attr("id", format!("{slot_id}_content"))
        .with_attr("class", "cardsmith-slot");
    let mut defs = Vec::new();
    let mut formula_count = 0usize;

    for f in fragments {
        match &f.content {
            FragmentContent::Text(run) => {
                group
                    .children
                    .push(SvgNode::Element(text_element(run, f.x, f.y)));
            }
            FragmentContent::Formula { fragment, block } => {
                let prefix = fragment_prefix(slot_id, formula_count);
                formula_count += 1;
                let transform = format!(
                    "translate({},{})",
                    fmt_num(f.x - fragment.origin_x),
                    fmt_num(f.top() - fragment.origin_y)
                );
                let mut embedded = embed_fragment(fragment, &prefix, transform);
                embedded.group.set_attr(
                    "class",
                    if *block {
                        "formula formula-block"
                    } else {
                        "formula formula-inline"
                    },
                );
                group.children.push(SvgNode::Element(embedded.group));
                defs.extend(embedded.defs);
            }
        }
    }

    ComposedSlot { group, defs }
}

fn text_element(run: &TextRun, x: f64, y: f64) -> SvgElement {
    let mut el = SvgElement::new("text")
        .with_attr("x", fmt_num(x))
        .with_attr("y", fmt_num(y))
        .with_attr("xml:space", "preserve")
        .with_attr("font-family", run.font_family.clone())
        .with_attr("font-size", fmt_num(run.font_size));
    if let Some(fill) = run.fill.as_deref() {
        el.set_attr("fill", fill);
    }
    el.children.push(SvgNode::Text(run.text.clone()));
    el
}

/// Namespaces `fragment` with `prefix` and wraps its drawable content in a `<g>` carrying
/// `transform`.
pub fn embed_fragment(fragment: &VectorFragment, prefix: &str, transform: String) -> EmbeddedFragment {
    let mut root = fragment.document.root.clone();
    root.for_each_mut(|el| prefix_references(el, prefix));

    let mut group = SvgElement::new("g").with_attr("transform", transform);
    let mut defs = Vec::new();
    for child in root.children {
        match child {
            SvgNode::Element(el) if el.local_name() == "defs" => defs.extend(el.children),
            SvgNode::Element(el) if is_metadata(&el) => {}
            other => group.children.push(other),
        }
    }
    defs.retain(|n| matches!(n, SvgNode::Element(_)));

    EmbeddedFragment { group, defs }
}

fn is_metadata(el: &SvgElement) -> bool {
    matches!(el.local_name(), "title" | "desc" | "metadata")
}

fn prefix_references(el: &mut SvgElement, prefix: &str) {
    for (name, value) in el.attrs.iter_mut() {
        match name.as_str() {
            "id" => *value = format!("{prefix}{value}"),
            "href" | "xlink:href" => {
                if let Some(target) = value.strip_prefix('#') {
                    *value = format!("#{prefix}{target}");
                }
            }
            _ => {
                if value.contains("url(") {
                    *value = prefix_urls(value, prefix);
                }
            }
        }
    }
    if el.local_name() == "style" {
        for child in el.children.iter_mut() {
            if let SvgNode::Text(t) = child {
                *t = prefix_urls(t, prefix);
            }
        }
    }
}

fn prefix_urls(value: &str, prefix: &str) -> String {
    re_url_ref()
        .replace_all(value, |caps: &Captures<'_>| {
            format!("url(#{prefix}{})", &caps[1])
        })
        .into_owned()
}
