//! Owned, mutable SVG tree.
//!
//! `roxmltree` gives a read-only view; templates and formula fragments need to be edited and
//! written back, so parsing copies the document into [`SvgElement`]s. Element and attribute names
//! are stored qualified (`xlink:href`, `inkscape:label`) with canonical prefixes for the well-known
//! namespaces, regardless of the prefixes the source document used. Comments and processing
//! instructions are dropped.

use std::collections::BTreeSet;
use std::fmt::Write as _;

pub const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
pub const INKSCAPE_NS: &str = "http://www.inkscape.org/namespaces/inkscape";
pub const SODIPODI_NS: &str = "http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd";

const CANONICAL_PREFIXES: &[(&str, &str)] = &[
    ("xlink", XLINK_NS),
    ("xml", XML_NS),
    ("inkscape", INKSCAPE_NS),
    ("sodipodi", SODIPODI_NS),
];

#[derive(Debug, thiserror::Error)]
pub enum SvgParseError {
    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("root element is <{0}>, expected <svg>")]
    NotSvg(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SvgNode {
    Element(SvgElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SvgElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<SvgNode>,
}

impl SvgElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: SvgNode) -> Self {
        self.children.push(child);
        self
    }

    /// The name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name
            .split_once(':')
            .map(|(_, local)| local)
            .unwrap_or(&self.name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self.attrs.iter().position(|(k, _)| k == name)?;
        Some(self.attrs.remove(idx).1)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    /// `href` or the legacy `xlink:href`, whichever is present.
    pub fn href(&self) -> Option<&str> {
        self.attr("href").or_else(|| self.attr("xlink:href"))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &SvgElement> {
        self.children.iter().filter_map(|c| match c {
            SvgNode::Element(e) => Some(e),
            SvgNode::Text(_) => None,
        })
    }

    /// Depth-first search (self included) for the first element matching `pred`.
    pub fn find(&self, pred: impl Fn(&SvgElement) -> bool) -> Option<&SvgElement> {
        find_in(self, &pred)
    }

    /// Concatenated text content of this element and its descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Visits every element in document order together with its child-index path from `self`.
    pub fn walk<'a>(&'a self, mut f: impl FnMut(&[usize], &'a SvgElement)) {
        let mut path = Vec::new();
        walk_inner(self, &mut path, &mut f);
    }

    /// Applies `f` to every element of the subtree, `self` included.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut SvgElement)) {
        for_each_inner(self, &mut f);
    }

    pub fn element_at(&self, path: &[usize]) -> Option<&SvgElement> {
        let mut cur = self;
        for &idx in path {
            cur = match cur.children.get(idx)? {
                SvgNode::Element(e) => e,
                SvgNode::Text(_) => return None,
            };
        }
        Some(cur)
    }

    pub fn element_at_mut(&mut self, path: &[usize]) -> Option<&mut SvgElement> {
        let mut cur = self;
        for &idx in path {
            cur = match cur.children.get_mut(idx)? {
                SvgNode::Element(e) => e,
                SvgNode::Text(_) => return None,
            };
        }
        Some(cur)
    }

    pub fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            let _ = write!(out, r#" {k}="{}""#, escape_attr(v));
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                SvgNode::Element(e) => e.write_to(out),
                SvgNode::Text(t) => out.push_str(&escape_xml(t)),
            }
        }
        let _ = write!(out, "</{}>", self.name);
    }

    fn collect_prefixes(&self, out: &mut BTreeSet<String>) {
        if let Some((prefix, _)) = self.name.split_once(':') {
            out.insert(prefix.to_string());
        }
        for (k, _) in &self.attrs {
            if let Some((prefix, _)) = k.split_once(':') {
                if prefix != "xmlns" {
                    out.insert(prefix.to_string());
                }
            }
        }
        for child in self.child_elements() {
            child.collect_prefixes(out);
        }
    }
}

fn find_in<'a>(
    el: &'a SvgElement,
    pred: &dyn Fn(&SvgElement) -> bool,
) -> Option<&'a SvgElement> {
    if pred(el) {
        return Some(el);
    }
    el.child_elements().find_map(|c| find_in(c, pred))
}

fn for_each_inner(el: &mut SvgElement, f: &mut dyn FnMut(&mut SvgElement)) {
    f(el);
    for child in &mut el.children {
        if let SvgNode::Element(e) = child {
            for_each_inner(e, f);
        }
    }
}

fn collect_text(el: &SvgElement, out: &mut String) {
    for child in &el.children {
        match child {
            SvgNode::Text(t) => out.push_str(t),
            SvgNode::Element(e) => collect_text(e, out),
        }
    }
}

fn walk_inner<'a>(
    el: &'a SvgElement,
    path: &mut Vec<usize>,
    f: &mut dyn FnMut(&[usize], &'a SvgElement),
) {
    f(path, el);
    for (idx, child) in el.children.iter().enumerate() {
        if let SvgNode::Element(e) = child {
            path.push(idx);
            walk_inner(e, path, f);
            path.pop();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SvgDocument {
    pub root: SvgElement,
}

impl SvgDocument {
    pub fn parse(text: &str) -> Result<Self, SvgParseError> {
        let opts = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, opts)?;
        let root = doc.root_element();
        if root.tag_name().name() != "svg" {
            return Err(SvgParseError::NotSvg(root.tag_name().name().to_string()));
        }

        let mut declared: Vec<(String, String)> = Vec::new();
        for node in doc.descendants().filter(|n| n.is_element()) {
            for ns in node.namespaces() {
                let attr = match (ns.name(), canonical_prefix(ns.uri())) {
                    (_, Some("xml")) => continue,
                    (None, _) => "xmlns".to_string(),
                    (_, Some(prefix)) => format!("xmlns:{prefix}"),
                    (Some(prefix), None) => format!("xmlns:{prefix}"),
                };
                if !declared.iter().any(|(k, _)| *k == attr) {
                    declared.push((attr, ns.uri().to_string()));
                }
            }
        }

        let mut root_el = build_element(root);
        let mut attrs = declared;
        if !attrs.iter().any(|(k, _)| k == "xmlns") {
            attrs.insert(0, ("xmlns".to_string(), SVG_NS.to_string()));
        }
        attrs.append(&mut root_el.attrs);
        root_el.attrs = attrs;
        Ok(Self { root: root_el })
    }

    /// Serializes with an XML declaration. Canonical namespace prefixes that are used anywhere in
    /// the tree but not declared on the root are declared there.
    pub fn to_svg_string(&self) -> String {
        let mut root = self.root.clone();
        let mut used = BTreeSet::new();
        root.collect_prefixes(&mut used);
        for (prefix, uri) in CANONICAL_PREFIXES {
            if *prefix == "xml" || !used.contains(*prefix) {
                continue;
            }
            let decl = format!("xmlns:{prefix}");
            if root.attr(&decl).is_none() {
                root.set_attr(decl, *uri);
            }
        }

        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        root.write_to(&mut out);
        out.push('\n');
        out
    }

    /// The `viewBox` as `(min_x, min_y, width, height)`, if present and well-formed.
    pub fn view_box(&self) -> Option<(f64, f64, f64, f64)> {
        parse_view_box(self.root.attr("viewBox")?)
    }
}

fn canonical_prefix(uri: &str) -> Option<&'static str> {
    CANONICAL_PREFIXES
        .iter()
        .find(|(_, u)| *u == uri)
        .map(|(p, _)| *p)
}

fn qualified_name(node: roxmltree::Node<'_, '_>, ns: Option<&str>, local: &str) -> String {
    let Some(uri) = ns else {
        return local.to_string();
    };
    if uri == SVG_NS {
        return local.to_string();
    }
    let prefix = canonical_prefix(uri)
        .map(str::to_string)
        .or_else(|| node.lookup_prefix(uri).map(str::to_string));
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}:{local}"),
        _ => local.to_string(),
    }
}

fn build_element(node: roxmltree::Node<'_, '_>) -> SvgElement {
    let tag = node.tag_name();
    let mut el = SvgElement::new(qualified_name(node, tag.namespace(), tag.name()));
    for a in node.attributes() {
        el.attrs.push((
            qualified_name(node, a.namespace(), a.name()),
            a.value().to_string(),
        ));
    }
    for child in node.children() {
        if child.is_element() {
            el.children.push(SvgNode::Element(build_element(child)));
        } else if child.is_text() {
            if let Some(t) = child.text() {
                el.children.push(SvgNode::Text(t.to_string()));
            }
        }
    }
    el
}

pub fn parse_view_box(raw: &str) -> Option<(f64, f64, f64, f64)> {
    let nums: Vec<f64> = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match nums.as_slice() {
        [x, y, w, h] => Some((*x, *y, *w, *h)),
        _ => None,
    }
}

/// Formats a coordinate for an SVG attribute: at most 3 fractional digits, no trailing zeros,
/// no `-0`.
pub fn fmt_num(v: f64) -> String {
    if !v.is_finite() || v.abs() < 0.0005 {
        return "0".to_string();
    }
    let r = (v * 1000.0).round() / 1000.0;
    let mut s = format!("{r:.3}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    if s == "-0" { "0".to_string() } else { s }
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            _ => out.push(ch),
        }
    }
    out
}
