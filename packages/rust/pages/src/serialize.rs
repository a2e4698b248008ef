//! Element patches applied to a parsed document, and re-serialisation.
//!
//! Enhancements are computed against the read-only document and recorded
//! as [`Patch`]es keyed by node id. [`apply_patches`] then edits the tree in
//! place and [`write_document`] emits it through html5ever's serializer.

use std::collections::HashMap;

use ego_tree::NodeId;
use govsite_shared::{GovsiteError, Result};
use html5ever::serialize::{SerializeOpts, serialize};
use html5ever::{LocalName, Namespace, QualName};
use scraper::node::Element;
use scraper::{Html, Node, StrTendril};

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// Changes to apply to a single element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Patch {
    add_classes: Vec<String>,
    remove_classes: Vec<String>,
    attributes: Vec<(String, String)>,
    replace_children: Option<String>,
    append_html: String,
}

impl Patch {
    pub(crate) fn add_class(&mut self, class: &str) -> &mut Self {
        self.remove_classes.retain(|c| c != class);
        if !self.add_classes.iter().any(|c| c == class) {
            self.add_classes.push(class.to_string());
        }
        self
    }

    pub(crate) fn remove_class(&mut self, class: &str) -> &mut Self {
        self.add_classes.retain(|c| c != class);
        if !self.remove_classes.iter().any(|c| c == class) {
            self.remove_classes.push(class.to_string());
        }
        self
    }

    pub(crate) fn set_attribute(&mut self, name: &str, value: &str) -> &mut Self {
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attributes.push((name.to_string(), value.to_string())),
        }
        self
    }

    /// Replace the element's content with parsed HTML.
    pub(crate) fn replace_children(&mut self, html: String) -> &mut Self {
        self.replace_children = Some(html);
        self
    }

    /// Append parsed HTML after the element's existing content.
    pub(crate) fn append_html(&mut self, html: &str) -> &mut Self {
        self.append_html.push_str(html);
        self
    }

    fn touches_classes(&self) -> bool {
        !self.add_classes.is_empty() || !self.remove_classes.is_empty()
    }

    fn apply_classes(&self, existing: Option<&str>) -> Vec<String> {
        let mut classes: Vec<String> = existing
            .unwrap_or("")
            .split_whitespace()
            .filter(|c| !self.remove_classes.iter().any(|r| r == c))
            .map(String::from)
            .collect();
        for class in &self.add_classes {
            if !classes.contains(class) {
                classes.push(class.clone());
            }
        }
        classes
    }

    fn apply_attributes(&self, element: &mut Element) {
        if self.touches_classes() {
            let classes = self.apply_classes(element.attr("class"));
            if classes.is_empty() {
                remove_attr(element, "class");
            } else {
                set_attr(element, "class", &classes.join(" "));
            }
        }
        for (name, value) in &self.attributes {
            set_attr(element, name, value);
        }
    }
}

/// Patches for a whole document, keyed by element node id.
#[derive(Debug, Default)]
pub(crate) struct PatchSet {
    patches: HashMap<NodeId, Patch>,
}

impl PatchSet {
    pub(crate) fn element(&mut self, id: NodeId) -> &mut Patch {
        self.patches.entry(id).or_default()
    }
}

// ---------------------------------------------------------------------------
// Tree edits
// ---------------------------------------------------------------------------

/// Apply every patch to `doc` in place.
pub(crate) fn apply_patches(doc: &mut Html, patches: PatchSet) {
    for (id, patch) in patches.patches {
        let Some(mut node) = doc.tree.get_mut(id) else {
            continue;
        };
        if let Node::Element(element) = node.value() {
            patch.apply_attributes(element);
        }
        if let Some(html) = &patch.replace_children {
            while let Some(mut child) = node.first_child() {
                child.detach();
            }
            append_fragment(doc, id, html);
        }
        if !patch.append_html.is_empty() {
            append_fragment(doc, id, &patch.append_html);
        }
    }
}

/// Parse `html` as a body fragment and move its nodes under `parent`.
fn append_fragment(doc: &mut Html, parent: NodeId, html: &str) {
    let fragment = Html::parse_fragment(html);
    let root = doc.tree.extend_tree(fragment.tree).id();
    // parse_fragment wraps the nodes in an <html> element
    let wrapper = doc
        .tree
        .get(root)
        .and_then(|r| r.children().find(|c| c.value().is_element()))
        .map(|w| w.id());
    if let (Some(wrapper), Some(mut parent)) = (wrapper, doc.tree.get_mut(parent)) {
        parent.reparent_from_id_append(wrapper);
    }
}

fn is_plain_attr(name: &QualName, local: &str) -> bool {
    name.ns.is_empty() && &*name.local == local
}

fn set_attr(element: &mut Element, name: &str, value: &str) {
    let value = StrTendril::from_slice(value);
    match element
        .attrs
        .iter_mut()
        .find(|(qual, _)| is_plain_attr(qual, name))
    {
        Some((_, existing)) => *existing = value,
        None => element.attrs.push((
            QualName::new(None, Namespace::from(""), LocalName::from(name)),
            value,
        )),
    }
}

fn remove_attr(element: &mut Element, name: &str) {
    element.attrs.retain(|(qual, _)| !is_plain_attr(qual, name));
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Serialise `doc` with html5ever, scripting enabled as when it was parsed.
pub(crate) fn write_document(doc: &Html) -> Result<String> {
    let mut buf = Vec::new();
    serialize(&mut buf, doc, SerializeOpts::default())
        .map_err(|e| GovsiteError::parse(format!("failed to serialise document: {e}")))?;
    String::from_utf8(buf)
        .map_err(|e| GovsiteError::parse(format!("serialised document is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{ElementRef, Selector};

    fn id_of(doc: &Html, selector: &str) -> NodeId {
        doc.select(&Selector::parse(selector).unwrap())
            .next()
            .map(|el: ElementRef<'_>| el.id())
            .unwrap_or_else(|| panic!("no element for {selector}"))
    }

    fn patched(html: &str, build: impl FnOnce(&Html, &mut PatchSet)) -> String {
        let mut doc = Html::parse_document(html);
        let mut patches = PatchSet::default();
        build(&doc, &mut patches);
        apply_patches(&mut doc, patches);
        write_document(&doc).unwrap()
    }

    #[test]
    fn unpatched_document_round_trips() {
        let html = "<!DOCTYPE html><html><head><title>T &amp; C</title></head>\
                    <body><!-- note --><p>a<br>b</p><script>if (a < b) {}</script></body></html>";
        assert_eq!(patched(html, |_, _| {}), html);
    }

    #[test]
    fn noscript_content_is_not_escaped() {
        let html = "<html><head></head><body><noscript><img src=\"/pixel.gif\" alt=\"\"></noscript>\
                    <p>x</p></body></html>";
        let out = patched(html, |_, _| {});
        assert!(
            out.contains(r#"<noscript><img src="/pixel.gif" alt=""></noscript>"#),
            "{out}"
        );
    }

    #[test]
    fn namespaced_attributes_keep_their_prefix() {
        let html = r##"<html><head></head><body><svg><use xlink:href="#i"></use></svg></body></html>"##;
        let out = patched(html, |_, _| {});
        assert!(out.contains(r##"<use xlink:href="#i"></use>"##), "{out}");
    }

    #[test]
    fn class_and_attribute_patches() {
        let html = r#"<html><head></head><body><div class="a b">x</div><p>y</p></body></html>"#;
        let out = patched(html, |doc, patches| {
            patches.element(id_of(doc, "div")).remove_class("a").add_class("c");
            patches
                .element(id_of(doc, "p"))
                .add_class("lead")
                .set_attribute("hidden", "");
        });
        assert!(out.contains(r#"<div class="b c">x</div>"#), "{out}");
        assert!(out.contains(r#"<p class="lead" hidden="">y</p>"#), "{out}");
    }

    #[test]
    fn removing_the_last_class_drops_the_attribute() {
        let html = r#"<html><head></head><body><div class="a">x</div></body></html>"#;
        let out = patched(html, |doc, patches| {
            patches.element(id_of(doc, "div")).remove_class("a");
        });
        assert!(out.contains("<div>x</div>"), "{out}");
    }

    #[test]
    fn replaced_children_leave_other_patches_intact() {
        let html = "<html><head></head><body><nav><span>old</span><em>x</em></nav><p>after</p></body></html>";
        let out = patched(html, |doc, patches| {
            patches
                .element(id_of(doc, "nav"))
                .replace_children(r##"<ul><li><a href="#a">A</a></li></ul>"##.into());
            patches.element(id_of(doc, "p")).add_class("moved");
        });
        assert!(
            out.contains(r##"<nav><ul><li><a href="#a">A</a></li></ul></nav>"##),
            "{out}"
        );
        assert!(out.contains(r#"<p class="moved">after</p>"#), "{out}");
    }

    #[test]
    fn appended_html_goes_before_end_tag() {
        let html = "<html><head></head><body><a>Start</a></body></html>";
        let out = patched(html, |doc, patches| {
            patches
                .element(id_of(doc, "a"))
                .append_html(r#"<svg viewBox="0 0 1 1"><path d="M0 0"/></svg>"#);
        });
        assert!(
            out.contains(r#"<a>Start<svg viewBox="0 0 1 1"><path d="M0 0"></path></svg></a>"#),
            "{out}"
        );
    }

    #[test]
    fn add_then_remove_cancels() {
        let mut patch = Patch::default();
        patch.add_class("x").remove_class("x");
        assert_eq!(patch.apply_classes(Some("x y")), vec!["y".to_string()]);
    }
}
