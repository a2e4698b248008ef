//! Heading identifiers and nested heading navigation.
//!
//! Everything here is pure: the set of identifiers already in use is an
//! explicit [`HeadingIds`] value threaded through assignment, so the same
//! headings always produce the same ids.

use std::collections::HashSet;

use serde::Serialize;

/// Fallback slug for headings whose text has no alphanumerics.
const EMPTY_SLUG: &str = "section";

/// A heading picked up for navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heading {
    /// 2, 3 or 4.
    pub level: u8,
    pub id: String,
    pub text: String,
}

/// One entry in the heading navigation tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavItem {
    pub level: u8,
    pub id: String,
    pub text: String,
    pub children: Vec<NavItem>,
}

/// Lower-case the text, collapse runs of anything but ASCII letters and
/// digits to `-` and trim.
///
/// Returns `"section"` when nothing alphanumeric remains.
pub fn slugify_heading(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        slug
    }
}

/// Identifiers already taken in a document.
#[derive(Debug, Clone, Default)]
pub struct HeadingIds {
    used: HashSet<String>,
}

impl HeadingIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with ids that already exist in the document.
    pub fn with_existing<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            used: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.used.contains(id)
    }

    /// Pick the id for a heading.
    ///
    /// A non-blank `existing` id is kept as-is. Otherwise the slug of
    /// `text` is used, suffixed `-2`, `-3`, ... until unused.
    pub fn assign(&mut self, text: &str, existing: Option<&str>) -> String {
        if let Some(id) = existing.map(str::trim).filter(|id| !id.is_empty()) {
            self.used.insert(id.to_string());
            return id.to_string();
        }

        let base = slugify_heading(text);
        let mut candidate = base.clone();
        let mut suffix = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

/// Nest headings: h3 under the preceding h2, h4 under the preceding h3.
///
/// A heading with no shallower predecessor stays at the top level.
pub fn build_navigation(headings: &[Heading]) -> Vec<NavItem> {
    let mut roots = Vec::new();
    for heading in headings {
        insert_nav_item(
            &mut roots,
            NavItem {
                level: heading.level,
                id: heading.id.clone(),
                text: heading.text.clone(),
                children: Vec::new(),
            },
        );
    }
    roots
}

fn insert_nav_item(items: &mut Vec<NavItem>, item: NavItem) {
    match items.last_mut() {
        Some(last) if last.level < item.level => insert_nav_item(&mut last.children, item),
        _ => items.push(item),
    }
}

/// Render navigation as nested `<ul class="app-heading-nav__list">` lists.
pub fn render_navigation(items: &[NavItem], link_class: &str) -> String {
    let mut html = String::new();
    write_nav_list(items, link_class, &mut html);
    html
}

fn write_nav_list(items: &[NavItem], link_class: &str, out: &mut String) {
    if items.is_empty() {
        return;
    }
    out.push_str(r#"<ul class="app-heading-nav__list">"#);
    for item in items {
        out.push_str(r#"<li class="app-heading-nav__item">"#);
        out.push_str(&format!(
            r##"<a class="{}" href="#{}">{}</a>"##,
            escape_attr(link_class),
            escape_attr(&item.id),
            escape_text(&item.text)
        ));
        write_nav_list(&item.children, link_class, out);
        out.push_str("</li>");
    }
    out.push_str("</ul>");
}

pub(crate) fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub(crate) fn escape_attr(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heading(level: u8, id: &str) -> Heading {
        Heading {
            level,
            id: id.into(),
            text: id.to_uppercase(),
        }
    }

    #[test]
    fn duplicate_headings_get_numeric_suffixes() {
        let mut ids = HeadingIds::new();
        let assigned: Vec<String> = ["Overview", "Overview", "Next Steps"]
            .iter()
            .map(|text| ids.assign(text, None))
            .collect();
        assert_eq!(assigned, vec!["overview", "overview-2", "next-steps"]);
    }

    #[test]
    fn slug_rules() {
        assert_eq!(slugify_heading("  What's new?  "), "what-s-new");
        assert_eq!(slugify_heading("Step 1: Apply -- now"), "step-1-apply-now");
        assert_eq!(slugify_heading("Café ²"), "caf");
        assert_eq!(slugify_heading("Élan Vital"), "lan-vital");
        assert_eq!(slugify_heading("日本語"), "section");
        assert_eq!(slugify_heading("!!!"), "section");
        assert_eq!(slugify_heading(""), "section");
    }

    #[test]
    fn existing_ids_are_kept_and_reserved() {
        let mut ids = HeadingIds::with_existing(["overview", "main-content"]);
        assert_eq!(ids.assign("Overview", None), "overview-2");
        assert_eq!(ids.assign("Anything", Some("custom")), "custom");
        assert_eq!(ids.assign("Custom", None), "custom-2");
        assert!(ids.contains("main-content"));
    }

    #[test]
    fn blank_existing_id_is_ignored() {
        let mut ids = HeadingIds::new();
        assert_eq!(ids.assign("Contact us", Some("  ")), "contact-us");
    }

    #[test]
    fn empty_slugs_collide_like_any_other() {
        let mut ids = HeadingIds::new();
        assert_eq!(ids.assign("***", None), "section");
        assert_eq!(ids.assign("---", None), "section-2");
    }

    #[test]
    fn navigation_nests_by_level() {
        let nav = build_navigation(&[
            heading(2, "a"),
            heading(3, "a1"),
            heading(4, "a1x"),
            heading(3, "a2"),
            heading(2, "b"),
            heading(4, "b-deep"),
        ]);
        assert_eq!(nav.len(), 2);
        assert_eq!(nav[0].children.len(), 2);
        assert_eq!(nav[0].children[0].children[0].id, "a1x");
        assert_eq!(nav[0].children[1].id, "a2");
        // h4 with no h3 in between sits under the h2
        assert_eq!(nav[1].children[0].id, "b-deep");
    }

    #[test]
    fn leading_h3_stays_top_level() {
        let nav = build_navigation(&[heading(3, "intro"), heading(2, "main")]);
        assert_eq!(nav.len(), 2);
        assert!(nav[0].children.is_empty());
    }

    #[test]
    fn renders_nested_lists() {
        let nav = build_navigation(&[
            Heading {
                level: 2,
                id: "costs".into(),
                text: "Costs & fees".into(),
            },
            Heading {
                level: 3,
                id: "refunds".into(),
                text: "Refunds".into(),
            },
        ]);
        let html = render_navigation(&nav, "govuk-link");
        assert_eq!(
            html,
            concat!(
                r#"<ul class="app-heading-nav__list"><li class="app-heading-nav__item">"#,
                r##"<a class="govuk-link" href="#costs">Costs &amp; fees</a>"##,
                r#"<ul class="app-heading-nav__list"><li class="app-heading-nav__item">"#,
                r##"<a class="govuk-link" href="#refunds">Refunds</a></li></ul>"##,
                "</li></ul>"
            )
        );
    }

    #[test]
    fn empty_navigation_renders_nothing() {
        assert_eq!(render_navigation(&[], "govuk-link"), "");
    }
}
