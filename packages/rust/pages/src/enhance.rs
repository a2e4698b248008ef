//! Progressive enhancements applied to rendered public pages.
//!
//! Each transform only runs when the elements it needs are present, so a
//! page without cards, link regions, heading hooks or start buttons passes
//! through unchanged apart from re-serialisation.
//!
//! Transforms read the parsed document and record patches; the patches are
//! applied to the tree afterwards and the tree is written back out.

use govsite_shared::{GovsiteError, PageConfig, Result};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::headings::{Heading, HeadingIds, build_navigation, render_navigation};
use crate::serialize::{PatchSet, apply_patches, write_document};

/// Arrow icon appended to start buttons. `{class}` is replaced with the
/// configured icon class.
const START_ICON_SVG: &str = concat!(
    r#"<svg class="{class}" xmlns="http://www.w3.org/2000/svg" width="17.5" height="19" "#,
    r#"viewBox="0 0 33 40" aria-hidden="true" focusable="false">"#,
    r#"<path fill="currentColor" d="M0 0h13l20 20-20 20H0l20-20z"/></svg>"#
);

/// Headings collected for navigation.
const NAV_HEADING_TAGS: &[&str] = &["h2", "h3", "h4"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of enhancing a page.
#[derive(Debug, Clone)]
pub struct EnhancedPage {
    pub html: String,
    pub report: EnhancementReport,
}

/// What the heading navigation transform did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationOutcome {
    /// Content region or navigation slot missing.
    #[default]
    Unavailable,
    /// Navigation rendered into the slot.
    Rendered,
    /// No headings: navigation column hidden, main column widened.
    Hidden,
}

/// Counts of what each transform changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnhancementReport {
    pub clickable_cards: usize,
    pub links_styled: usize,
    pub inverse_links: usize,
    pub headings: Vec<Heading>,
    pub navigation: NavigationOutcome,
    pub start_icons_added: usize,
}

/// Compiled selectors for one [`PageConfig`].
struct PageSelectors {
    card: Selector,
    link_with_href: Selector,
    link_regions: Vec<Selector>,
    masthead: Selector,
    heading_content: Selector,
    heading_nav: Selector,
    heading_nav_column: Selector,
    heading_main_column: Selector,
    start_button: Selector,
    svg: Selector,
}

impl PageSelectors {
    fn compile(config: &PageConfig) -> Result<Self> {
        Ok(Self {
            card: parse_selector(&config.card_selector)?,
            link_with_href: parse_selector("a[href]")?,
            link_regions: config
                .link_region_selectors
                .iter()
                .map(|s| parse_selector(s))
                .collect::<Result<_>>()?,
            masthead: parse_selector(&config.masthead_selector)?,
            heading_content: parse_selector(&config.heading_content_selector)?,
            heading_nav: parse_selector(&config.heading_nav_selector)?,
            heading_nav_column: parse_selector(&config.heading_nav_column_selector)?,
            heading_main_column: parse_selector(&config.heading_main_column_selector)?,
            start_button: parse_selector(&config.start_button_selector)?,
            svg: parse_selector("svg")?,
        })
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| GovsiteError::config(format!("invalid selector '{selector}': {e}")))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Apply every page enhancement to an HTML document.
#[instrument(skip_all, fields(bytes = html.len()))]
pub fn enhance_document(html: &str, config: &PageConfig) -> Result<EnhancedPage> {
    let selectors = PageSelectors::compile(config)?;
    let mut doc = Html::parse_document(html);

    // Document order.
    let elements: Vec<ElementRef<'_>> = doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .collect();

    let mut patches = PatchSet::default();
    let mut report = EnhancementReport::default();

    clickable_cards(&elements, &selectors, config, &mut patches, &mut report);
    link_classes(&elements, &selectors, config, &mut patches, &mut report);
    heading_navigation(&elements, &selectors, config, &mut patches, &mut report);
    start_button_icons(&elements, &selectors, config, &mut patches, &mut report);

    debug!(
        cards = report.clickable_cards,
        links = report.links_styled,
        headings = report.headings.len(),
        navigation = ?report.navigation,
        icons = report.start_icons_added,
        "page enhanced"
    );

    apply_patches(&mut doc, patches);
    Ok(EnhancedPage {
        html: write_document(&doc)?,
        report,
    })
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

/// Cards containing a link become clickable and record the link target.
fn clickable_cards(
    elements: &[ElementRef<'_>],
    selectors: &PageSelectors,
    config: &PageConfig,
    patches: &mut PatchSet,
    report: &mut EnhancementReport,
) {
    for card in elements {
        if !selectors.card.matches(card) {
            continue;
        }
        let Some(href) = card
            .select(&selectors.link_with_href)
            .next()
            .and_then(|link| link.value().attr("href"))
        else {
            continue;
        };
        patches
            .element(card.id())
            .add_class(&config.card_clickable_class)
            .set_attribute(&config.card_href_attribute, href);
        report.clickable_cards += 1;
    }
}

/// Links (anchors with an `href`) in rich text and mastheads get the
/// standard link class.
fn link_classes(
    elements: &[ElementRef<'_>],
    selectors: &PageSelectors,
    config: &PageConfig,
    patches: &mut PatchSet,
    report: &mut EnhancementReport,
) {
    for link in elements {
        if !selectors.link_with_href.matches(link) {
            continue;
        }
        let in_region = ancestor_elements(link)
            .any(|a| selectors.link_regions.iter().any(|s| s.matches(&a)));
        if !in_region || has_class(link, &config.button_class) {
            continue;
        }

        if !has_class(link, &config.link_class) {
            patches.element(link.id()).add_class(&config.link_class);
            report.links_styled += 1;
        }

        let in_combined_masthead = ancestor_elements(link).any(|a| {
            selectors.masthead.matches(&a) && has_class(&a, &config.masthead_combined_class)
        });
        if in_combined_masthead && !has_class(link, &config.inverse_link_class) {
            patches.element(link.id()).add_class(&config.inverse_link_class);
            report.inverse_links += 1;
        }
    }
}

/// Assign heading ids and fill the navigation slot, or collapse the
/// navigation column when the content has no headings.
fn heading_navigation(
    elements: &[ElementRef<'_>],
    selectors: &PageSelectors,
    config: &PageConfig,
    patches: &mut PatchSet,
    report: &mut EnhancementReport,
) {
    let first_match =
        |selector: &Selector| elements.iter().find(|el| selector.matches(el)).copied();

    let (Some(content), Some(nav)) = (
        first_match(&selectors.heading_content),
        first_match(&selectors.heading_nav),
    ) else {
        return;
    };

    let mut ids = HeadingIds::with_existing(
        elements
            .iter()
            .filter_map(|el| el.value().id())
            .filter(|id| !id.trim().is_empty()),
    );

    let mut headings = Vec::new();
    for el in elements {
        let name = el.value().name();
        if !NAV_HEADING_TAGS.contains(&name) {
            continue;
        }
        if !ancestor_elements(el).any(|a| a.id() == content.id()) {
            continue;
        }

        let text = collapse_whitespace(&el.text().collect::<String>());
        let existing = el.value().id().filter(|id| !id.trim().is_empty());
        let id = ids.assign(&text, existing);
        if existing.is_none() {
            patches.element(el.id()).set_attribute("id", &id);
        }
        headings.push(Heading {
            level: name[1..].parse().unwrap_or(2),
            id,
            text,
        });
    }

    if headings.is_empty() {
        if let Some(column) = first_match(&selectors.heading_nav_column) {
            patches.element(column.id()).set_attribute("hidden", "");
        }
        if let Some(main) = first_match(&selectors.heading_main_column) {
            patches
                .element(main.id())
                .remove_class(&config.two_thirds_class)
                .add_class(&config.full_width_class);
        }
        report.navigation = NavigationOutcome::Hidden;
        return;
    }

    let items = build_navigation(&headings);
    patches
        .element(nav.id())
        .replace_children(render_navigation(&items, &config.link_class));
    report.navigation = NavigationOutcome::Rendered;
    report.headings = headings;
}

/// Start buttons without an icon get the arrow SVG.
fn start_button_icons(
    elements: &[ElementRef<'_>],
    selectors: &PageSelectors,
    config: &PageConfig,
    patches: &mut PatchSet,
    report: &mut EnhancementReport,
) {
    let icon = START_ICON_SVG.replace("{class}", &config.start_icon_class);
    for button in elements {
        if !selectors.start_button.matches(button) {
            continue;
        }
        if button.select(&selectors.svg).next().is_some() {
            continue;
        }
        patches.element(button.id()).append_html(&icon);
        report.start_icons_added += 1;
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ancestor_elements<'a>(el: &ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.ancestors().filter_map(ElementRef::wrap)
}

fn has_class(el: &ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enhance(body: &str) -> EnhancedPage {
        let html = format!("<!DOCTYPE html><html><head></head><body>{body}</body></html>");
        enhance_document(&html, &PageConfig::default()).unwrap()
    }

    fn select_one<'a>(doc: &'a Html, selector: &str) -> ElementRef<'a> {
        doc.select(&Selector::parse(selector).unwrap())
            .next()
            .unwrap_or_else(|| panic!("no element for {selector}"))
    }

    #[test]
    fn card_with_link_becomes_clickable() {
        let page = enhance(
            r#"<div class="section-card"><h2><a href="/benefits">Benefits</a></h2><p>Help</p></div>"#,
        );
        let doc = Html::parse_document(&page.html);
        let card = select_one(&doc, ".section-card");
        assert!(has_class(&card, "section-card--clickable"));
        assert_eq!(card.value().attr("data-card-href"), Some("/benefits"));
        assert_eq!(page.report.clickable_cards, 1);
    }

    #[test]
    fn card_without_anchor_is_untouched() {
        let page = enhance(r#"<div class="section-card"><h2>No link here</h2></div>"#);
        let doc = Html::parse_document(&page.html);
        let card = select_one(&doc, ".section-card");
        assert!(!has_class(&card, "section-card--clickable"));
        assert!(card.value().attr("data-card-href").is_none());
        assert_eq!(page.report.clickable_cards, 0);
    }

    #[test]
    fn rich_text_links_get_link_class_but_buttons_do_not() {
        let page = enhance(concat!(
            r#"<div class="rich-text"><p><a id="plain" href="/a">A</a>"#,
            r#"<a id="btn" class="govuk-button" href="/b">B</a></p></div>"#,
            r#"<a id="outside" href="/c">C</a>"#
        ));
        let doc = Html::parse_document(&page.html);
        assert!(has_class(&select_one(&doc, "#plain"), "govuk-link"));
        assert!(!has_class(&select_one(&doc, "#btn"), "govuk-link"));
        assert!(!has_class(&select_one(&doc, "#outside"), "govuk-link"));
        assert_eq!(page.report.links_styled, 1);
    }

    #[test]
    fn named_anchors_are_not_styled() {
        let page = enhance(r#"<div class="rich-text"><a id="top" name="top"></a><a id="x" href="/x">X</a></div>"#);
        let doc = Html::parse_document(&page.html);
        assert!(!has_class(&select_one(&doc, "#top"), "govuk-link"));
        assert!(has_class(&select_one(&doc, "#x"), "govuk-link"));
        assert_eq!(page.report.links_styled, 1);
    }

    #[test]
    fn untouched_markup_survives_enhancement() {
        let page = enhance(concat!(
            r#"<noscript><img src="/pixel.gif" alt=""></noscript>"#,
            r##"<svg><use xlink:href="#icon"></use></svg>"##,
            r#"<div class="rich-text"><a href="/a">A</a></div>"#
        ));
        assert!(
            page.html
                .contains(r#"<noscript><img src="/pixel.gif" alt=""></noscript>"#),
            "{}",
            page.html
        );
        assert!(page.html.contains(r##"<use xlink:href="#icon">"##), "{}", page.html);
        assert_eq!(page.report.links_styled, 1);
    }

    #[test]
    fn combined_masthead_links_are_inverse() {
        let page = enhance(concat!(
            r#"<div class="app-masthead app-masthead--combined"><a id="m" href="/x">X</a></div>"#,
            r#"<div class="app-masthead"><a id="n" href="/y">Y</a></div>"#
        ));
        let doc = Html::parse_document(&page.html);
        let combined = select_one(&doc, "#m");
        assert!(has_class(&combined, "govuk-link"));
        assert!(has_class(&combined, "govuk-link--inverse"));
        let plain = select_one(&doc, "#n");
        assert!(has_class(&plain, "govuk-link"));
        assert!(!has_class(&plain, "govuk-link--inverse"));
        assert_eq!(page.report.inverse_links, 1);
    }

    #[test]
    fn headings_get_unique_ids_and_navigation() {
        let page = enhance(concat!(
            r#"<div class="govuk-grid-row">"#,
            r#"<div class="govuk-grid-column-one-third" data-heading-nav-column><nav data-heading-nav></nav></div>"#,
            r#"<div class="govuk-grid-column-two-thirds" data-heading-nav-main><div data-heading-nav-content>"#,
            "<h2>Overview</h2><p>.</p><h2>Overview</h2><h3>Next  Steps</h3>",
            "</div></div></div>"
        ));
        let ids: Vec<&str> = page.report.headings.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["overview", "overview-2", "next-steps"]);
        assert_eq!(page.report.navigation, NavigationOutcome::Rendered);

        let doc = Html::parse_document(&page.html);
        let links: Vec<String> = doc
            .select(&Selector::parse("[data-heading-nav] a").unwrap())
            .filter_map(|a| a.value().attr("href").map(String::from))
            .collect();
        assert_eq!(links, vec!["#overview", "#overview-2", "#next-steps"]);
        // h3 is nested under the second h2
        let nested = select_one(&doc, "[data-heading-nav] li li a");
        assert_eq!(nested.value().attr("href"), Some("#next-steps"));
        assert!(doc
            .select(&Selector::parse("h2#overview-2").unwrap())
            .next()
            .is_some());
        let main = select_one(&doc, "[data-heading-nav-main]");
        assert!(has_class(&main, "govuk-grid-column-two-thirds"));
    }

    #[test]
    fn existing_ids_are_respected() {
        let page = enhance(concat!(
            r#"<p id="overview">intro</p><nav data-heading-nav></nav><div data-heading-nav-content>"#,
            r#"<h2>Overview</h2><h2 id="fees">Costs</h2></div>"#
        ));
        let ids: Vec<&str> = page.report.headings.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["overview-2", "fees"]);
    }

    #[test]
    fn zero_headings_hide_navigation_and_widen_main() {
        let page = enhance(concat!(
            r#"<div class="govuk-grid-column-one-third" data-heading-nav-column><nav data-heading-nav></nav></div>"#,
            r#"<div class="govuk-grid-column-two-thirds" data-heading-nav-main>"#,
            r#"<div data-heading-nav-content><p>Just text</p><h5>Too deep</h5></div></div>"#
        ));
        assert_eq!(page.report.navigation, NavigationOutcome::Hidden);
        let doc = Html::parse_document(&page.html);
        let column = select_one(&doc, "[data-heading-nav-column]");
        assert!(column.value().attr("hidden").is_some());
        let main = select_one(&doc, "[data-heading-nav-main]");
        assert!(has_class(&main, "govuk-grid-column-full"));
        assert!(!has_class(&main, "govuk-grid-column-two-thirds"));
    }

    #[test]
    fn headings_outside_content_are_ignored() {
        let page = enhance(concat!(
            r#"<h2>Page chrome</h2><nav data-heading-nav></nav>"#,
            r#"<div data-heading-nav-content><h2>Inside</h2></div>"#
        ));
        assert_eq!(page.report.headings.len(), 1);
        assert_eq!(page.report.headings[0].id, "inside");
    }

    #[test]
    fn missing_hooks_skip_heading_navigation() {
        let page = enhance("<h2>Lonely</h2>");
        assert_eq!(page.report.navigation, NavigationOutcome::Unavailable);
        assert!(!page.html.contains("id=\"lonely\""));
    }

    #[test]
    fn start_button_gets_icon_once() {
        let page = enhance(concat!(
            r#"<a id="s1" class="govuk-button govuk-button--start" href="/go">Start now</a>"#,
            r#"<a id="s2" class="govuk-button govuk-button--start" href="/go">Start <svg class="custom"></svg></a>"#
        ));
        assert_eq!(page.report.start_icons_added, 1);
        let doc = Html::parse_document(&page.html);
        assert!(doc
            .select(&Selector::parse("#s1 svg.govuk-button__start-icon").unwrap())
            .next()
            .is_some());
        assert_eq!(
            doc.select(&Selector::parse("#s2 svg").unwrap()).count(),
            1
        );

        // a second pass changes nothing
        let again = enhance_document(&page.html, &PageConfig::default()).unwrap();
        assert_eq!(again.report.start_icons_added, 0);
    }

    #[test]
    fn invalid_selector_is_config_error() {
        let config = PageConfig {
            card_selector: "[[".into(),
            ..PageConfig::default()
        };
        let err = enhance_document("<p></p>", &config).unwrap_err();
        assert!(matches!(err, GovsiteError::Config { .. }));
    }
}
