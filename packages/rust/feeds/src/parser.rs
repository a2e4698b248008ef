//! Atom and RSS feed parsing.
//!
//! Both formats are read with `roxmltree` and normalised into
//! [`FeedEntry`] values. Atom children are matched by qualified name in
//! the feed's namespace; RSS children are matched by case-insensitive
//! local name so that `dc:creator`, `content:encoded` and friends work
//! without namespace bookkeeping.

use govsite_shared::{GovsiteError, ItemMetadata, Result};
use roxmltree::{Document, Node, ParsingOptions};

use crate::text::{decode_body, parse_timestamp, unescape_html};
use crate::{FeedEntry, FeedFormat};

/// The only namespace accepted on an Atom `<feed>` root.
const ATOM_NAMESPACE: &str = "http://www.w3.org/2005/Atom";

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Parse an Atom or RSS document, dispatching on the root element.
pub fn parse_feed(body: &[u8]) -> Result<Vec<FeedEntry>> {
    let text = decode_body(body)?;
    let doc = parse_document(text)?;
    let root = doc.root_element();
    match local_name(root).as_str() {
        "feed" => parse_atom_root(root),
        "rss" => parse_rss_root(root),
        _ => Err(GovsiteError::parse(
            "Unsupported content type: expected an Atom <feed> or RSS <rss> document.",
        )),
    }
}

/// Parse a document that must be an Atom feed.
pub fn parse_atom_feed(body: &[u8]) -> Result<Vec<FeedEntry>> {
    let text = decode_body(body)?;
    let doc = parse_document(text)?;
    parse_atom_root(doc.root_element())
}

/// Parse a document that must be an RSS feed.
pub fn parse_rss_feed(body: &[u8]) -> Result<Vec<FeedEntry>> {
    let text = decode_body(body)?;
    let doc = parse_document(text)?;
    parse_rss_root(doc.root_element())
}

fn parse_document(text: &str) -> Result<Document<'_>> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, options)
        .map_err(|e| GovsiteError::parse(format!("Response body is not valid XML: {e}")))
}

// ---------------------------------------------------------------------------
// Atom
// ---------------------------------------------------------------------------

fn parse_atom_root(root: Node<'_, '_>) -> Result<Vec<FeedEntry>> {
    if local_name(root) != "feed" {
        return Err(GovsiteError::parse(
            "Unsupported content type: expected an Atom <feed> document.",
        ));
    }

    let namespace = root.tag_name().namespace();
    if let Some(ns) = namespace {
        if ns != ATOM_NAMESPACE {
            return Err(GovsiteError::parse(
                "Unsupported XML namespace. Only Atom feeds are supported currently.",
            ));
        }
    }

    let mut entries = Vec::new();
    for entry in children_named(root, "entry", namespace) {
        let url = atom_entry_link(entry, namespace);
        let title = find_text(entry, "title", namespace);
        let mut summary = find_text(entry, "summary", namespace);
        if summary.is_empty() {
            summary = find_text(entry, "content", namespace);
        }

        let published_raw = find_text(entry, "published", namespace);
        let mut updated_raw = find_text(entry, "updated", namespace);
        if updated_raw.is_empty() {
            updated_raw = published_raw.clone();
        }

        let author_names = children_named(entry, "author", namespace)
            .map(|author| find_text(author, "name", namespace))
            .filter(|name| !name.is_empty())
            .collect();

        let entry_id = non_empty_or(find_text(entry, "id", namespace), &url);

        entries.push(FeedEntry {
            format: FeedFormat::Atom,
            created_at: parse_timestamp(first_non_empty(&published_raw, &updated_raw)),
            updated_at: parse_timestamp(first_non_empty(&updated_raw, &published_raw)),
            url,
            title,
            summary,
            entry_id,
            author_names,
            published_raw,
            updated_raw,
            metadata: ItemMetadata::new(),
        });
    }
    Ok(entries)
}

/// Prefer the `alternate` link (the default rel), else any link with an href.
fn atom_entry_link(entry: Node<'_, '_>, namespace: Option<&str>) -> String {
    let links: Vec<Node<'_, '_>> = children_named(entry, "link", namespace).collect();
    let href = |node: &Node<'_, '_>| node.attribute("href").unwrap_or("").trim().to_string();

    let alternate = links.iter().find(|link| {
        let rel = link.attribute("rel").unwrap_or("alternate").trim().to_lowercase();
        rel == "alternate" && !href(link).is_empty()
    });
    if let Some(link) = alternate {
        return href(link);
    }
    links
        .iter()
        .map(href)
        .find(|h| !h.is_empty())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// RSS
// ---------------------------------------------------------------------------

fn parse_rss_root(root: Node<'_, '_>) -> Result<Vec<FeedEntry>> {
    if local_name(root) != "rss" {
        return Err(GovsiteError::parse(
            "Unsupported content type: expected an RSS <rss> document.",
        ));
    }

    let channel = root
        .children()
        .filter(Node::is_element)
        .find(|child| local_name(*child) == "channel")
        .ok_or_else(|| {
            GovsiteError::parse("Unsupported RSS document: missing required <channel> element.")
        })?;

    let mut entries = Vec::new();
    for item in channel
        .children()
        .filter(|child| child.is_element() && local_name(*child) == "item")
    {
        let url = find_text_local(item, &["link"]);
        let title = find_text_local(item, &["title"]);
        let summary = find_text_local(item, &["description", "summary", "content", "encoded"]);
        let published_raw = find_text_local(item, &["pubdate", "published", "created", "date"]);
        let mut updated_raw = find_text_local(item, &["updated", "modified"]);
        if updated_raw.is_empty() {
            updated_raw = published_raw.clone();
        }
        let entry_id = non_empty_or(find_text_local(item, &["guid", "id"]), &url);

        entries.push(FeedEntry {
            format: FeedFormat::Rss,
            created_at: parse_timestamp(first_non_empty(&published_raw, &updated_raw)),
            updated_at: parse_timestamp(first_non_empty(&updated_raw, &published_raw)),
            author_names: find_all_text_local(item, &["author", "creator"]),
            url,
            title,
            summary,
            entry_id,
            published_raw,
            updated_raw,
            metadata: ItemMetadata::new(),
        });
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Element helpers
// ---------------------------------------------------------------------------

fn local_name(node: Node<'_, '_>) -> String {
    node.tag_name().name().to_lowercase()
}

/// Direct element children with the given name in the given namespace.
fn children_named<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
    namespace: Option<&'a str>,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children().filter(move |child| {
        child.is_element()
            && child.tag_name().name() == name
            && child.tag_name().namespace() == namespace
    })
}

/// Concatenated descendant text, trimmed, with residual entities decoded.
fn element_text(node: Node<'_, '_>) -> String {
    let text: String = node
        .descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect();
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    unescape_html(text)
}

fn find_text(node: Node<'_, '_>, name: &str, namespace: Option<&str>) -> String {
    children_named(node, name, namespace)
        .next()
        .map(element_text)
        .unwrap_or_default()
}

/// First non-empty child text whose local name matches any of `names`.
///
/// `names` must be lower case.
fn find_text_local(node: Node<'_, '_>, names: &[&str]) -> String {
    node.children()
        .filter(|child| child.is_element() && names.contains(&local_name(*child).as_str()))
        .map(element_text)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

fn find_all_text_local(node: Node<'_, '_>, names: &[&str]) -> Vec<String> {
    node.children()
        .filter(|child| child.is_element() && names.contains(&local_name(*child).as_str()))
        .map(element_text)
        .filter(|value| !value.is_empty())
        .collect()
}

fn first_non_empty<'a>(first: &'a str, second: &'a str) -> &'a str {
    if first.is_empty() { second } else { first }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(format!("../../../fixtures/feeds/{name}"))
            .unwrap_or_else(|_| panic!("missing fixture: {name}"))
    }

    #[test]
    fn parses_atom_fixture() {
        let entries = parse_feed(&fixture("atom.xml")).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.format, FeedFormat::Atom);
        assert_eq!(first.url, "https://example.gov.uk/posts/first");
        assert_eq!(first.title, "First post & notes");
        assert_eq!(first.summary, "A short summary.");
        assert_eq!(first.entry_id, "tag:example.gov.uk,2024:first");
        assert_eq!(first.author_names, vec!["Ada Lovelace", "Grace Hopper"]);
        assert_eq!(
            first.created_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap())
        );
        assert_eq!(
            first.updated_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 10, 30, 0).unwrap())
        );

        let second = &entries[1];
        // rel="self" loses to the alternate link; summary falls back to content
        assert_eq!(second.url, "https://example.gov.uk/posts/second");
        assert_eq!(second.summary, "Body content only.");
        assert_eq!(second.entry_id, "https://example.gov.uk/posts/second");
        assert_eq!(second.updated_raw, second.published_raw);
    }

    #[test]
    fn parses_rss_fixture() {
        let entries = parse_feed(&fixture("rss.xml")).unwrap();
        assert_eq!(entries.len(), 3);

        let first = &entries[0];
        assert_eq!(first.format, FeedFormat::Rss);
        assert_eq!(first.url, "https://example.gov.uk/news/one");
        assert_eq!(first.title, "News one");
        assert_eq!(first.summary, "First <em>news</em> item");
        assert_eq!(first.entry_id, "news-1");
        assert_eq!(first.author_names, vec!["Press Office"]);
        assert_eq!(
            first.created_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap())
        );

        let second = &entries[1];
        assert_eq!(second.summary, "Encoded body");
        assert_eq!(second.entry_id, "https://example.gov.uk/news/two");
        assert_eq!(second.author_names, vec!["Jane Doe"]);

        // the third item has no link; sync skips it
        assert_eq!(entries[2].url, "");
    }

    #[test]
    fn atom_rejects_foreign_namespace() {
        let xml = br#"<feed xmlns="http://example.com/not-atom"><entry/></feed>"#;
        let err = parse_feed(xml).unwrap_err();
        assert!(err.to_string().contains("Unsupported XML namespace"));
    }

    #[test]
    fn atom_without_namespace_is_accepted() {
        let xml = br#"<feed><entry><link href="https://a.example/x"/><title>X</title></entry></feed>"#;
        let entries = parse_atom_feed(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://a.example/x");
        assert!(entries[0].created_at.is_none());
    }

    #[test]
    fn rss_requires_channel() {
        let err = parse_rss_feed(b"<rss version=\"2.0\"></rss>").unwrap_err();
        assert!(err.to_string().contains("missing required <channel>"));
    }

    #[test]
    fn unknown_root_is_rejected() {
        let err = parse_feed(b"<html><body/></html>").unwrap_err();
        assert!(err.to_string().contains("expected an Atom <feed> or RSS <rss>"));

        let err = parse_atom_feed(b"<rss><channel/></rss>").unwrap_err();
        assert!(err.to_string().contains("expected an Atom <feed> document"));
    }

    #[test]
    fn malformed_xml_is_parse_error() {
        let err = parse_feed(b"<feed><entry></feed>").unwrap_err();
        assert!(matches!(err, GovsiteError::Parse { .. }));
        assert!(err.to_string().contains("not valid XML"));
    }
}
