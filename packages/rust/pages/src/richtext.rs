//! Button link entities for the rich-text editor.
//!
//! Two inline entity types annotate a link as a button or a start button.
//! Registration goes through the [`EditorHost`] seam: the host is probed
//! for every capability first and nothing is registered unless all of them
//! are available.

use std::collections::BTreeMap;

use govsite_shared::{GovsiteError, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::headings::{escape_attr, escape_text};

/// Name of the host's existing link chooser, reused as the entity source.
pub const LINK_SOURCE: &str = "LinkSource";

/// Button classes on public pages.
const BUTTON_CLASS: &str = "govuk-button";
const START_BUTTON_CLASS: &str = "govuk-button--start";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The entity types this plugin adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EntityKind {
    ButtonLink,
    StartButtonLink,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::ButtonLink, EntityKind::StartButtonLink];

    /// Entity type name stored in rich-text content.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ButtonLink => "BUTTON_LINK",
            Self::StartButtonLink => "START_BUTTON_LINK",
        }
    }

    /// Toolbar and pill label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ButtonLink => "Button link",
            Self::StartButtonLink => "Start button link",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_name() == name)
    }

    fn modifier(&self) -> &'static str {
        match self {
            Self::ButtonLink => "button-link",
            Self::StartButtonLink => "start-button-link",
        }
    }
}

/// Extension points an editor host may or may not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Capability {
    /// The host accepts new entity type registrations.
    EntityRegistry,
    /// The host exposes a link chooser entities can reuse.
    LinkSource,
    /// The host renders entities through decorators.
    Decorators,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::EntityRegistry,
        Capability::LinkSource,
        Capability::Decorators,
    ];
}

/// Renders an annotated span in the editor: `(kind, url, text) -> html`.
pub type Decorator = fn(EntityKind, &str, &str) -> String;

/// Everything the host needs to offer an entity type.
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    pub kind: EntityKind,
    pub type_name: &'static str,
    pub label: &'static str,
    /// Source workflow used to pick the link.
    pub source: &'static str,
    pub decorator: Decorator,
}

impl EntityDefinition {
    pub fn for_kind(kind: EntityKind) -> Self {
        Self {
            kind,
            type_name: kind.type_name(),
            label: kind.label(),
            source: LINK_SOURCE,
            decorator: decorate_entity,
        }
    }
}

/// Outcome of [`register_button_entities`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The host lacks required capabilities; nothing was registered.
    Skipped { missing: Vec<Capability> },
    /// Kinds newly registered by this call (empty when already present).
    Registered { added: Vec<EntityKind> },
}

// ---------------------------------------------------------------------------
// Host seam
// ---------------------------------------------------------------------------

/// The rich-text editor as seen by this plugin.
pub trait EditorHost {
    /// Whether the host provides an extension point.
    fn supports(&self, capability: Capability) -> bool;

    /// Whether an entity type name is already registered.
    fn is_registered(&self, type_name: &str) -> bool;

    /// Register an entity type.
    fn register_entity(&mut self, definition: EntityDefinition) -> Result<()>;
}

/// Register the button entities with `host`.
///
/// Skips silently when a capability is missing. Calling it again is a
/// no-op for kinds that are already registered.
pub fn register_button_entities(host: &mut dyn EditorHost) -> Result<Registration> {
    let missing: Vec<Capability> = Capability::ALL
        .into_iter()
        .filter(|c| !host.supports(*c))
        .collect();
    if !missing.is_empty() {
        debug!(?missing, "editor host lacks capabilities; skipping button entities");
        return Ok(Registration::Skipped { missing });
    }

    let mut added = Vec::new();
    for kind in EntityKind::ALL {
        if host.is_registered(kind.type_name()) {
            continue;
        }
        host.register_entity(EntityDefinition::for_kind(kind))?;
        added.push(kind);
    }
    if !added.is_empty() {
        info!(?added, "registered button entities");
    }
    Ok(Registration::Registered { added })
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Editor-side pill showing the label, the annotated text and the stored URL.
pub fn decorate_entity(kind: EntityKind, url: &str, text: &str) -> String {
    format!(
        concat!(
            r#"<span class="app-entity-pill app-entity-pill--{modifier}" "#,
            r#"data-entity-type="{type_name}" title="{url}" role="button" tabindex="0">"#,
            r#"<span class="app-entity-pill__label">{label}</span>"#,
            r#"<span class="app-entity-pill__text">{text}</span>"#,
            r#"<span class="app-entity-pill__url">{url}</span></span>"#
        ),
        modifier = kind.modifier(),
        type_name = kind.type_name(),
        label = escape_text(kind.label()),
        text = escape_text(text),
        url = escape_attr(url),
    )
}

/// Public HTML for a button entity.
///
/// Start buttons carry the start modifier; the page enhancement adds the
/// arrow icon.
pub fn render_entity_link(kind: EntityKind, url: &str, text: &str) -> String {
    let classes = match kind {
        EntityKind::ButtonLink => BUTTON_CLASS.to_string(),
        EntityKind::StartButtonLink => format!("{BUTTON_CLASS} {START_BUTTON_CLASS}"),
    };
    format!(
        r#"<a href="{url}" role="button" draggable="false" class="{classes}" data-module="govuk-button">{text}</a>"#,
        url = escape_attr(url),
        text = escape_text(text),
    )
}

// ---------------------------------------------------------------------------
// In-process host
// ---------------------------------------------------------------------------

/// A simple editor host that records registered entity types.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    capabilities: Vec<Capability>,
    entities: BTreeMap<&'static str, EntityDefinition>,
}

impl EntityRegistry {
    /// A host offering every capability.
    pub fn new() -> Self {
        Self::with_capabilities(Capability::ALL)
    }

    pub fn with_capabilities(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
            entities: BTreeMap::new(),
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&EntityDefinition> {
        self.entities.get(type_name)
    }

    /// Registered definitions, ordered by type name.
    pub fn definitions(&self) -> impl Iterator<Item = &EntityDefinition> {
        self.entities.values()
    }
}

impl EditorHost for EntityRegistry {
    fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn is_registered(&self, type_name: &str) -> bool {
        self.entities.contains_key(type_name)
    }

    fn register_entity(&mut self, definition: EntityDefinition) -> Result<()> {
        if !self.supports(Capability::EntityRegistry) {
            return Err(GovsiteError::validation(
                "editor host does not accept entity registrations",
            ));
        }
        self.entities.insert(definition.type_name, definition);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_both_kinds_once() {
        let mut host = EntityRegistry::new();
        let first = register_button_entities(&mut host).unwrap();
        assert_eq!(
            first,
            Registration::Registered {
                added: vec![EntityKind::ButtonLink, EntityKind::StartButtonLink]
            }
        );
        let second = register_button_entities(&mut host).unwrap();
        assert_eq!(second, Registration::Registered { added: vec![] });
        assert_eq!(host.definitions().count(), 2);

        let def = host.get("START_BUTTON_LINK").unwrap();
        assert_eq!(def.label, "Start button link");
        assert_eq!(def.source, LINK_SOURCE);
    }

    #[test]
    fn missing_capability_skips_without_error() {
        let mut host =
            EntityRegistry::with_capabilities([Capability::EntityRegistry, Capability::LinkSource]);
        let outcome = register_button_entities(&mut host).unwrap();
        assert_eq!(
            outcome,
            Registration::Skipped {
                missing: vec![Capability::Decorators]
            }
        );
        assert_eq!(host.definitions().count(), 0);
    }

    #[test]
    fn partially_registered_host_only_gets_the_rest() {
        let mut host = EntityRegistry::new();
        host.register_entity(EntityDefinition::for_kind(EntityKind::ButtonLink))
            .unwrap();
        let outcome = register_button_entities(&mut host).unwrap();
        assert_eq!(
            outcome,
            Registration::Registered {
                added: vec![EntityKind::StartButtonLink]
            }
        );
    }

    #[test]
    fn decorator_escapes_url_and_text() {
        let html = decorate_entity(
            EntityKind::ButtonLink,
            r#"https://example.gov.uk/?a=1&b="2""#,
            "Apply <now>",
        );
        assert!(html.contains(r#"data-entity-type="BUTTON_LINK""#));
        assert!(html.contains("Button link"));
        assert!(html.contains("Apply &lt;now&gt;"));
        assert!(html.contains("a=1&amp;b=&quot;2&quot;"));
        assert!(!html.contains("<now>"));
    }

    #[test]
    fn start_button_links_carry_start_class() {
        let html = render_entity_link(EntityKind::StartButtonLink, "/apply", "Start now");
        assert!(html.contains(r#"class="govuk-button govuk-button--start""#));
        assert!(html.contains(">Start now</a>"));

        let html = render_entity_link(EntityKind::ButtonLink, "/apply", "Continue");
        assert!(html.contains(r#"class="govuk-button""#));
        assert!(!html.contains("govuk-button--start"));
    }

    #[test]
    fn type_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_type_name(kind.type_name()), Some(kind));
        }
        assert_eq!(EntityKind::from_type_name("LINK"), None);
    }
}
