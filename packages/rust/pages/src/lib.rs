//! Public page enhancements and rich-text button entities.
//!
//! Rendered pages are post-processed as HTML: clickable section cards,
//! link class normalisation, heading navigation and start-button icons.
//! The [`richtext`] module registers the button entity types with an editor
//! host and renders them.

mod enhance;
mod headings;
pub mod richtext;
mod serialize;

pub use enhance::{EnhancedPage, EnhancementReport, NavigationOutcome, enhance_document};
pub use headings::{
    Heading, HeadingIds, NavItem, build_navigation, render_navigation, slugify_heading,
};
pub use richtext::{
    Capability, EditorHost, EntityDefinition, EntityKind, EntityRegistry, Registration,
    register_button_entities, render_entity_link,
};
