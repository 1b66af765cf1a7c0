//! Discovery work sources
//!
//! Each discovery phase pulls candidate entities from one kind of source:
//! the keyword search listing, the popular/new listings, or the sidebars of
//! entities found earlier. Every page fetch is a single recovery-wrapped
//! operation.

use crate::recovery::{RecoveryController, RecoveryResult};
use crate::source::{EntityListing, ListingPage, RemoteSource};
use crate::state::Entity;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// A paginated source of entities
#[derive(Debug, Clone, Copy)]
pub enum WorkSource<'a> {
    Search(&'a str),
    Listing(EntityListing),
}

impl WorkSource<'_> {
    fn describe(&self, page: u32) -> String {
        match self {
            Self::Search(term) => format!("search '{}' page {}", term, page),
            Self::Listing(listing) => format!("{} page {}", listing.path(), page),
        }
    }
}

/// Fetches one page of a work source
pub async fn fetch_page(
    source: &dyn RemoteSource,
    recovery: &mut RecoveryController,
    work: WorkSource<'_>,
    page: u32,
    after: Option<&str>,
) -> RecoveryResult<ListingPage<Entity>> {
    let budget = recovery.config().discovery_rotations;
    let label = work.describe(page);

    match work {
        WorkSource::Search(term) => {
            recovery
                .run(&label, budget, move || source.search_entities(term, after))
                .await
        }
        WorkSource::Listing(listing) => {
            recovery
                .run(&label, budget, move || source.list_entities(listing, after))
                .await
        }
    }
}

/// Fetches the sidebar text of `name`
pub async fn fetch_sidebar(
    source: &dyn RemoteSource,
    recovery: &mut RecoveryController,
    name: &str,
) -> RecoveryResult<String> {
    let budget = recovery.config().discovery_rotations;
    recovery
        .run(&format!("sidebar of {}", name), budget, move || {
            source.entity_sidebar(name)
        })
        .await
}

/// Looks up a single entity by name
pub async fn lookup_entity(
    source: &dyn RemoteSource,
    recovery: &mut RecoveryController,
    name: &str,
) -> RecoveryResult<Option<Entity>> {
    let budget = recovery.config().discovery_rotations;
    recovery
        .run(&format!("about {}", name), budget, move || source.entity_about(name))
        .await
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)/r/([a-z0-9_]+)").expect("valid regex"))
}

/// Extracts the entity names referenced as `/r/<name>` in `text`
///
/// Names are lower-cased and returned once each, in order of appearance.
pub fn related_names(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    reference_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
