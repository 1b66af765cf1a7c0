//! Remote source trait

use crate::source::{EntityListing, ListingPage, Post, PostCategory, SourceResult};
use crate::state::Entity;
use async_trait::async_trait;

/// Contract the crawler needs from the remote listing service
///
/// Every method is one request-level operation that the recovery controller
/// may retry from scratch, so implementations must not keep partial state
/// between calls.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Searches entities by keyword
    async fn search_entities(
        &self,
        term: &str,
        after: Option<&str>,
    ) -> SourceResult<ListingPage<Entity>>;

    /// Pages through an unqueried entity listing
    async fn list_entities(
        &self,
        listing: EntityListing,
        after: Option<&str>,
    ) -> SourceResult<ListingPage<Entity>>;

    /// Looks up a single entity by name
    async fn entity_about(&self, name: &str) -> SourceResult<Option<Entity>>;

    /// Returns the entity's sidebar/description text
    async fn entity_sidebar(&self, name: &str) -> SourceResult<String>;

    /// Fetches up to `limit` posts of an entity
    async fn fetch_posts(
        &self,
        entity: &str,
        category: PostCategory,
        time_filter: &str,
        limit: usize,
    ) -> SourceResult<Vec<Post>>;

    /// Returns the author names found in a post's comment tree
    async fn fetch_commenters(&self, permalink: &str) -> SourceResult<Vec<String>>;

    /// Regenerates the client-presented identity (user agent, connection pool)
    fn rotate_fingerprint(&self);
}
