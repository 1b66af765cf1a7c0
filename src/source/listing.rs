//! Parsing of listing documents returned by the JSON endpoints
//!
//! Parsing is deliberately tolerant: unexpected shapes yield empty results
//! instead of errors, and only a body that is not JSON at all is treated as
//! a malformed response by the client.

use crate::source::{ListingPage, Post};
use crate::state::{Entity, Visibility};
use serde_json::Value;
use std::collections::HashSet;

/// Authors that never count as harvested identities
pub const SKIPPED_AUTHORS: &[&str] = &["[deleted]", "AutoModerator"];

/// Parses the `data` object of an entity (`t5`) thing
pub fn parse_entity(data: &Value) -> Option<Entity> {
    let name = data.get("display_name")?.as_str()?;
    if name.trim().is_empty() {
        return None;
    }

    let population = data.get("subscribers").and_then(Value::as_u64).unwrap_or(0);
    let adult = data.get("over18").and_then(Value::as_bool).unwrap_or(false);
    let visibility = data
        .get("subreddit_type")
        .and_then(Value::as_str)
        .map(Visibility::from_source_kind)
        .unwrap_or(Visibility::Private);

    Some(Entity::new(name, population, adult, visibility))
}

/// Parses a single `about` document
pub fn parse_about(doc: &Value) -> Option<Entity> {
    parse_entity(doc.get("data")?)
}

fn listing_children(doc: &Value) -> impl Iterator<Item = &Value> {
    doc.pointer("/data/children")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn listing_after(doc: &Value) -> Option<String> {
    doc.pointer("/data/after")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parses an entity listing page
pub fn parse_entity_listing(doc: &Value) -> ListingPage<Entity> {
    let items = listing_children(doc)
        .filter_map(|child| child.get("data"))
        .filter_map(parse_entity)
        .collect();

    ListingPage {
        items,
        after: listing_after(doc),
    }
}

/// Parses a post listing page
pub fn parse_post_listing(doc: &Value) -> ListingPage<Post> {
    let items = listing_children(doc)
        .filter_map(|child| child.get("data"))
        .filter_map(|data| {
            let permalink = post_permalink(data)?;
            Some(Post {
                permalink,
                title: data.get("title").and_then(Value::as_str).map(str::to_string),
            })
        })
        .collect();

    ListingPage {
        items,
        after: listing_after(doc),
    }
}

/// Picks the site-relative permalink of a post, falling back to its URL
fn post_permalink(data: &Value) -> Option<String> {
    if let Some(permalink) = data.get("permalink").and_then(Value::as_str) {
        if !permalink.is_empty() {
            return Some(permalink.to_string());
        }
    }

    let url = data.get("url").and_then(Value::as_str)?;
    let (_, path) = url.split_once("reddit.com")?;
    Some(path.to_string())
}

/// Returns the sidebar text of an `about` document
pub fn extract_sidebar(doc: &Value) -> String {
    doc.pointer("/data/description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Collects comment authors from a post details document
///
/// The document is an array of two listings: the post itself and its comment
/// tree. Replies are walked recursively; `more` stubs are ignored. Authors
/// are returned in first-seen order without exact duplicates.
pub fn extract_commenters(doc: &Value) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut authors = Vec::new();

    if let Some(comments) = doc.as_array().and_then(|parts| parts.get(1)) {
        walk_comments(comments, &mut seen, &mut authors);
    }

    authors
}

fn walk_comments(listing: &Value, seen: &mut HashSet<String>, authors: &mut Vec<String>) {
    for child in listing_children(listing) {
        if child.get("kind").and_then(Value::as_str) == Some("more") {
            continue;
        }

        let Some(data) = child.get("data") else {
            continue;
        };

        if let Some(author) = data.get("author").and_then(Value::as_str) {
            if !author.is_empty()
                && !SKIPPED_AUTHORS.contains(&author)
                && seen.insert(author.to_string())
            {
                authors.push(author.to_string());
            }
        }

        // `replies` is an empty string when there are none
        if let Some(replies) = data.get("replies").filter(|r| r.is_object()) {
            walk_comments(replies, seen, authors);
        }
    }
}
