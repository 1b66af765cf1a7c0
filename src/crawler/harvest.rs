//! Per-entity identity harvesting
//!
//! For every configured time filter the harvester reads the entity's `top`
//! posts, widens to `hot` and then `new` when the primary listing comes back
//! short, and collects the comment authors of every post. Which listing a
//! post came from is not recorded.

use crate::config::CrawlerConfig;
use crate::recovery::{RecoveryController, RecoveryError, RecoveryResult};
use crate::source::{Post, PostCategory, RemoteSource};
use std::collections::HashSet;

/// Fallback widening kicks in below this share of the requested posts
const HOT_FALLBACK_RATIO: f64 = 0.5;
const NEW_FALLBACK_RATIO: f64 = 0.75;

/// What one entity's harvest produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Harvest {
    /// Comment authors in first-seen order, exact duplicates removed
    pub identities: Vec<String>,
    pub posts_seen: usize,
    pub posts_failed: usize,
    pub filters_failed: usize,
    pub filters_total: usize,
}

impl Harvest {
    /// True if not a single time filter produced a post listing
    pub fn is_failed(&self) -> bool {
        self.filters_total > 0 && self.filters_failed == self.filters_total
    }
}

/// Harvests the comment authors of one entity
///
/// Failed posts and failed time filters are skipped. Only errors that end
/// the whole phase (rotation exhausted, cancellation) are returned.
/// `posts_since_rotation` carries the proactive rotation counter across
/// entities.
pub async fn harvest_entity(
    source: &dyn RemoteSource,
    recovery: &mut RecoveryController,
    config: &CrawlerConfig,
    entity: &str,
    posts_since_rotation: &mut usize,
) -> RecoveryResult<Harvest> {
    let mut harvest = Harvest {
        filters_total: config.time_filters.len(),
        ..Default::default()
    };
    let mut seen_posts: HashSet<String> = HashSet::new();
    let mut seen_authors: HashSet<String> = HashSet::new();

    for time_filter in &config.time_filters {
        if recovery.is_cancelled() {
            return Err(RecoveryError::Cancelled);
        }

        let posts = match gather_posts(source, recovery, config, entity, time_filter).await {
            Ok(posts) => posts,
            Err(e) if e.is_fatal_for_phase() => return Err(e),
            Err(e) => {
                tracing::warn!("{}: skipping time filter '{}': {}", entity, time_filter, e);
                harvest.filters_failed += 1;
                continue;
            }
        };

        let fresh: Vec<Post> = posts
            .into_iter()
            .filter(|post| seen_posts.insert(post.permalink.clone()))
            .collect();
        tracing::debug!(
            "{}: {} new posts for time filter '{}'",
            entity,
            fresh.len(),
            time_filter
        );

        for post in fresh {
            if recovery.is_cancelled() {
                return Err(RecoveryError::Cancelled);
            }

            if config.rotate_after_posts > 0 && *posts_since_rotation >= config.rotate_after_posts {
                recovery
                    .rotate_now(&format!("{} posts since last rotation", posts_since_rotation))
                    .await?;
                *posts_since_rotation = 0;
            }

            let budget = recovery.config().item_rotations;
            let permalink = post.permalink.as_str();
            let result = recovery
                .run(&format!("comments of {}", permalink), budget, move || {
                    source.fetch_commenters(permalink)
                })
                .await;

            *posts_since_rotation += 1;
            harvest.posts_seen += 1;

            match result {
                Ok(authors) => {
                    for author in authors {
                        if seen_authors.insert(author.clone()) {
                            harvest.identities.push(author);
                        }
                    }
                }
                Err(e) if e.is_fatal_for_phase() => return Err(e),
                Err(e) => {
                    tracing::debug!("{}: skipping post {}: {}", entity, permalink, e);
                    harvest.posts_failed += 1;
                }
            }
        }
    }

    Ok(harvest)
}

/// Fetches the primary listing for one time filter, widening when short
///
/// Fallback failures are logged and ignored; only a failed primary listing
/// fails the time filter.
async fn gather_posts(
    source: &dyn RemoteSource,
    recovery: &mut RecoveryController,
    config: &CrawlerConfig,
    entity: &str,
    time_filter: &str,
) -> RecoveryResult<Vec<Post>> {
    let limit = config.posts_per_entity;
    let budget = recovery.config().listing_rotations;

    let mut posts = recovery
        .run(
            &format!("{} top/{}", entity, time_filter),
            budget,
            move || source.fetch_posts(entity, PostCategory::Top, time_filter, limit),
        )
        .await?;

    for (category, ratio) in [
        (PostCategory::Hot, HOT_FALLBACK_RATIO),
        (PostCategory::New, NEW_FALLBACK_RATIO),
    ] {
        if (posts.len() as f64) >= limit as f64 * ratio {
            break;
        }

        let fallback_limit = (limit / 2).max(1);
        let budget = recovery.config().fallback_rotations;
        tracing::debug!(
            "{}: only {} of {} posts, widening to {}",
            entity,
            posts.len(),
            limit,
            category
        );

        match recovery
            .run(&format!("{} {}", entity, category), budget, move || {
                source.fetch_posts(entity, category, time_filter, fallback_limit)
            })
            .await
        {
            Ok(mut more) => posts.append(&mut more),
            Err(e) if e.is_fatal_for_phase() => return Err(e),
            Err(e) => tracing::debug!("{}: {} fallback failed: {}", entity, category, e),
        }
    }

    Ok(posts)
}
