//! HTTP client for the public JSON endpoints
//!
//! This module handles every request the crawler makes to the remote source:
//! - Building HTTP clients routed through the rotating proxy
//! - Pacing requests with a randomized minimum delay
//! - Classifying responses into the `SourceError` taxonomy
//! - Regenerating the session (user agent, connection pool) on rotation

use crate::config::SourceConfig;
use crate::source::listing::{
    extract_commenters, extract_sidebar, parse_about, parse_entity_listing, parse_post_listing,
};
use crate::source::{
    EntityListing, ListingPage, Post, PostCategory, RemoteSource, SourceError, SourceResult,
};
use crate::state::Entity;
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER};
use reqwest::{Client, Proxy, StatusCode};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Largest page size the listing endpoints honor
const PAGE_LIMIT: usize = 100;

/// Builds an HTTP client for the remote source
///
/// # Arguments
///
/// * `config` - The source configuration (timeouts)
/// * `proxy_url` - Proxy all traffic is routed through, if any
/// * `user_agent` - User agent presented for this session
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client (e.g. invalid proxy URL)
pub fn build_http_client(
    config: &SourceConfig,
    proxy_url: Option<&str>,
    user_agent: &str,
) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json,text/html;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy_url {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

/// One client session; replaced wholesale on rotation
struct Session {
    client: Client,
    user_agent: String,
}

/// Client for the public JSON listing endpoints
pub struct RedditClient {
    config: SourceConfig,
    base_url: Url,
    proxy_url: Option<String>,
    session: Mutex<Session>,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl RedditClient {
    /// Creates a client routed through `proxy_url` (if given)
    pub fn new(config: SourceConfig, proxy_url: Option<String>) -> SourceResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SourceError::Permanent(format!("invalid base url: {}", e)))?;
        let session = Self::new_session(&config, proxy_url.as_deref(), None)?;

        if let Some(proxy) = &proxy_url {
            tracing::info!("Remote source client routed through proxy {}", proxy);
        }

        Ok(Self {
            config,
            base_url,
            proxy_url,
            session: Mutex::new(session),
            last_request: tokio::sync::Mutex::new(None),
        })
    }

    /// Builds a session with a user agent different from `previous` when possible
    fn new_session(
        config: &SourceConfig,
        proxy_url: Option<&str>,
        previous: Option<&str>,
    ) -> SourceResult<Session> {
        let candidates: Vec<&String> = config
            .user_agents
            .iter()
            .filter(|ua| Some(ua.as_str()) != previous)
            .collect();
        let pool: Vec<&String> = if candidates.is_empty() {
            config.user_agents.iter().collect()
        } else {
            candidates
        };

        let user_agent = match pool.len() {
            0 => format!("gleaner/{}", env!("CARGO_PKG_VERSION")),
            n => pool[rand::rng().random_range(0..n)].clone(),
        };

        let client = build_http_client(config, proxy_url, &user_agent)
            .map_err(|e| SourceError::Permanent(format!("failed to build client: {}", e)))?;

        Ok(Session { client, user_agent })
    }

    fn current_client(&self) -> Client {
        match self.session.lock() {
            Ok(session) => session.client.clone(),
            Err(poisoned) => poisoned.into_inner().client.clone(),
        }
    }

    /// Returns the user agent of the current session
    pub fn user_agent(&self) -> String {
        match self.session.lock() {
            Ok(session) => session.user_agent.clone(),
            Err(poisoned) => poisoned.into_inner().user_agent.clone(),
        }
    }

    /// Waits until the configured delay (plus jitter) has passed since the last request
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if self.config.request_delay_ms > 0 {
            let jitter = rand::rng().random_range(500..2000);
            let delay = Duration::from_millis(self.config.request_delay_ms + jitter);
            if let Some(previous) = *last {
                let ready_at = previous + delay;
                if ready_at > Instant::now() {
                    tokio::time::sleep_until(ready_at).await;
                }
            }
        }
        *last = Some(Instant::now());
    }

    fn endpoint(&self, path: &str) -> SourceResult<Url> {
        let path = format!("{}.json", path.trim_end_matches('/'));
        self.base_url
            .join(&path)
            .map_err(|e| SourceError::Permanent(format!("invalid path {}: {}", path, e)))
    }

    /// Fetches a JSON document and classifies any failure
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> SourceResult<Value> {
        self.pace().await;

        let url = self.endpoint(path)?;
        tracing::debug!("GET {}", url);

        let response = self
            .current_client()
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, retry_after, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::from_reqwest(&e))?;
        serde_json::from_str(&body)
            .map_err(|e| SourceError::Permanent(format!("malformed response: {}", e)))
    }
}

/// Maps a failed response to the taxonomy
///
/// A 403 that names an access reason (private, banned, quarantined entity)
/// is about the entity, not the caller, so it is permanent rather than a
/// block.
fn classify_failure(status: StatusCode, retry_after: Option<u64>, body: &str) -> SourceError {
    if status == StatusCode::FORBIDDEN {
        if let Ok(doc) = serde_json::from_str::<Value>(body) {
            if let Some(reason) = doc.get("reason").and_then(Value::as_str) {
                return SourceError::Permanent(format!("access denied: {}", reason));
            }
        }
    }
    SourceError::from_status(status.as_u16(), retry_after)
}

#[async_trait]
impl RemoteSource for RedditClient {
    async fn search_entities(
        &self,
        term: &str,
        after: Option<&str>,
    ) -> SourceResult<ListingPage<Entity>> {
        let mut query = vec![
            ("q", term.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
            ("include_over_18", "on".to_string()),
            ("type", "sr".to_string()),
            ("sort", "relevance".to_string()),
        ];
        if let Some(cursor) = after {
            query.push(("after", cursor.to_string()));
        }

        let doc = self.get_json("/subreddits/search", &query).await?;
        Ok(parse_entity_listing(&doc))
    }

    async fn list_entities(
        &self,
        listing: EntityListing,
        after: Option<&str>,
    ) -> SourceResult<ListingPage<Entity>> {
        let mut query = vec![("limit", PAGE_LIMIT.to_string())];
        if let Some(cursor) = after {
            query.push(("after", cursor.to_string()));
        }

        let doc = self.get_json(listing.path(), &query).await?;
        Ok(parse_entity_listing(&doc))
    }

    async fn entity_about(&self, name: &str) -> SourceResult<Option<Entity>> {
        let doc = self.get_json(&format!("/r/{}/about", name), &[]).await?;
        Ok(parse_about(&doc))
    }

    async fn entity_sidebar(&self, name: &str) -> SourceResult<String> {
        let doc = self.get_json(&format!("/r/{}/about", name), &[]).await?;
        Ok(extract_sidebar(&doc))
    }

    async fn fetch_posts(
        &self,
        entity: &str,
        category: PostCategory,
        time_filter: &str,
        limit: usize,
    ) -> SourceResult<Vec<Post>> {
        let path = format!("/r/{}/{}", entity, category.as_str());
        let mut posts: Vec<Post> = Vec::new();
        let mut seen = HashSet::new();
        let mut after: Option<String> = None;

        while posts.len() < limit {
            let mut query = vec![("limit", PAGE_LIMIT.min(limit - posts.len()).to_string())];
            if category == PostCategory::Top {
                query.push(("t", time_filter.to_string()));
            }
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let page = parse_post_listing(&self.get_json(&path, &query).await?);
            if page.items.is_empty() {
                break;
            }
            for post in page.items {
                if posts.len() < limit && seen.insert(post.permalink.clone()) {
                    posts.push(post);
                }
            }

            match page.after {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        Ok(posts)
    }

    async fn fetch_commenters(&self, permalink: &str) -> SourceResult<Vec<String>> {
        let doc = self.get_json(permalink, &[]).await?;
        Ok(extract_commenters(&doc))
    }

    fn rotate_fingerprint(&self) {
        let mut session = match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match Self::new_session(
            &self.config,
            self.proxy_url.as_deref(),
            Some(&session.user_agent),
        ) {
            Ok(fresh) => {
                *session = fresh;
                tracing::debug!("Rotated client fingerprint");
            }
            Err(e) => tracing::warn!("Failed to rotate client fingerprint: {}", e),
        }
    }
}
