//! Integration tests for the remote source client
//!
//! These tests run `RedditClient` against a wiremock server and check
//! request shapes, listing parsing and failure classification.

use gleaner::config::SourceConfig;
use gleaner::source::{EntityListing, PostCategory, RedditClient, RemoteSource, SourceError};
use gleaner::state::Visibility;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_client(base_url: &str) -> RedditClient {
    let config = SourceConfig {
        base_url: base_url.to_string(),
        request_delay_ms: 0,
        timeout_secs: 5,
        user_agents: vec!["TestAgent/1.0".to_string()],
    };
    RedditClient::new(config, None).expect("client should build")
}

fn post_listing(ids: &[&str], after: Option<&str>) -> serde_json::Value {
    let children: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({"kind": "t3", "data": {
                "permalink": format!("/r/rust/comments/{}/post_{}/", id, id),
                "title": format!("Post {}", id)
            }})
        })
        .collect();
    json!({"kind": "Listing", "data": {"after": after, "children": children}})
}

#[tokio::test]
async fn test_search_parses_entity_listing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/subreddits/search.json"))
        .and(query_param("q", "rust"))
        .and(query_param("type", "sr"))
        .and(query_param("include_over_18", "on"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "Listing",
            "data": {
                "after": "t5_next",
                "children": [
                    {"kind": "t5", "data": {"display_name": "Rust", "subscribers": 300000, "over18": false, "subreddit_type": "public"}},
                    {"kind": "t5", "data": {"display_name": "RustGameDev", "subscribers": 20000, "over18": false, "subreddit_type": "restricted"}}
                ]
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let page = client.search_entities("rust", None).await.unwrap();

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].name, "rust");
    assert_eq!(page.items[0].population, 300000);
    assert_eq!(page.items[1].visibility, Visibility::Restricted);
    assert_eq!(page.after.as_deref(), Some("t5_next"));
}

#[tokio::test]
async fn test_listing_passes_cursor() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/subreddits/popular.json"))
        .and(query_param("after", "t5_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"after": null, "children": [
                {"kind": "t5", "data": {"display_name": "AskScience", "subreddit_type": "public"}}
            ]}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let page = client
        .list_entities(EntityListing::Popular, Some("t5_abc"))
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].name, "askscience");
    assert!(page.after.is_none());
}

#[tokio::test]
async fn test_fetch_posts_follows_pagination() {
    let mock_server = MockServer::start().await;

    // Mounted first so it wins over the unqualified first-page mock
    Mock::given(method("GET"))
        .and(path("/r/rust/top.json"))
        .and(query_param("after", "t3_b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(post_listing(&["b", "c"], None)))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/r/rust/top.json"))
        .and(query_param("t", "year"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(post_listing(&["a", "b"], Some("t3_b"))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let posts = client
        .fetch_posts("rust", PostCategory::Top, "year", 10)
        .await
        .unwrap();

    let permalinks: Vec<_> = posts.iter().map(|p| p.permalink.as_str()).collect();
    assert_eq!(
        permalinks,
        vec![
            "/r/rust/comments/a/post_a/",
            "/r/rust/comments/b/post_b/",
            "/r/rust/comments/c/post_c/",
        ]
    );
}

#[tokio::test]
async fn test_fetch_posts_stops_at_limit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/rust/hot.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(post_listing(&["a", "b", "c"], Some("t3_c"))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let posts = client
        .fetch_posts("rust", PostCategory::Hot, "all", 2)
        .await
        .unwrap();

    assert_eq!(posts.len(), 2);
}

#[tokio::test]
async fn test_fetch_commenters_walks_tree() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/rust/comments/abc/title.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"data": {"children": [{"kind": "t3", "data": {"author": "op"}}]}},
            {"data": {"children": [
                {"kind": "t1", "data": {"author": "alice", "replies": {"data": {"children": [
                    {"kind": "t1", "data": {"author": "bob", "replies": ""}}
                ]}}}},
                {"kind": "t1", "data": {"author": "[deleted]", "replies": ""}},
                {"kind": "t1", "data": {"author": "AutoModerator", "replies": ""}}
            ]}}
        ])))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let authors = client
        .fetch_commenters("/r/rust/comments/abc/title/")
        .await
        .unwrap();

    assert_eq!(authors, vec!["alice".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn test_entity_about_and_sidebar() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/zig/about.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "t5",
            "data": {
                "display_name": "Zig",
                "subscribers": 40000,
                "subreddit_type": "public",
                "description": "Friends: /r/rust and /r/C_Programming"
            }
        })))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());

    let entity = client.entity_about("zig").await.unwrap().unwrap();
    assert_eq!(entity.name, "zig");
    assert_eq!(entity.population, 40000);

    let sidebar = client.entity_sidebar("zig").await.unwrap();
    assert!(sidebar.contains("/r/C_Programming"));
}

#[tokio::test]
async fn test_rate_limit_uses_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/subreddits/new.json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let err = client
        .list_entities(EntityListing::New, None)
        .await
        .unwrap_err();

    assert_eq!(err, SourceError::RateLimited { retry_after_secs: 7 });
}

#[tokio::test]
async fn test_forbidden_is_blocked() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/rust/about.json"))
        .respond_with(ResponseTemplate::new(403).set_body_string("<html>blocked</html>"))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let err = client.entity_about("rust").await.unwrap_err();

    assert!(matches!(err, SourceError::Blocked(_)));
}

#[tokio::test]
async fn test_forbidden_with_reason_is_permanent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/secret/about.json"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(json!({"reason": "private", "message": "Forbidden", "error": 403})),
        )
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let err = client.entity_about("secret").await.unwrap_err();

    assert!(matches!(err, SourceError::Permanent(_)));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/rust/comments/abc/title.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let err = client
        .fetch_commenters("/r/rust/comments/abc/title/")
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Transient(_)));
}

#[tokio::test]
async fn test_not_found_and_malformed_are_permanent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/gone/about.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/r/broken/about.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());

    let err = client.entity_about("gone").await.unwrap_err();
    assert!(matches!(err, SourceError::Permanent(_)));

    let err = client.entity_about("broken").await.unwrap_err();
    assert!(matches!(err, SourceError::Permanent(_)));
}
