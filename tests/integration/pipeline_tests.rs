//! Integration tests for the crawl pipeline
//!
//! These tests drive the orchestrator end-to-end against an in-memory remote
//! source, a scripted identity rotator and a recording delivery sink, and
//! check what lands on disk.

use async_trait::async_trait;
use gleaner::config::{
    Config, CrawlerConfig, DedupConfig, DiscoveryConfig, ExportConfig, OutputConfig,
    RecoveryConfig, RotatorConfig, SourceConfig,
};
use gleaner::crawler::{Collaborators, Orchestrator};
use gleaner::export::DeliverySink;
use gleaner::rotation::{IdentityRotator, RotationOutcome, RotatorResult};
use gleaner::source::{
    EntityListing, ListingPage, Post, PostCategory, RemoteSource, SourceError, SourceResult,
};
use gleaner::state::{Entity, Phase, Visibility};
use gleaner::storage::CheckpointStore;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ===== Fakes =====

/// In-memory remote source that records which post listings were requested
#[derive(Default)]
struct FakeSource {
    search: HashMap<String, Vec<Entity>>,
    popular: Vec<Entity>,
    sidebars: HashMap<String, String>,
    abouts: HashMap<String, Entity>,
    top_posts: HashMap<String, Vec<Post>>,
    fallback_posts: HashMap<String, Vec<Post>>,
    commenters: HashMap<String, Vec<String>>,
    block_search: bool,
    blocked_post_requests: AtomicUsize,
    post_requests: Mutex<Vec<(String, PostCategory)>>,
    fingerprints: AtomicUsize,
}

impl FakeSource {
    fn harvested_entities(&self) -> Vec<String> {
        self.post_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, category)| *category == PostCategory::Top)
            .map(|(entity, _)| entity.clone())
            .collect()
    }

    fn categories_for(&self, entity: &str) -> Vec<PostCategory> {
        self.post_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == entity)
            .map(|(_, category)| *category)
            .collect()
    }
}

#[async_trait]
impl RemoteSource for FakeSource {
    async fn search_entities(
        &self,
        term: &str,
        _after: Option<&str>,
    ) -> SourceResult<ListingPage<Entity>> {
        if self.block_search {
            return Err(SourceError::Blocked("HTTP 403".to_string()));
        }
        Ok(ListingPage::last(
            self.search.get(term).cloned().unwrap_or_default(),
        ))
    }

    async fn list_entities(
        &self,
        listing: EntityListing,
        _after: Option<&str>,
    ) -> SourceResult<ListingPage<Entity>> {
        match listing {
            EntityListing::Popular => Ok(ListingPage::last(self.popular.clone())),
            EntityListing::New => Ok(ListingPage::default()),
        }
    }

    async fn entity_about(&self, name: &str) -> SourceResult<Option<Entity>> {
        Ok(self.abouts.get(name).cloned())
    }

    async fn entity_sidebar(&self, name: &str) -> SourceResult<String> {
        Ok(self.sidebars.get(name).cloned().unwrap_or_default())
    }

    async fn fetch_posts(
        &self,
        entity: &str,
        category: PostCategory,
        _time_filter: &str,
        limit: usize,
    ) -> SourceResult<Vec<Post>> {
        let blocked = self
            .blocked_post_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if blocked {
            return Err(SourceError::Blocked("HTTP 403".to_string()));
        }

        self.post_requests
            .lock()
            .unwrap()
            .push((entity.to_string(), category));

        let posts = match category {
            PostCategory::Top => self.top_posts.get(entity),
            _ => self.fallback_posts.get(entity),
        };
        Ok(posts
            .map(|p| p.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_commenters(&self, permalink: &str) -> SourceResult<Vec<String>> {
        Ok(self.commenters.get(permalink).cloned().unwrap_or_default())
    }

    fn rotate_fingerprint(&self) {
        self.fingerprints.fetch_add(1, Ordering::SeqCst);
    }
}

/// Rotator that either always gets a new address or never does
struct FakeRotator {
    changes: bool,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl IdentityRotator for FakeRotator {
    async fn verify(&mut self) -> RotatorResult<String> {
        Ok("10.0.0.1".to_string())
    }

    fn current_address(&self) -> Option<&str> {
        Some("10.0.0.1")
    }

    async fn rotate(&mut self, _cancel: &CancellationToken) -> RotatorResult<RotationOutcome> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let address = if self.changes {
            format!("10.0.1.{}", n)
        } else {
            "10.0.0.1".to_string()
        };
        Ok(RotationOutcome {
            changed: self.changes,
            address,
        })
    }
}

/// Sink that accepts every file and remembers it
struct RecordingSink {
    uploaded: Arc<Mutex<Vec<PathBuf>>>,
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn upload_files(&self, paths: &[PathBuf]) -> usize {
        self.uploaded.lock().unwrap().extend(paths.iter().cloned());
        paths.len()
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

// ===== Helpers =====

/// Creates a test configuration writing into `data_dir`
fn create_test_config(data_dir: &Path, search_terms: Vec<String>) -> Config {
    Config {
        crawler: CrawlerConfig {
            batch_size: 2,
            posts_per_entity: 2,
            time_filters: vec!["all".to_string()],
            search_terms,
            search_pages: 2,
            listing_pages: 2,
            related_limit: 10,
            rotate_after_posts: 0,
        },
        discovery: DiscoveryConfig::default(),
        dedup: DedupConfig { persist_interval: 1 },
        export: ExportConfig {
            chunk_size: 3,
            threshold: 3,
        },
        recovery: RecoveryConfig {
            max_failed_rotations: 3,
            backoff_min_ms: 1,
            backoff_max_ms: 2,
            ..Default::default()
        },
        source: SourceConfig::default(),
        rotator: RotatorConfig {
            proxy_url: "http://127.0.0.1:9".to_string(),
            ip_check_url: "http://127.0.0.1:9/ip".to_string(),
            restart_command: vec![],
            cooldown_secs: 0,
            health_timeout_secs: 0,
        },
        output: OutputConfig {
            data_dir: data_dir.to_string_lossy().into_owned(),
            summary_path: data_dir.join("summary.md").to_string_lossy().into_owned(),
        },
        delivery: None,
    }
}

fn entity(name: &str) -> Entity {
    Entity::new(name, 1000, false, Visibility::Public)
}

fn post(entity: &str, id: &str) -> Post {
    Post {
        permalink: format!("/r/{}/comments/{}/post/", entity, id),
        title: None,
    }
}

/// Gives `name` the posts `ids`, each with the listed commenters
fn add_entity_posts(source: &mut FakeSource, name: &str, posts: &[(&str, &[&str])]) {
    let mut listed = Vec::new();
    for (id, authors) in posts {
        let post = post(name, id);
        source.commenters.insert(
            post.permalink.clone(),
            authors.iter().map(|a| a.to_string()).collect(),
        );
        listed.push(post);
    }
    source.top_posts.insert(name.to_string(), listed);
}

struct Harness {
    source: Arc<FakeSource>,
    rotations: Arc<AtomicUsize>,
    uploaded: Arc<Mutex<Vec<PathBuf>>>,
    orchestrator: Orchestrator,
}

fn create_harness(config: Config, source: FakeSource, rotator_changes: bool) -> Harness {
    create_harness_with_token(config, source, rotator_changes, CancellationToken::new())
}

fn create_harness_with_token(
    config: Config,
    source: FakeSource,
    rotator_changes: bool,
    cancel: CancellationToken,
) -> Harness {
    let source = Arc::new(source);
    let rotations = Arc::new(AtomicUsize::new(0));
    let uploaded = Arc::new(Mutex::new(Vec::new()));

    let parts = Collaborators {
        source: source.clone(),
        rotator: Box::new(FakeRotator {
            changes: rotator_changes,
            calls: Arc::clone(&rotations),
        }),
        sink: Box::new(RecordingSink {
            uploaded: Arc::clone(&uploaded),
        }),
    };

    Harness {
        source,
        rotations,
        uploaded,
        orchestrator: Orchestrator::new(config, "test-hash".to_string(), parts, cancel),
    }
}

/// Reads every exported chunk, in ordinal order
fn read_chunks(data_dir: &Path) -> Vec<Vec<String>> {
    let export_dir = data_dir.join("exports");
    let Ok(entries) = std::fs::read_dir(&export_dir) else {
        return Vec::new();
    };

    let mut paths: Vec<PathBuf> = entries
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|p| {
            let doc: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(p).unwrap()).unwrap();
            let users: Vec<String> = doc["users"]
                .as_array()
                .unwrap()
                .iter()
                .map(|u| u.as_str().unwrap().to_string())
                .collect();
            assert_eq!(doc["count"].as_u64().unwrap() as usize, users.len());
            users
        })
        .collect()
}

fn write_state(data_dir: &Path, file: &str, value: serde_json::Value) {
    std::fs::write(data_dir.join(file), value.to_string()).unwrap();
}

// ===== Tests =====

#[tokio::test]
async fn test_full_run_exports_each_identity_once() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec!["rust".to_string()]);

    let mut source = FakeSource::default();
    source.search.insert(
        "rust".to_string(),
        vec![
            entity("rust"),
            entity("cpp"),
            Entity::new("secret", 10, false, Visibility::Private),
        ],
    );
    source
        .sidebars
        .insert("rust".to_string(), "Related: /r/Zig and /r/cpp".to_string());
    source.abouts.insert("zig".to_string(), entity("zig"));
    add_entity_posts(&mut source, "rust", &[("p1", &["Alice", "bob"]), ("p2", &["ALICE", "carol"])]);
    add_entity_posts(&mut source, "cpp", &[("p3", &["bob", "dave"]), ("p4", &["erin"])]);
    add_entity_posts(&mut source, "zig", &[("p5", &["frank"]), ("p6", &["alice", "gina"])]);

    let mut harness = create_harness(config, source, true);
    let stats = harness.orchestrator.run().await;

    assert!(stats.completed);
    assert!(!stats.cancelled);
    assert_eq!(stats.entities_processed, 3);
    assert_eq!(stats.phases[&Phase::Search].discovered, 2);
    assert_eq!(stats.phases[&Phase::Related].discovered, 1);
    assert_eq!(stats.identities_accepted, 7);
    assert_eq!(stats.duplicates_filtered, 3);

    let mut harvested = harness.source.harvested_entities();
    harvested.sort();
    assert_eq!(harvested, vec!["cpp", "rust", "zig"]);

    // Every identity lands in exactly one chunk, first casing wins
    let chunks = read_chunks(dir.path());
    let all: Vec<String> = chunks.iter().flatten().cloned().collect();
    let lowered: HashSet<String> = all.iter().map(|u| u.to_lowercase()).collect();
    assert_eq!(all.len(), 7);
    assert_eq!(lowered.len(), 7);
    assert!(all.contains(&"Alice".to_string()));
    assert!(!all.contains(&"ALICE".to_string()));
    assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= 3));
    assert_eq!(chunks.len() as u64, stats.chunks_written);

    // Both files of every chunk were delivered
    assert_eq!(harness.uploaded.lock().unwrap().len(), chunks.len() * 2);
    assert_eq!(stats.files_uploaded, chunks.len() as u64 * 2);

    // A finished run leaves no checkpoint behind
    assert!(!CheckpointStore::new(dir.path()).exists());
    assert!(harness.orchestrator.dedup().is_processed("zig"));
    assert!(!harness.orchestrator.dedup().is_processed("secret"));
}

#[tokio::test]
async fn test_forced_flush_writes_remainder_in_ceil_chunks() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path(), vec!["rust".to_string()]);
    config.export.threshold = 100;

    let mut source = FakeSource::default();
    source
        .search
        .insert("rust".to_string(), vec![entity("rust")]);
    add_entity_posts(
        &mut source,
        "rust",
        &[("p1", &["a1", "a2", "a3", "a4"]), ("p2", &["a5", "a6", "a7"])],
    );

    let mut harness = create_harness(config, source, true);
    let stats = harness.orchestrator.run().await;

    // 7 identities below the threshold are only written by the final flush
    let chunks = read_chunks(dir.path());
    assert_eq!(chunks.len(), 3);
    assert_eq!(stats.chunks_written, 3);
    assert_eq!(
        chunks.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![3, 3, 1]
    );
    assert_eq!(harness.orchestrator.batcher().pending_len(), 0);
    assert_eq!(harness.orchestrator.batcher().state().total_exported, 7);
}

#[tokio::test]
async fn test_resume_harvests_only_unprocessed_queue() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec!["rust".to_string()]);

    write_state(
        dir.path(),
        "dedup_entities.json",
        json!({"discovered": ["a", "b", "c"], "processed": ["b"]}),
    );
    write_state(
        dir.path(),
        "checkpoint.json",
        json!({"phase": "export", "queue": ["a", "b", "c"], "completedTerms": ["rust"]}),
    );

    let mut source = FakeSource::default();
    for name in ["a", "b", "c"] {
        add_entity_posts(&mut source, name, &[("p1", &["someone"])]);
    }
    source
        .search
        .insert("rust".to_string(), vec![entity("new-entity")]);

    let mut harness = create_harness(config, source, true);
    let stats = harness.orchestrator.run().await;

    assert!(stats.completed);
    assert_eq!(harness.source.harvested_entities(), vec!["a", "c"]);
    assert_eq!(stats.entities_processed, 2);

    // Discovery phases before the checkpoint were skipped
    assert!(!harness.orchestrator.dedup().is_discovered("new-entity"));
    for name in ["a", "b", "c"] {
        assert!(harness.orchestrator.dedup().is_processed(name));
    }
}

#[tokio::test]
async fn test_queued_entity_is_not_rediscovered_after_restart() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec![]);

    // Crash after "foo" was queued and marked discovered, before harvesting
    write_state(
        dir.path(),
        "dedup_entities.json",
        json!({"discovered": ["foo"], "processed": []}),
    );
    write_state(
        dir.path(),
        "checkpoint.json",
        json!({"phase": "popular", "queue": ["foo"]}),
    );

    let mut source = FakeSource::default();
    source.popular = vec![entity("foo"), entity("bar")];
    add_entity_posts(&mut source, "foo", &[("p1", &["x"])]);
    add_entity_posts(&mut source, "bar", &[("p2", &["y"])]);

    let mut harness = create_harness(config, source, true);
    let stats = harness.orchestrator.run().await;

    assert!(stats.completed);
    let mut harvested = harness.source.harvested_entities();
    harvested.sort();
    assert_eq!(harvested, vec!["bar", "foo"]);
    assert_eq!(stats.phases[&Phase::Popular].discovered, 1);
    assert!(!harness.orchestrator.dedup().should_process("foo"));
}

#[tokio::test]
async fn test_unchanging_address_aborts_phase_and_keeps_checkpoint() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec!["rust".to_string()]);

    let mut source = FakeSource::default();
    source.block_search = true;
    source.popular = vec![entity("askscience")];
    add_entity_posts(&mut source, "askscience", &[("p1", &["curie"])]);

    let mut harness = create_harness(config, source, false);
    let stats = harness.orchestrator.run().await;

    // Three rotations in a row without a new address end the phase
    assert_eq!(harness.rotations.load(Ordering::SeqCst), 3);
    assert_eq!(stats.recovery.failed_rotations, 3);
    assert_eq!(stats.recovery.rotations, 0);
    assert!(stats.phases[&Phase::Search].aborted);
    assert!(!stats.completed);
    assert_eq!(stats.status(), "incomplete");

    // Later phases still ran
    assert_eq!(harness.source.harvested_entities(), vec!["askscience"]);

    // The checkpoint stays at the aborted phase so the next run retries it
    let checkpoint = CheckpointStore::new(dir.path()).load().unwrap().unwrap();
    assert_eq!(checkpoint.phase, Phase::Search);
    assert!(!checkpoint.is_term_completed("rust"));
}

#[tokio::test]
async fn test_blocked_listing_recovers_after_rotation() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec!["rust".to_string()]);

    let mut source = FakeSource::default();
    source
        .search
        .insert("rust".to_string(), vec![entity("rust")]);
    add_entity_posts(&mut source, "rust", &[("p1", &["ferris"]), ("p2", &["crab"])]);
    source.blocked_post_requests = AtomicUsize::new(2);

    let mut harness = create_harness(config, source, true);
    let stats = harness.orchestrator.run().await;

    assert!(stats.completed);
    assert_eq!(stats.recovery.rotations, 2);
    assert_eq!(harness.source.fingerprints.load(Ordering::SeqCst), 2);
    assert_eq!(stats.identities_accepted, 2);
    assert_eq!(stats.entities_failed, 0);
}

#[tokio::test]
async fn test_short_listing_widens_to_hot_and_new() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path(), vec!["rust".to_string()]);
    config.crawler.posts_per_entity = 4;

    let mut source = FakeSource::default();
    source
        .search
        .insert("rust".to_string(), vec![entity("rust")]);
    add_entity_posts(&mut source, "rust", &[("p1", &["ferris"])]);
    let extra = post("rust", "p9");
    source
        .commenters
        .insert(extra.permalink.clone(), vec!["hotshot".to_string()]);
    source.fallback_posts.insert("rust".to_string(), vec![extra]);

    let mut harness = create_harness(config, source, true);
    let stats = harness.orchestrator.run().await;

    assert_eq!(
        harness.source.categories_for("rust"),
        vec![PostCategory::Top, PostCategory::Hot, PostCategory::New]
    );
    // The same fallback post from hot and new is harvested once
    assert_eq!(stats.identities_accepted, 2);
}

#[tokio::test]
async fn test_cancelled_run_saves_checkpoint() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec!["rust".to_string()]);

    let mut source = FakeSource::default();
    source
        .search
        .insert("rust".to_string(), vec![entity("rust")]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut harness = create_harness_with_token(config, source, true, cancel);
    let stats = harness.orchestrator.run().await;

    assert!(stats.cancelled);
    assert!(!stats.completed);
    assert_eq!(stats.status(), "interrupted");
    assert!(harness.source.harvested_entities().is_empty());

    let checkpoint = CheckpointStore::new(dir.path()).load().unwrap().unwrap();
    assert_eq!(checkpoint.phase, Phase::Search);
    assert_eq!(checkpoint.config_hash.as_deref(), Some("test-hash"));
}

#[tokio::test]
async fn test_pending_identities_survive_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path(), vec![]);
    config.export.threshold = 100;

    // Buffered by an earlier run that died before exporting
    write_state(
        dir.path(),
        "exporter_state.json",
        json!({"chunkCount": 0, "totalExported": 0, "totalUploaded": 0, "pendingUsers": ["Zed"]}),
    );

    let mut source = FakeSource::default();
    source.popular = vec![entity("music")];
    add_entity_posts(&mut source, "music", &[("p1", &["zed", "amy"])]);

    let mut harness = create_harness(config, source, true);
    let stats = harness.orchestrator.run().await;

    // "zed" was already admitted through the restored buffer
    assert_eq!(stats.identities_accepted, 1);
    assert_eq!(stats.duplicates_filtered, 1);

    let all: Vec<String> = read_chunks(dir.path()).into_iter().flatten().collect();
    assert_eq!(all, vec!["Zed".to_string(), "amy".to_string()]);
}

#[tokio::test]
async fn test_each_batch_is_flushed_to_its_own_chunk() {
    let dir = TempDir::new().unwrap();
    let mut config =
        create_test_config(dir.path(), vec!["t1".to_string(), "t2".to_string()]);
    config.crawler.batch_size = 1;
    config.export.threshold = 100;

    let mut source = FakeSource::default();
    source.search.insert("t1".to_string(), vec![entity("aaa")]);
    source.search.insert("t2".to_string(), vec![entity("bbb")]);
    add_entity_posts(&mut source, "aaa", &[("p1", &["a1", "a2"])]);
    add_entity_posts(&mut source, "bbb", &[("p2", &["b1"])]);

    let mut harness = create_harness(config, source, true);
    let stats = harness.orchestrator.run().await;

    // Below the threshold, the end of each batch still forces a chunk
    assert!(stats.completed);
    assert_eq!(stats.batches, 2);
    assert_eq!(
        read_chunks(dir.path()),
        vec![
            vec!["a1".to_string(), "a2".to_string()],
            vec!["b1".to_string()]
        ]
    );
    assert_eq!(stats.chunks_written, 2);
}

#[tokio::test]
async fn test_full_batch_is_harvested_before_admitting_more() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec!["big".to_string()]);

    let names = ["e1", "e2", "e3", "e4", "e5"];
    let mut source = FakeSource::default();
    source
        .search
        .insert("big".to_string(), names.iter().map(|n| entity(n)).collect());
    for (i, name) in names.iter().enumerate() {
        let post_id = format!("p{}", i);
        let author = format!("user{}", i);
        add_entity_posts(&mut source, name, &[(post_id.as_str(), &[author.as_str()])]);
    }

    let mut harness = create_harness(config, source, true);
    let stats = harness.orchestrator.run().await;

    // Batches of 2, 2 and the remainder of 1 in the export phase
    assert!(stats.completed);
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.entities_processed, 5);
    assert_eq!(harness.source.harvested_entities(), names.to_vec());
}

#[tokio::test]
async fn test_entity_metadata_is_exported_by_subscribers() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec!["mix".to_string()]);

    let mut source = FakeSource::default();
    source.search.insert(
        "mix".to_string(),
        vec![
            Entity::new("small", 10, false, Visibility::Public),
            Entity::new("huge", 5000, true, Visibility::Public),
            Entity::new("hidden", 9000, false, Visibility::Private),
            Entity::new("medium", 700, false, Visibility::Restricted),
        ],
    );

    let mut harness = create_harness(config, source, true);
    let stats = harness.orchestrator.run().await;

    assert!(stats.completed);
    assert_eq!(stats.entities_exported, 3);

    let doc: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("subreddits.json")).unwrap(),
    )
    .unwrap();
    let names: Vec<&str> = doc
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["subreddit_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["huge", "medium", "small"]);
    assert_eq!(doc[0]["over18"], true);
    assert_eq!(doc[0]["subscribers"], 5000);

    let csv = std::fs::read_to_string(dir.path().join("subreddits.csv")).unwrap();
    assert_eq!(
        csv,
        "subreddit_name,subscribers,over18\nhuge,5000,true\nmedium,700,false\nsmall,10,false\n"
    );
}
