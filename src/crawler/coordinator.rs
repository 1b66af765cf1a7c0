//! Crawl orchestrator - the phase state machine
//!
//! This module ties the crawl together:
//! - Restoring the checkpoint and dedup state on startup
//! - Running the discovery phases in order, skipping those a resumed run
//!   already finished
//! - Batching discovered entities and harvesting them through the recovery
//!   controller
//! - Feeding harvested identities to the export batcher
//! - Writing the accepted entity metadata in the export phase
//! - Saving everything on every exit path, including cancellation

use crate::config::Config;
use crate::crawler::discovery::{self, WorkSource};
use crate::crawler::harvest::harvest_entity;
use crate::export::{build_sink, write_entity_exports, DeliverySink, ExportBatcher};
use crate::output::RunStats;
use crate::recovery::{RecoveryController, RecoveryError, RecoveryResult};
use crate::rotation::{IdentityRotator, ProxyRotator};
use crate::source::{EntityListing, ListingPage, RedditClient, RemoteSource};
use crate::state::{Entity, Phase};
use crate::storage::{Checkpoint, CheckpointStore, DedupStore, EntityCatalog};
use crate::GleanerError;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The external collaborators an orchestrator drives
pub struct Collaborators {
    pub source: Arc<dyn RemoteSource>,
    pub rotator: Box<dyn IdentityRotator>,
    pub sink: Box<dyn DeliverySink>,
}

/// Crawl orchestrator
///
/// Owns the checkpoint, the dedup store and the export batcher. Everything
/// runs on one task; the cancellation token is checked between work items.
pub struct Orchestrator {
    config: Config,
    config_hash: String,
    source: Arc<dyn RemoteSource>,
    recovery: RecoveryController,
    dedup: DedupStore,
    catalog: EntityCatalog,
    checkpoints: CheckpointStore,
    checkpoint: Checkpoint,
    batcher: ExportBatcher,
    cancel: CancellationToken,
    stats: RunStats,
    /// First phase aborted in this run; the checkpoint does not move past it
    aborted: Option<Phase>,
    posts_since_rotation: usize,
}

impl Orchestrator {
    /// Creates an orchestrator over the data directory named in `config`
    ///
    /// Dedup and exporter state are loaded here; the checkpoint is loaded
    /// when the run starts.
    pub fn new(
        config: Config,
        config_hash: String,
        parts: Collaborators,
        cancel: CancellationToken,
    ) -> Self {
        let data_dir = PathBuf::from(&config.output.data_dir);
        let dedup = DedupStore::open(&data_dir, config.dedup.persist_interval);
        let catalog = EntityCatalog::open(&data_dir);
        let checkpoints = CheckpointStore::new(&data_dir);
        let batcher = ExportBatcher::open(&data_dir, &config.export, parts.sink);
        let recovery = RecoveryController::new(
            Arc::clone(&parts.source),
            parts.rotator,
            config.recovery.clone(),
            cancel.clone(),
        );

        Self {
            config,
            config_hash,
            source: parts.source,
            recovery,
            dedup,
            catalog,
            checkpoints,
            checkpoint: Checkpoint::default(),
            batcher,
            cancel,
            stats: RunStats::new(),
            aborted: None,
            posts_since_rotation: 0,
        }
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn batcher(&self) -> &ExportBatcher {
        &self.batcher
    }

    /// Runs every remaining phase, then the shutdown sequence
    ///
    /// The shutdown sequence (export flush, dedup and checkpoint saves) runs
    /// whether the phases finished, aborted or were cancelled.
    pub async fn run(&mut self) -> RunStats {
        self.restore();
        self.run_phases().await;
        self.shutdown().await;

        self.stats.recovery = self.recovery.stats();
        self.stats.finish();
        tracing::info!(
            "Run {}: {} entities processed ({} failed), {} identities accepted, {} chunks written",
            self.stats.status(),
            self.stats.entities_processed,
            self.stats.entities_failed,
            self.stats.identities_accepted,
            self.stats.chunks_written
        );
        self.stats.clone()
    }

    /// Loads the checkpoint and rebuilds the transient queued set from it
    fn restore(&mut self) {
        match self.checkpoints.load() {
            Ok(Some(checkpoint)) => {
                if let Some(saved) = &checkpoint.config_hash {
                    if saved != &self.config_hash {
                        tracing::warn!(
                            "Configuration changed since the checkpoint was written; resuming anyway"
                        );
                    }
                }
                self.checkpoint = checkpoint;
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to load checkpoint, starting at phase init: {}", e),
        }

        self.checkpoint.config_hash = Some(self.config_hash.clone());
        self.checkpoint.queue = self.dedup.unprocessed(&self.checkpoint.queue);
        self.dedup.mark_queued(&self.checkpoint.queue);
        self.batcher.reconcile(&mut self.dedup);

        if !self.checkpoint.queue.is_empty() {
            tracing::info!(
                "Resuming phase {} with {} queued entities",
                self.checkpoint.phase,
                self.checkpoint.queue.len()
            );
        }
    }

    async fn run_phases(&mut self) {
        if self.checkpoint.phase == Phase::Done {
            tracing::info!("Checkpoint records a finished run, nothing to resume");
            self.stats.completed = true;
            return;
        }

        self.advance(Phase::Search);

        for phase in Phase::discovery_phases() {
            if !self.checkpoint.phase.should_run(phase) {
                tracing::info!("Skipping phase {} (already complete)", phase);
                continue;
            }
            if self.cancel.is_cancelled() {
                self.stats.cancelled = true;
                return;
            }

            self.advance(phase);
            self.save_checkpoint();
            tracing::info!("Entering phase {}", phase);

            let result = match phase {
                Phase::Search => self.search_phase().await,
                Phase::Popular => self.listing_phase(phase, EntityListing::Popular).await,
                Phase::New => self.listing_phase(phase, EntityListing::New).await,
                Phase::Related => self.related_phase().await,
                _ => Ok(()),
            };

            if !self.finish_phase(phase, result) {
                return;
            }
        }

        if self.cancel.is_cancelled() {
            self.stats.cancelled = true;
            return;
        }

        self.advance(Phase::Export);
        self.save_checkpoint();
        tracing::info!("Entering phase {}", Phase::Export);

        let result = self.process_batch().await;
        if result.is_ok() {
            self.export_entities();
        }
        if self.finish_phase(Phase::Export, result) && self.aborted.is_none() {
            self.stats.completed = true;
        }
    }

    /// Records a phase outcome. Returns false if the run must stop.
    fn finish_phase(&mut self, phase: Phase, result: RecoveryResult<()>) -> bool {
        match result {
            Ok(()) => {
                let phase_stats = self.stats.phase_mut(phase).clone();
                tracing::info!(
                    "Phase {} complete: {} discovered, {} pages, {} failed pages",
                    phase,
                    phase_stats.discovered,
                    phase_stats.pages,
                    phase_stats.failed_pages
                );
                true
            }
            Err(RecoveryError::Cancelled) => {
                tracing::info!("Phase {} interrupted", phase);
                self.stats.cancelled = true;
                false
            }
            Err(e) => {
                tracing::error!("Phase {} aborted: {}", phase, e);
                self.stats.phase_mut(phase).aborted = true;
                if self.aborted.is_none() {
                    self.aborted = Some(phase);
                }
                self.save_checkpoint();
                true
            }
        }
    }

    /// Moves the checkpoint forward unless an earlier phase aborted
    fn advance(&mut self, phase: Phase) {
        if self.aborted.is_none() {
            self.checkpoint.advance_to(phase);
        }
    }

    // ===== Discovery Phases =====

    async fn search_phase(&mut self) -> RecoveryResult<()> {
        let terms = self.config.crawler.search_terms.clone();
        let source = Arc::clone(&self.source);

        for term in &terms {
            if self.checkpoint.is_term_completed(term) {
                tracing::debug!("Search term '{}' already complete", term);
                continue;
            }
            if self.cancel.is_cancelled() {
                return Err(RecoveryError::Cancelled);
            }

            let consumed = self
                .consume_pages(
                    source.as_ref(),
                    Phase::Search,
                    WorkSource::Search(term),
                    self.config.crawler.search_pages,
                )
                .await?;

            if consumed {
                self.checkpoint.complete_term(term);
                self.save_checkpoint();
            }
        }
        Ok(())
    }

    async fn listing_phase(&mut self, phase: Phase, listing: EntityListing) -> RecoveryResult<()> {
        let source = Arc::clone(&self.source);
        self.consume_pages(
            source.as_ref(),
            phase,
            WorkSource::Listing(listing),
            self.config.crawler.listing_pages,
        )
        .await?;
        Ok(())
    }

    /// Pages through a work source. Returns true if every page was consumed.
    async fn consume_pages(
        &mut self,
        source: &dyn RemoteSource,
        phase: Phase,
        work: WorkSource<'_>,
        max_pages: u32,
    ) -> RecoveryResult<bool> {
        let mut after: Option<String> = None;

        for page in 1..=max_pages {
            if self.cancel.is_cancelled() {
                return Err(RecoveryError::Cancelled);
            }

            let fetched =
                discovery::fetch_page(source, &mut self.recovery, work, page, after.as_deref())
                    .await;

            let ListingPage { items, after: next } = match fetched {
                Ok(listing) => listing,
                Err(e) if e.is_fatal_for_phase() => return Err(e),
                Err(e) => {
                    tracing::warn!("Giving up on page {}: {}", page, e);
                    self.stats.phase_mut(phase).failed_pages += 1;
                    return Ok(false);
                }
            };

            self.stats.phase_mut(phase).pages += 1;
            self.admit_entities(phase, items).await?;

            match next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }
        Ok(true)
    }

    /// Follows `/r/<name>` references in the sidebars of discovered entities
    async fn related_phase(&mut self) -> RecoveryResult<()> {
        let limit = self.config.crawler.related_limit;
        let source = Arc::clone(&self.source);
        let mut explored = 0;

        while explored < limit {
            if self.cancel.is_cancelled() {
                return Err(RecoveryError::Cancelled);
            }
            let Some(name) = self.checkpoint.explore_queue.first().cloned() else {
                break;
            };

            match discovery::fetch_sidebar(source.as_ref(), &mut self.recovery, &name).await {
                Ok(sidebar) => {
                    explored += 1;
                    self.stats.phase_mut(Phase::Related).pages += 1;

                    for related in discovery::related_names(&sidebar) {
                        if !self.dedup.should_process(&related) {
                            continue;
                        }
                        match discovery::lookup_entity(source.as_ref(), &mut self.recovery, &related)
                            .await
                        {
                            Ok(Some(entity)) => {
                                self.admit_entities(Phase::Related, vec![entity]).await?
                            }
                            Ok(None) => {}
                            Err(e) if e.is_fatal_for_phase() => return Err(e),
                            Err(e) => tracing::debug!("Lookup of {} failed: {}", related, e),
                        }
                    }
                }
                Err(e) if e.is_fatal_for_phase() => return Err(e),
                Err(e) => {
                    tracing::debug!("Skipping sidebar of {}: {}", name, e);
                    self.stats.phase_mut(Phase::Related).failed_pages += 1;
                }
            }

            // Discoveries above only append, so the front is still `name`
            self.checkpoint.explore_queue.remove(0);
            self.save_checkpoint();
        }
        Ok(())
    }

    /// Queues accepted entities that were never seen before
    ///
    /// Each entity is catalogued and saved in the checkpoint queue before it
    /// is marked discovered, so a crash in between can only cause a repeat,
    /// not a loss. A batch is harvested as soon as it is full, before the
    /// next entity is admitted.
    async fn admit_entities(&mut self, phase: Phase, entities: Vec<Entity>) -> RecoveryResult<()> {
        let mut admitted = 0;
        for entity in entities {
            if !entity.is_accepted(&self.config.discovery) {
                tracing::debug!("Rejected entity {}", entity.name);
                continue;
            }
            if !self.dedup.should_process(&entity.name) {
                continue;
            }

            if let Err(e) = self.catalog.record(&entity) {
                tracing::error!("Failed to catalog {}: {}", entity.name, e);
            }

            self.dedup.add_queued(&entity.name);
            self.checkpoint.queue.push(entity.name.clone());
            self.checkpoint.explore_queue.push(entity.name.clone());
            self.save_checkpoint();

            self.dedup.mark_discovered(&entity.name);
            self.stats.phase_mut(phase).discovered += 1;
            admitted += 1;

            if self.checkpoint.queue.len() >= self.config.crawler.batch_size {
                self.process_batch().await?;
            }
        }

        if admitted > 0 {
            tracing::debug!(
                "Queued {} new entities ({} in batch)",
                admitted,
                self.checkpoint.queue.len()
            );
        }
        Ok(())
    }

    // ===== Harvesting =====

    /// Harvests every queued entity that is not processed yet
    ///
    /// An entity leaves the queue only after its identities were handed to
    /// the export batcher and it was marked processed.
    async fn process_batch(&mut self) -> RecoveryResult<()> {
        let batch = self.dedup.unprocessed(&self.checkpoint.queue);
        if batch.is_empty() {
            self.checkpoint.queue.clear();
            self.dedup.clear_queue();
            return Ok(());
        }

        self.stats.batches += 1;
        tracing::info!("Harvesting batch of {} entities", batch.len());
        let source = Arc::clone(&self.source);

        for (i, name) in batch.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(RecoveryError::Cancelled);
            }

            let harvest = harvest_entity(
                source.as_ref(),
                &mut self.recovery,
                &self.config.crawler,
                name,
                &mut self.posts_since_rotation,
            )
            .await?;

            if harvest.is_failed() {
                tracing::warn!("{}: no time filter could be harvested", name);
                self.stats.entities_failed += 1;
            }

            let added = self.batcher.add_identities(&mut self.dedup, &harvest.identities);
            self.stats.identities_accepted += added as u64;
            self.stats.duplicates_filtered += (harvest.identities.len() - added) as u64;

            self.dedup.mark_processed(name);
            self.checkpoint.dequeue(name);
            self.save_checkpoint();
            self.stats.entities_processed += 1;

            tracing::info!(
                "[{}/{}] {}: {} identities ({} new) from {} posts",
                i + 1,
                batch.len(),
                name,
                harvest.identities.len(),
                added,
                harvest.posts_seen
            );

            self.flush_export(false).await;
        }

        self.checkpoint.queue.clear();
        self.dedup.clear_queue();
        self.dedup.save(true);
        self.save_checkpoint();
        self.flush_export(true).await;

        let dedup = self.dedup.stats();
        tracing::info!(
            "Batch complete: {} entities processed in total, {} identities seen, {} pending export",
            dedup.processed,
            dedup.identities,
            self.batcher.pending_len()
        );
        Ok(())
    }

    // ===== Persistence =====

    /// Writes pending identities out as chunks
    ///
    /// The dedup store is force-saved first so that every identity written
    /// to a chunk is already durable in the seen set.
    async fn flush_export(&mut self, force: bool) {
        let threshold = self.config.export.threshold;
        if self.batcher.pending_len() == 0 || (!force && !self.batcher.should_export(threshold)) {
            return;
        }

        self.dedup.save(true);
        let uploaded_before = self.batcher.state().total_uploaded;

        match self.batcher.export_chunks(force, threshold).await {
            Ok(chunks) => {
                self.stats.chunks_written += chunks as u64;
                self.stats.files_uploaded += self.batcher.state().total_uploaded - uploaded_before;
            }
            Err(e) => tracing::error!("Export failed, identities stay pending: {}", e),
        }
    }

    /// Rewrites the entity metadata files from the catalog
    fn export_entities(&mut self) {
        let data_dir = PathBuf::from(&self.config.output.data_dir);
        let records = self.catalog.by_population();
        match write_entity_exports(&data_dir, &records) {
            Ok(_) => {
                self.stats.entities_exported = records.len() as u64;
                tracing::info!("Exported metadata of {} entities", records.len());
            }
            Err(e) => tracing::error!("Entity metadata export failed: {}", e),
        }
    }

    fn save_checkpoint(&self) {
        if let Err(e) = self.checkpoints.save(&self.checkpoint) {
            tracing::error!("Failed to save checkpoint: {}", e);
        }
    }

    /// Runs on every exit path
    async fn shutdown(&mut self) {
        tracing::info!("Saving state");
        self.flush_export(true).await;
        self.dedup.save(true);
        self.batcher.save_state();

        if self.stats.completed && !self.stats.cancelled {
            self.checkpoint.advance_to(Phase::Done);
            if let Err(e) = self.checkpoints.delete() {
                tracing::error!("Failed to delete checkpoint: {}", e);
            }
        } else {
            self.save_checkpoint();
            tracing::info!(
                "Checkpoint kept at phase {} ({} queued)",
                self.checkpoint.phase,
                self.checkpoint.queue.len()
            );
        }
    }
}

/// Runs a crawl against the live remote source
///
/// Builds the reqwest client, the proxy rotator and the delivery sink from
/// `config`, verifies the proxy, then runs the orchestrator.
///
/// # Returns
///
/// * `Ok(RunStats)` - The run ended (completed, aborted or interrupted)
/// * `Err(GleanerError)` - The proxy could not be established before any work began
///
/// # Example
///
/// ```no_run
/// use gleaner::config::load_config_with_hash;
/// use gleaner::crawler::run_crawl;
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("gleaner.toml"))?;
/// let stats = run_crawl(config, hash, CancellationToken::new()).await?;
/// println!("{} identities", stats.identities_accepted);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    config_hash: String,
    cancel: CancellationToken,
) -> Result<RunStats, GleanerError> {
    let mut rotator = ProxyRotator::new(config.rotator.clone())?;
    rotator.verify().await?;

    let source = RedditClient::new(config.source.clone(), Some(config.rotator.proxy_url.clone()))?;
    let sink = build_sink(config.delivery.as_ref());

    let parts = Collaborators {
        source: Arc::new(source),
        rotator: Box::new(rotator),
        sink,
    };

    let mut orchestrator = Orchestrator::new(config, config_hash, parts, cancel);
    Ok(orchestrator.run().await)
}
