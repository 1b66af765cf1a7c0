//! Crawler module for entity discovery and identity harvesting
//!
//! This module contains the core crawl logic, including:
//! - Discovery work sources (keyword search, listings, sidebar references)
//! - Per-entity harvesting with fallback widening
//! - The orchestrator that drives phases, batches and persistence

mod coordinator;
mod discovery;
mod harvest;

pub use coordinator::{run_crawl, Collaborators, Orchestrator};
pub use discovery::{fetch_page, fetch_sidebar, lookup_entity, related_names, WorkSource};
pub use harvest::{harvest_entity, Harvest};
