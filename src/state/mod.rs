//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `Phase`: The enumerable crawl phase recorded in the checkpoint
//! - `Entity`: A discovered entity and its acceptance rules
//! - `Visibility`: The visibility class reported for an entity

mod entity;
mod phase;

// Re-export main types
pub use entity::{Entity, Visibility};
pub use phase::Phase;
