//! Crawl phase definitions for checkpointing progress
//!
//! Phases run in declaration order. A resumed run re-enters the recorded
//! phase and treats every earlier phase as complete.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the phase a crawl run has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Nothing has run yet
    Init,

    // ===== Discovery Phases =====
    /// Keyword search over the configured terms
    Search,

    /// Paging through the popular listing
    Popular,

    /// Paging through the new listing
    New,

    /// Traversing sidebar references of discovered entities
    Related,

    // ===== Terminal Phases =====
    /// Flushing whatever is left in the export buffer
    Export,

    /// The run completed and no resume is needed
    Done,
}

impl Phase {
    /// Returns true if `phase` still has to run when resuming from `self`
    pub fn should_run(&self, phase: Phase) -> bool {
        phase >= *self
    }

    /// Converts the phase to its persisted string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Search => "search",
            Self::Popular => "popular",
            Self::New => "new",
            Self::Related => "related",
            Self::Export => "export",
            Self::Done => "done",
        }
    }

    /// Returns the discovery phases in execution order
    pub fn discovery_phases() -> [Self; 4] {
        [Self::Search, Self::Popular, Self::New, Self::Related]
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::Init
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
