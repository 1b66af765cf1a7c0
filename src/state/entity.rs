use crate::config::DiscoveryConfig;

/// Visibility class reported for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Restricted,
    Private,
}

impl Visibility {
    /// Maps the source's `subreddit_type` field. Unknown kinds are treated as private.
    pub fn from_source_kind(kind: &str) -> Self {
        match kind {
            "public" => Self::Public,
            "restricted" => Self::Restricted,
            _ => Self::Private,
        }
    }
}

/// A discovered entity (a subreddit)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Lower-cased name
    pub name: String,

    /// Population size (subscriber count)
    pub population: u64,

    /// Adult/restricted-content flag
    pub adult: bool,

    pub visibility: Visibility,
}

impl Entity {
    pub fn new(name: &str, population: u64, adult: bool, visibility: Visibility) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            population,
            adult,
            visibility,
        }
    }

    /// Returns true if this entity passes the discovery acceptance rules
    ///
    /// Private entities are never accepted since their identities cannot be
    /// harvested.
    pub fn is_accepted(&self, rules: &DiscoveryConfig) -> bool {
        if self.name.is_empty() {
            return false;
        }

        match self.visibility {
            Visibility::Public => {}
            Visibility::Restricted if rules.include_restricted => {}
            _ => return false,
        }

        !rules.adult_only || self.adult
    }
}
