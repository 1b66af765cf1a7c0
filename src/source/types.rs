use std::fmt;

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage<T> {
    pub items: Vec<T>,

    /// Cursor for the next page, None on the last page
    pub after: Option<String>,
}

impl<T> Default for ListingPage<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            after: None,
        }
    }
}

impl<T> ListingPage<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, after: None }
    }
}

/// Entity listings that are paged without a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityListing {
    Popular,
    New,
}

impl EntityListing {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Popular => "/subreddits/popular",
            Self::New => "/subreddits/new",
        }
    }
}

/// Sort category of an entity's post listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCategory {
    Top,
    Hot,
    New,
}

impl PostCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Hot => "hot",
            Self::New => "new",
        }
    }
}

impl fmt::Display for PostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post whose comment tree holds harvestable identities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Site-relative permalink, e.g. `/r/rust/comments/abc/title/`
    pub permalink: String,
    pub title: Option<String>,
}
