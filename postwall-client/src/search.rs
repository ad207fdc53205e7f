use crate::error::Result;
use postwall_backend::client::Database;
use postwall_common::{
    model::{
        Id,
        post::{Post, PostMarker},
    },
    util::{SEARCH_PREVIEW_LEN, summarize},
};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, instrument};

pub const SEARCH_LIMIT: u64 = 20;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct SearchHit {
    pub post_id: Id<PostMarker>,
    pub author: String,
    pub preview: String,
    pub created_at: OffsetDateTime,
}

/// "Nothing searched yet" and "searched, nothing found" are different states.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub enum SearchState {
    #[default]
    NotSearched,
    NoResults,
    Results(Vec<SearchHit>),
}

pub struct SearchView<B: Database + ?Sized> {
    backend: Arc<B>,
    state: SearchState,
}

impl From<&Post> for SearchHit {
    fn from(value: &Post) -> Self {
        Self {
            post_id: value.id,
            author: value.author.clone(),
            preview: summarize(&value.content, SEARCH_PREVIEW_LEN),
            created_at: value.created_at,
        }
    }
}

impl<B: Database + ?Sized> SearchView<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            state: SearchState::NotSearched,
        }
    }

    #[must_use]
    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Runs a search. Blank terms leave the state untouched.
    #[instrument(skip(self))]
    pub async fn search(&mut self, term: &str) -> Result<&SearchState> {
        let term = term.trim();
        if term.is_empty() {
            debug!("Ignoring blank search term");
            return Ok(&self.state);
        }

        let posts = self.backend.search_posts(term, SEARCH_LIMIT).await?;
        debug!(hits = posts.len(), "Search finished");
        self.state = if posts.is_empty() {
            SearchState::NoResults
        } else {
            SearchState::Results(posts.iter().map(SearchHit::from).collect())
        };

        Ok(&self.state)
    }
}
