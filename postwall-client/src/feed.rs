//! The post feed: paged loading, sort changes and live merging.
//!
//! [`Feed`] is a plain state machine; every change to it goes through
//! [`Feed::apply`]. [`FeedStore`] owns a feed together with the queue of
//! completed fetches and the live subscription, and applies their events
//! one at a time.

use crate::{
    error::{ClientError, Result},
    scroll::VisibilityTrigger,
};
use postwall_backend::{
    change::{EventFilter, RowChange, Subscription},
    client::Backend,
};
use postwall_common::model::{
    Id,
    page::{Page, PageRange},
    post::{Post, PostMarker},
    sort::SortOrder,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Identifies one page request. Results carrying an outdated ticket are dropped.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct PageTicket {
    pub generation: u64,
    pub page: u64,
    pub sort: SortOrder,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum FeedEvent {
    PageLoaded { ticket: PageTicket, page: Page<Post> },
    PageFailed { ticket: PageTicket, message: String },
    LiveInsert(Post),
    LiveUpdate(Post),
    LiveDelete(Id<PostMarker>),
}

#[derive(Clone, Debug)]
pub struct Feed {
    posts: Vec<Post>,
    sort: SortOrder,
    page_size: u64,
    next_page: u64,
    /// Net rows added ahead of the cursor since the pages were fetched.
    offset_shift: i64,
    has_more: bool,
    generation: u64,
    in_flight: Option<(PageTicket, PageRange)>,
    unavailable: Option<String>,
}

impl Feed {
    #[must_use]
    pub fn new(page_size: u64) -> Self {
        Self {
            posts: Vec::new(),
            sort: SortOrder::default(),
            page_size: page_size.max(1),
            next_page: 0,
            offset_shift: 0,
            has_more: true,
            generation: 0,
            in_flight: None,
            unavailable: None,
        }
    }

    #[must_use]
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    #[must_use]
    pub fn sort(&self) -> SortOrder {
        self.sort
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The message of the last failed page fetch, until a fetch succeeds.
    #[must_use]
    pub fn unavailable(&self) -> Option<&str> {
        self.unavailable.as_deref()
    }

    #[must_use]
    pub fn next_page(&self) -> u64 {
        self.next_page
    }

    /// Claims the next page fetch. `None` while one is running or when
    /// everything is loaded.
    pub fn begin_next_page(&mut self) -> Option<(PageTicket, PageRange)> {
        if self.in_flight.is_some() || !self.has_more {
            return None;
        }

        let ticket = PageTicket {
            generation: self.generation,
            page: self.next_page,
            sort: self.sort,
        };
        let range = PageRange::for_page(ticket.page, self.page_size).shifted(self.offset_shift);
        self.in_flight = Some((ticket, range));

        Some((ticket, range))
    }

    /// Switches the order and forgets everything loaded so far. Returns
    /// `false` if `sort` already is the current order.
    pub fn change_sort(&mut self, sort: SortOrder) -> bool {
        if sort == self.sort {
            return false;
        }

        self.sort = sort;
        self.generation += 1;
        self.posts.clear();
        self.next_page = 0;
        self.offset_shift = 0;
        self.has_more = true;
        self.in_flight = None;
        self.unavailable = None;
        true
    }

    /// Returns whether the event changed the feed.
    pub fn apply(&mut self, event: FeedEvent) -> bool {
        match event {
            FeedEvent::PageLoaded { ticket, page } => self.page_loaded(ticket, page),
            FeedEvent::PageFailed { ticket, message } => {
                if !self.claims(ticket) {
                    return false;
                }
                self.in_flight = None;
                self.unavailable = Some(message);
                true
            }
            FeedEvent::LiveInsert(post) => {
                if !self.sort.accepts_live_changes() || self.contains(post.id) {
                    return false;
                }
                // A page in flight may already include the row; a repeat is
                // dropped as a known id, a skipped row would be lost.
                if self.next_page > 0 && self.in_flight.is_none() {
                    self.offset_shift += 1;
                }
                self.posts.insert(0, post);
                true
            }
            FeedEvent::LiveUpdate(post) => {
                if !self.sort.accepts_live_changes() {
                    return false;
                }
                let mut changed = false;
                for existing in self.posts.iter_mut().filter(|p| p.id == post.id) {
                    *existing = post.clone();
                    changed = true;
                }
                changed
            }
            FeedEvent::LiveDelete(id) => {
                if !self.sort.accepts_live_changes() {
                    return false;
                }
                self.remove_local(id)
            }
        }
    }

    /// Optimistic like, shown before the backend confirms it.
    pub fn bump_likes(&mut self, id: Id<PostMarker>) -> bool {
        let mut changed = false;
        for post in self.posts.iter_mut().filter(|post| post.id == id) {
            post.likes += 1;
            changed = true;
        }
        changed
    }

    /// Drops every copy of the post, regardless of the sort order. Later
    /// pages start one row earlier to make up for it.
    pub fn remove_local(&mut self, id: Id<PostMarker>) -> bool {
        let before = self.posts.len();
        self.posts.retain(|post| post.id != id);
        if self.posts.len() == before {
            return false;
        }
        self.offset_shift -= 1;
        true
    }

    fn claims(&self, ticket: PageTicket) -> bool {
        self.in_flight.is_some_and(|(claimed, _)| claimed == ticket)
    }

    fn contains(&self, id: Id<PostMarker>) -> bool {
        self.posts.iter().any(|post| post.id == id)
    }

    fn page_loaded(&mut self, ticket: PageTicket, page: Page<Post>) -> bool {
        let Some((_, range)) = self.in_flight.filter(|(claimed, _)| *claimed == ticket) else {
            debug!(?ticket, "Dropping stale page");
            return false;
        };

        for post in page.rows {
            if !self.contains(post.id) {
                self.posts.push(post);
            }
        }

        self.in_flight = None;
        self.unavailable = None;
        self.next_page = ticket.page + 1;
        self.has_more = range.has_more(page.total);
        true
    }
}

/// A [`Feed`] wired to a backend.
pub struct FeedStore<B: Backend + ?Sized> {
    backend: Arc<B>,
    feed: Feed,
    trigger: VisibilityTrigger,
    results: mpsc::UnboundedReceiver<FeedEvent>,
    results_sender: mpsc::UnboundedSender<FeedEvent>,
    live: Option<Subscription<Post>>,
}

impl<B: Backend + ?Sized + 'static> FeedStore<B> {
    /// Subscribes to post changes and starts fetching the first page.
    pub async fn open(backend: Arc<B>, page_size: u64) -> Result<Self> {
        let live = Subscription::open(backend.as_ref(), EventFilter::All, None).await?;
        let (results_sender, results) = mpsc::unbounded_channel();

        let mut store = Self {
            backend,
            feed: Feed::new(page_size),
            trigger: VisibilityTrigger::default(),
            results,
            results_sender,
            live: Some(live),
        };
        store.request_next_page();

        Ok(store)
    }

    #[must_use]
    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    /// Starts fetching the next page in the background. Returns `false` if
    /// a fetch is already running or nothing is left.
    pub fn request_next_page(&mut self) -> bool {
        let Some((ticket, range)) = self.feed.begin_next_page() else {
            return false;
        };

        debug!(?ticket, ?range, "Fetching page");
        let backend = Arc::clone(&self.backend);
        let results = self.results_sender.clone();
        tokio::spawn(async move {
            let event = match backend.fetch_posts_page(ticket.sort, range).await {
                Ok(page) => FeedEvent::PageLoaded { ticket, page },
                Err(error) => FeedEvent::PageFailed {
                    ticket,
                    message: error.to_string(),
                },
            };
            // The store may be gone already.
            let _ = results.send(event);
        });
        true
    }

    /// Reports whether the last rendered post is on screen; loads more when
    /// it just scrolled into view.
    pub fn last_post_visible(&mut self, visible: bool) -> bool {
        let fire = self
            .trigger
            .observe(visible, self.feed.is_loading(), self.feed.has_more());

        fire && self.request_next_page()
    }

    /// Loads the next page, or waits for the fetch already running.
    pub async fn load_next_page(&mut self) -> Result<()> {
        self.request_next_page();
        self.settle().await
    }

    /// Waits until no page fetch is running.
    pub async fn settle(&mut self) -> Result<()> {
        while self.feed.is_loading() {
            if self.next_event().await.is_none() {
                break;
            }
        }

        match self.feed.unavailable() {
            Some(message) => Err(ClientError::FeedUnavailable(message.to_owned())),
            None => Ok(()),
        }
    }

    /// Switches the sort order and starts loading its first page.
    #[instrument(skip(self))]
    pub fn change_sort(&mut self, sort: SortOrder) -> bool {
        if !self.feed.change_sort(sort) {
            return false;
        }

        info!("Changed sort order");
        self.trigger.reset();
        self.request_next_page();
        true
    }

    /// Likes a post: shown immediately, then sent. A failed request is not
    /// rolled back locally.
    #[instrument(skip(self))]
    pub async fn like(&mut self, id: Id<PostMarker>) -> Result<()> {
        self.feed.bump_likes(id);

        self.backend
            .increment_post_likes(id, 1)
            .await
            .inspect_err(|error| warn!(%error, "Like was not recorded"))?;
        Ok(())
    }

    /// Deletes a post. The local list only changes once the backend agreed.
    #[instrument(skip(self))]
    pub async fn remove(&mut self, id: Id<PostMarker>) -> Result<()> {
        self.backend
            .delete_post(id)
            .await
            .inspect_err(|error| warn!(%error, "Could not delete post"))?;

        self.feed.remove_local(id);
        info!("Deleted post");
        Ok(())
    }

    /// Waits for the next fetch result or live change and applies it.
    /// Returns the applied event, or `None` once both sources are closed.
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        loop {
            let event = tokio::select! {
                result = self.results.recv() => result?,
                change = next_change(&mut self.live), if self.live.is_some() => {
                    match change {
                        Some(Ok(change)) => live_event(change),
                        Some(Err(error)) => {
                            warn!(%error, "Skipping undecodable post change");
                            continue;
                        }
                        None => {
                            warn!("Live post updates ended");
                            self.live = None;
                            continue;
                        }
                    }
                }
            };

            let appended = matches!(event, FeedEvent::PageLoaded { .. });
            if self.feed.apply(event.clone()) && appended {
                // The last rendered post is a different one now.
                self.trigger.reset();
            }
            return Some(event);
        }
    }
}

async fn next_change(
    live: &mut Option<Subscription<Post>>,
) -> Option<postwall_backend::client::Result<RowChange<Post>>> {
    match live {
        Some(live) => live.next().await,
        None => None,
    }
}

fn live_event(change: RowChange<Post>) -> FeedEvent {
    match change {
        RowChange::Insert(post) => FeedEvent::LiveInsert(post),
        RowChange::Update(post) => FeedEvent::LiveUpdate(post),
        RowChange::Delete(id) => FeedEvent::LiveDelete(id),
    }
}
