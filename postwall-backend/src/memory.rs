//! In-process backend with the same contract as the hosted service.
//!
//! Rows, accounts and stored objects live in memory. Every write fans out to
//! matching subscriptions just like the realtime service would. Single
//! operations can be made to fail once with [`MemoryBackend::fail_next`].

use crate::{
    change::{ChangeFilter, ChangeKind, ChangeStream, RawChange, Table},
    client::{Auth, BackendError, Database, Realtime, Result, Storage},
    record::{CommentRecord, PostRecord},
};
use async_trait::async_trait;
use postwall_common::model::{
    Id,
    auth::{AccessToken, AuthEvent, AuthEventKind, Credentials, RefreshToken, Session, SignUp},
    comment::{Comment, NewComment},
    page::{Page, PageRange},
    post::{NewPost, Post, PostEdit, PostMarker},
    sort::SortOrder,
    user::{DisplayName, User, UserId},
};
use serde_json::Value;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, HashSet},
};
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const SESSION_LIFETIME: Duration = Duration::hours(1);

/// Backend operations that can be told to fail.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Operation {
    FetchPostsPage,
    FetchPost,
    FetchTopPosts,
    SearchPosts,
    CountPosts,
    CountComments,
    InsertPost,
    UpdatePost,
    SetPostViews,
    DeletePost,
    IncrementPostLikes,
    IncrementCommentCount,
    FetchComments,
    InsertComment,
    Upload,
    SignUp,
    SignIn,
    SignOut,
}

#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    auth_events: broadcast::Sender<AuthEvent>,
    public_base: Url,
}

#[derive(Debug, Default)]
struct MemoryState {
    posts: BTreeMap<Id<PostMarker>, Post>,
    comments: Vec<Comment>,
    objects: HashMap<(String, String), StoredObject>,
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    last_post_id: i64,
    last_comment_id: i64,
    failures: HashSet<Operation>,
    subscribers: Vec<Subscriber>,
}

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Clone, Debug)]
struct Account {
    password: String,
    user: User,
}

#[derive(Debug)]
struct Subscriber {
    filter: ChangeFilter,
    changes: mpsc::UnboundedSender<RawChange>,
}

impl Operation {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Operation::FetchPostsPage => "fetch_posts_page",
            Operation::FetchPost => "fetch_post",
            Operation::FetchTopPosts => "fetch_top_posts",
            Operation::SearchPosts => "search_posts",
            Operation::CountPosts => "count_posts",
            Operation::CountComments => "count_comments",
            Operation::InsertPost => "insert_post",
            Operation::UpdatePost => "update_post",
            Operation::SetPostViews => "set_post_views",
            Operation::DeletePost => "delete_post",
            Operation::IncrementPostLikes => "increment_post_likes",
            Operation::IncrementCommentCount => "increment_comment_count",
            Operation::FetchComments => "fetch_comments",
            Operation::InsertComment => "insert_comment",
            Operation::Upload => "upload",
            Operation::SignUp => "sign_up",
            Operation::SignIn => "sign_in",
            Operation::SignOut => "sign_out",
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let (auth_events, _) = broadcast::channel(16);
        let public_base =
            Url::parse("memory://postwall/storage/").expect("Static storage URL is valid.");

        Self {
            state: Mutex::new(MemoryState::default()),
            auth_events,
            public_base,
        }
    }

    /// Makes the next call of `operation` fail with [`BackendError::Injected`].
    pub async fn fail_next(&self, operation: Operation) {
        self.state.lock().await.failures.insert(operation);
    }

    /// Stores a post as-is, without notifying subscribers.
    pub async fn put_post(&self, post: Post) {
        let mut state = self.state.lock().await;
        state.last_post_id = state.last_post_id.max(post.id.get());
        state.posts.insert(post.id, post);
    }

    /// Inserts `count` posts with bodies `post 1`, `post 2` and so on, one
    /// second apart, and returns their ids oldest first.
    pub async fn seed_posts(&self, count: usize) -> Vec<Id<PostMarker>> {
        let mut state = self.state.lock().await;
        let start = OffsetDateTime::now_utc() - Duration::days(1);

        (1..=count)
            .map(|n| {
                state.last_post_id += 1;
                let id = Id::new(state.last_post_id);
                let content = format!("post {n}");
                let post = Post {
                    id,
                    author: "seed".to_owned(),
                    author_id: None,
                    title: content.clone(),
                    content,
                    file_urls: Vec::new(),
                    created_at: start + Duration::seconds(state.last_post_id),
                    updated_at: None,
                    likes: 0,
                    comment_count: 0,
                    views: 0,
                };
                state.posts.insert(id, post);
                id
            })
            .collect()
    }

    pub async fn post(&self, id: Id<PostMarker>) -> Option<Post> {
        self.state.lock().await.posts.get(&id).cloned()
    }

    pub async fn object(&self, bucket: &str, name: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .await
            .objects
            .get(&(bucket.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Number of subscriptions whose stream is still alive.
    pub async fn live_subscriptions(&self) -> usize {
        let mut state = self.state.lock().await;
        state.subscribers.retain(|subscriber| !subscriber.changes.is_closed());
        state.subscribers.len()
    }

    fn emit_auth(&self, kind: AuthEventKind, session: Option<Session>) {
        // Nobody listening is fine.
        let _ = self.auth_events.send(AuthEvent { kind, session });
    }
}

impl MemoryState {
    fn check(&mut self, operation: Operation) -> Result<()> {
        if self.failures.remove(&operation) {
            debug!(operation = operation.name(), "Injecting failure");
            return Err(BackendError::Injected(operation.name()));
        }
        Ok(())
    }

    fn publish(&mut self, table: Table, change: RawChange) {
        self.subscribers
            .retain(|subscriber| !subscriber.changes.is_closed());

        for subscriber in &self.subscribers {
            if subscriber.filter.matches(table, &change) {
                let _ = subscriber.changes.send(change.clone());
            }
        }
    }

    fn publish_post(&mut self, kind: ChangeKind, post: &Post) {
        let record = serde_json::to_value(PostRecord::from(post)).unwrap_or(Value::Null);
        let change = match kind {
            ChangeKind::Delete => RawChange {
                kind,
                record: Value::Null,
                old_record: serde_json::json!({ "id": post.id.get() }),
            },
            ChangeKind::Insert | ChangeKind::Update => RawChange {
                kind,
                record,
                old_record: Value::Null,
            },
        };
        self.publish(Table::Posts, change);
    }

    fn update_post_with(&mut self, id: Id<PostMarker>, update: impl FnOnce(&mut Post)) {
        if let Some(post) = self.posts.get_mut(&id) {
            update(post);
            let post = post.clone();
            self.publish_post(ChangeKind::Update, &post);
        }
    }

    fn sorted_posts(&self, sort: SortOrder) -> Vec<Post> {
        let mut posts: Vec<Post> = self.posts.values().cloned().collect();
        posts.sort_by(|a, b| compare(sort, a, b));
        posts
    }

    fn issue_session(&mut self, user: User) -> Session {
        let session = Session {
            access_token: AccessToken::new(format!("memory-access-{}", Uuid::new_v4())),
            refresh_token: RefreshToken::new(format!("memory-refresh-{}", Uuid::new_v4())),
            expires_at: OffsetDateTime::now_utc() + SESSION_LIFETIME,
            user,
        };
        self.session = Some(session.clone());
        session
    }
}

/// Descending by the sort column, newer ids first on ties.
fn compare(sort: SortOrder, a: &Post, b: &Post) -> Ordering {
    let primary = match sort {
        SortOrder::Newest => b.created_at.cmp(&a.created_at),
        SortOrder::Popular => b.likes.cmp(&a.likes),
        SortOrder::Comments => b.comment_count.cmp(&a.comment_count),
        SortOrder::Views => b.views.cmp(&a.views),
    };
    primary.then_with(|| b.id.cmp(&a.id))
}

fn add(counter: u64, delta: i64) -> u64 {
    counter.saturating_add_signed(delta)
}

fn limit(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[async_trait]
impl Database for MemoryBackend {
    async fn fetch_posts_page(&self, sort: SortOrder, range: PageRange) -> Result<Page<Post>> {
        let mut state = self.state.lock().await;
        state.check(Operation::FetchPostsPage)?;

        let posts = state.sorted_posts(sort);
        let total = posts.len() as u64;
        let rows = posts
            .into_iter()
            .skip(limit(range.from))
            .take(limit(range.size()))
            .collect();

        Ok(Page { rows, total })
    }

    async fn fetch_post(&self, id: Id<PostMarker>) -> Result<Option<Post>> {
        let mut state = self.state.lock().await;
        state.check(Operation::FetchPost)?;

        Ok(state.posts.get(&id).cloned())
    }

    async fn fetch_top_posts(&self, sort: SortOrder, count: u64) -> Result<Vec<Post>> {
        let mut state = self.state.lock().await;
        state.check(Operation::FetchTopPosts)?;

        let mut posts = state.sorted_posts(sort);
        posts.truncate(limit(count));
        Ok(posts)
    }

    async fn search_posts(&self, term: &str, count: u64) -> Result<Vec<Post>> {
        let mut state = self.state.lock().await;
        state.check(Operation::SearchPosts)?;

        let needle = term.to_lowercase();
        Ok(state
            .sorted_posts(SortOrder::Newest)
            .into_iter()
            .filter(|post| {
                post.content.to_lowercase().contains(&needle)
                    || post.author.to_lowercase().contains(&needle)
            })
            .take(limit(count))
            .collect())
    }

    async fn count_posts(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.check(Operation::CountPosts)?;

        Ok(state.posts.len() as u64)
    }

    async fn count_comments(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.check(Operation::CountComments)?;

        Ok(state.comments.len() as u64)
    }

    async fn insert_post(&self, post: &NewPost) -> Result<Post> {
        let mut state = self.state.lock().await;
        state.check(Operation::InsertPost)?;

        state.last_post_id += 1;
        let post = Post {
            id: Id::new(state.last_post_id),
            author: post.author.clone(),
            author_id: post.author_id,
            title: post.content.title(),
            content: post.content.get().to_owned(),
            file_urls: post.file_urls.clone(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: None,
            likes: 0,
            comment_count: 0,
            views: 0,
        };
        state.posts.insert(post.id, post.clone());
        state.publish_post(ChangeKind::Insert, &post);

        Ok(post)
    }

    async fn update_post(&self, id: Id<PostMarker>, edit: &PostEdit) -> Result<Option<Post>> {
        let mut state = self.state.lock().await;
        state.check(Operation::UpdatePost)?;

        state.update_post_with(id, |post| {
            post.title = edit.content.title();
            post.content = edit.content.get().to_owned();
            post.file_urls.clone_from(&edit.file_urls);
            post.updated_at = Some(OffsetDateTime::now_utc());
        });
        Ok(state.posts.get(&id).cloned())
    }

    async fn set_post_views(&self, id: Id<PostMarker>, views: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check(Operation::SetPostViews)?;

        state.update_post_with(id, |post| post.views = views);
        Ok(())
    }

    async fn delete_post(&self, id: Id<PostMarker>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check(Operation::DeletePost)?;

        if let Some(post) = state.posts.remove(&id) {
            state.comments.retain(|comment| comment.post_id != id);
            state.publish_post(ChangeKind::Delete, &post);
        }
        Ok(())
    }

    async fn increment_post_likes(&self, id: Id<PostMarker>, delta: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check(Operation::IncrementPostLikes)?;

        state.update_post_with(id, |post| post.likes = add(post.likes, delta));
        Ok(())
    }

    async fn increment_comment_count(&self, id: Id<PostMarker>, delta: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check(Operation::IncrementCommentCount)?;

        state.update_post_with(id, |post| {
            post.comment_count = add(post.comment_count, delta);
        });
        Ok(())
    }

    async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        let mut state = self.state.lock().await;
        state.check(Operation::FetchComments)?;

        let mut comments: Vec<Comment> = state
            .comments
            .iter()
            .filter(|comment| comment.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(comments)
    }

    async fn insert_comment(&self, comment: &NewComment) -> Result<Comment> {
        let mut state = self.state.lock().await;
        state.check(Operation::InsertComment)?;

        state.last_comment_id += 1;
        let comment = Comment {
            id: Id::new(state.last_comment_id),
            post_id: comment.post_id,
            author: comment.author.clone(),
            content: comment.content.get().to_owned(),
            created_at: OffsetDateTime::now_utc(),
        };
        state.comments.push(comment.clone());

        let record = serde_json::to_value(CommentRecord::from(&comment))?;
        state.publish(
            Table::Comments,
            RawChange {
                kind: ChangeKind::Insert,
                record,
                old_record: Value::Null,
            },
        );

        Ok(comment)
    }
}

#[async_trait]
impl Storage for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check(Operation::Upload)?;

        let key = (bucket.to_owned(), name.to_owned());
        if state.objects.contains_key(&key) {
            return Err(BackendError::Api {
                status: 409,
                message: "The resource already exists".to_owned(),
            });
        }
        state.objects.insert(
            key,
            StoredObject {
                bytes,
                content_type: content_type.to_owned(),
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> Result<Url> {
        let mut url = self.public_base.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::InvalidBaseUrl(self.public_base.clone()))?
            .pop_if_empty()
            .extend([bucket, name]);
        Ok(url)
    }
}

#[async_trait]
impl Auth for MemoryBackend {
    async fn sign_up(&self, sign_up: &SignUp) -> Result<Option<Session>> {
        let mut state = self.state.lock().await;
        state.check(Operation::SignUp)?;

        let email = &sign_up.credentials.email;
        if state.accounts.contains_key(email) {
            return Err(BackendError::Api {
                status: 422,
                message: "User already registered".to_owned(),
            });
        }

        let user = User {
            id: UserId(Uuid::new_v4()),
            email: Some(email.clone()),
            display_name: Some(sign_up.display_name.clone()),
        };
        state.accounts.insert(
            email.clone(),
            Account {
                password: sign_up.credentials.password.clone(),
                user: user.clone(),
            },
        );
        let session = state.issue_session(user);
        drop(state);

        self.emit_auth(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        let mut state = self.state.lock().await;
        state.check(Operation::SignIn)?;

        let user = state
            .accounts
            .get(&credentials.email)
            .filter(|account| account.password == credentials.password)
            .map(|account| account.user.clone())
            .ok_or(BackendError::InvalidCredentials)?;
        let session = state.issue_session(user);
        drop(state);

        self.emit_auth(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check(Operation::SignOut)?;

        state.session = None;
        drop(state);

        self.emit_auth(AuthEventKind::SignedOut, None);
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        Ok(self.state.lock().await.session.clone())
    }

    async fn reset_password(&self, _email: &str) -> Result<()> {
        Ok(())
    }

    async fn update_display_name(&self, display_name: &DisplayName) -> Result<User> {
        let mut state = self.state.lock().await;
        let session = state.session.as_mut().ok_or(BackendError::NotSignedIn)?;

        session.user.display_name = Some(display_name.clone());
        let session = session.clone();
        if let Some(email) = &session.user.email
            && let Some(account) = state.accounts.get_mut(email)
        {
            account.user = session.user.clone();
        }
        drop(state);

        let user = session.user.clone();
        self.emit_auth(AuthEventKind::UserUpdated, Some(session));
        Ok(user)
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }
}

#[async_trait]
impl Realtime for MemoryBackend {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream> {
        let (changes, receiver) = mpsc::unbounded_channel();
        self.state
            .lock()
            .await
            .subscribers
            .push(Subscriber { filter, changes });

        Ok(ChangeStream::new(receiver, None))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        change::{EventFilter, RowChange, RowFilter, Subscription},
        client::{Auth, BackendError, Database, Storage},
        memory::{MemoryBackend, Operation},
    };
    use postwall_common::model::{
        auth::{Credentials, SignUp},
        comment::{Comment, CommentBody, NewComment},
        page::PageRange,
        post::{NewPost, Post, PostBody},
        sort::SortOrder,
    };

    fn new_post(content: &str) -> NewPost {
        NewPost {
            author: "tester".to_owned(),
            author_id: None,
            content: PostBody::new(content.to_owned()).unwrap(),
            file_urls: Vec::new(),
        }
    }

    #[tokio::test]
    async fn pages_are_sorted_and_counted() {
        let backend = MemoryBackend::new();
        let ids = backend.seed_posts(12).await;

        let page = backend
            .fetch_posts_page(SortOrder::Newest, PageRange::for_page(2, 5))
            .await
            .unwrap();

        assert_eq!(page.total, 12);
        let page_ids: Vec<_> = page.rows.iter().map(|post| post.id).collect();
        assert_eq!(page_ids, [ids[1], ids[0]]);
    }

    #[tokio::test]
    async fn writes_reach_matching_subscriptions() {
        let backend = MemoryBackend::new();
        let mut posts = Subscription::<Post>::open(&backend, EventFilter::All, None)
            .await
            .unwrap();

        let post = backend.insert_post(&new_post("hello")).await.unwrap();
        backend.increment_post_likes(post.id, 1).await.unwrap();
        backend.delete_post(post.id).await.unwrap();

        assert!(matches!(posts.next().await, Some(Ok(RowChange::Insert(p))) if p.id == post.id));
        assert!(matches!(posts.next().await, Some(Ok(RowChange::Update(p))) if p.likes == 1));
        assert!(matches!(posts.next().await, Some(Ok(RowChange::Delete(id))) if id == post.id));
    }

    #[tokio::test]
    async fn row_filters_scope_comment_inserts() {
        let backend = MemoryBackend::new();
        let ids = backend.seed_posts(2).await;
        let (first, second) = (ids[0], ids[1]);
        let mut comments = Subscription::<Comment>::open(
            &backend,
            EventFilter::All,
            Some(RowFilter::eq("post_id", second)),
        )
        .await
        .unwrap();

        for post_id in [first, second] {
            backend
                .insert_comment(&NewComment {
                    post_id,
                    author: "a".to_owned(),
                    content: CommentBody::new("hi").unwrap(),
                })
                .await
                .unwrap();
        }

        match comments.next().await {
            Some(Ok(RowChange::Insert(comment))) => assert_eq!(comment.post_id, second),
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_released() {
        let backend = MemoryBackend::new();
        let subscription = Subscription::<Post>::open(&backend, EventFilter::All, None)
            .await
            .unwrap();
        assert_eq!(backend.live_subscriptions().await, 1);

        drop(subscription);
        assert_eq!(backend.live_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let backend = MemoryBackend::new();
        backend.fail_next(Operation::CountPosts).await;

        assert!(matches!(
            backend.count_posts().await,
            Err(BackendError::Injected("count_posts"))
        ));
        assert_eq!(backend.count_posts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn accounts_and_sessions() {
        let backend = MemoryBackend::new();
        let mut events = backend.auth_events();
        let sign_up = SignUp::new("a@b.c", "alice", "secret1".to_owned(), "secret1").unwrap();

        let session = backend.sign_up(&sign_up).await.unwrap().unwrap();
        assert_eq!(session.user.author_label(), "alice");
        assert!(events.recv().await.unwrap().session.is_some());

        backend.sign_out().await.unwrap();
        assert_eq!(backend.current_session().await.unwrap(), None);

        let wrong = Credentials::new("a@b.c", "nope".to_owned()).unwrap();
        assert!(matches!(
            backend.sign_in(&wrong).await,
            Err(BackendError::InvalidCredentials)
        ));
        let right = Credentials::new("a@b.c", "secret1".to_owned()).unwrap();
        assert_eq!(backend.sign_in(&right).await.unwrap().user, session.user);
    }

    #[tokio::test]
    async fn uploads_get_public_urls() {
        let backend = MemoryBackend::new();
        backend
            .upload("post-files", "1-a b.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();

        assert_eq!(
            backend.public_url("post-files", "1-a b.png").unwrap().as_str(),
            "memory://postwall/storage/post-files/1-a%20b.png"
        );
        assert_eq!(
            backend.object("post-files", "1-a b.png").await.unwrap().bytes,
            [1, 2, 3]
        );
        assert!(
            backend
                .upload("post-files", "1-a b.png", Vec::new(), "image/png")
                .await
                .is_err()
        );
    }
}
