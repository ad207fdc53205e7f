use crate::error::{ClientError, Result};
use postwall_backend::{
    change::{ChangeKind, EventFilter, RowChange, RowFilter, Subscription},
    client::{Backend, Database},
};
use postwall_common::model::{
    Id,
    post::{Post, PostMarker},
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// One post opened on its own, kept current by row updates.
pub struct PostDetail<B: Backend + ?Sized> {
    backend: Arc<B>,
    post: Post,
    updates: Subscription<Post>,
}

impl<B: Backend + ?Sized + 'static> PostDetail<B> {
    /// Fetches the post and counts the view in the background.
    #[instrument(skip(backend))]
    pub async fn open(backend: Arc<B>, id: Id<PostMarker>) -> Result<Self> {
        let updates = Subscription::open(
            backend.as_ref(),
            EventFilter::Only(ChangeKind::Update),
            Some(RowFilter::eq("id", id)),
        )
        .await?;
        let post = backend
            .fetch_post(id)
            .await?
            .ok_or(ClientError::PostNotFound(id))?;

        // Read-modify-write: concurrent views may overwrite each other.
        let views = post.views + 1;
        let counter = Arc::clone(&backend);
        tokio::spawn(async move {
            if let Err(error) = counter.set_post_views(id, views).await {
                warn!(%id, %error, "Could not count view");
            }
        });

        Ok(Self {
            backend,
            post,
            updates,
        })
    }

    #[must_use]
    pub fn post(&self) -> &Post {
        &self.post
    }

    /// Waits for the next update of the post and replaces it wholesale.
    pub async fn next_update(&mut self) -> Option<Result<&Post>> {
        loop {
            match self.updates.next().await? {
                Ok(RowChange::Update(post)) if post.id == self.post.id => {
                    debug!(id = %post.id, "Post updated");
                    self.post = post;
                    return Some(Ok(&self.post));
                }
                Ok(_) => {}
                Err(error) => return Some(Err(error.into())),
            }
        }
    }

    /// Optimistic like without rollback.
    pub async fn like(&mut self) -> Result<()> {
        self.post.likes += 1;
        self.backend.increment_post_likes(self.post.id, 1).await?;
        Ok(())
    }
}

/// Likes a post without opening it, so no view is counted. Returns the post
/// as it looks with the like added.
#[instrument(skip(backend))]
pub async fn like_post<B: Database + ?Sized>(backend: &B, id: Id<PostMarker>) -> Result<Post> {
    let mut post = backend
        .fetch_post(id)
        .await?
        .ok_or(ClientError::PostNotFound(id))?;

    backend.increment_post_likes(id, 1).await?;
    post.likes += 1;
    Ok(post)
}

#[cfg(test)]
mod tests {
    use crate::{
        detail::{PostDetail, like_post},
        error::ClientError,
    };
    use postwall_backend::{
        client::Database,
        memory::{MemoryBackend, Operation},
    };
    use postwall_common::model::{
        Id,
        post::{PostBody, PostEdit},
    };
    use std::{sync::Arc, time::Duration};

    #[tokio::test]
    async fn missing_post_is_not_found() {
        let backend = Arc::new(MemoryBackend::new());

        let result = PostDetail::open(backend, Id::new(4)).await;

        assert!(matches!(result, Err(ClientError::PostNotFound(id)) if id == Id::new(4)));
    }

    #[tokio::test]
    async fn opening_counts_a_view() {
        let backend = Arc::new(MemoryBackend::new());
        let id = backend.seed_posts(1).await[0];

        let mut detail = PostDetail::open(Arc::clone(&backend), id).await.unwrap();
        assert_eq!(detail.post().views, 0);

        let updated = tokio::time::timeout(Duration::from_secs(5), detail.next_update())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(updated.views, 1);
        assert_eq!(backend.post(id).await.unwrap().views, 1);
    }

    #[tokio::test]
    async fn failed_view_count_is_harmless() {
        let backend = Arc::new(MemoryBackend::new());
        let id = backend.seed_posts(1).await[0];
        backend.fail_next(Operation::SetPostViews).await;

        let detail = PostDetail::open(Arc::clone(&backend), id).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(detail.post().content, "post 1");
    }

    #[tokio::test]
    async fn edits_replace_the_post() {
        let backend = Arc::new(MemoryBackend::new());
        let ids = backend.seed_posts(2).await;
        let mut detail = PostDetail::open(Arc::clone(&backend), ids[0]).await.unwrap();
        // The view counter's update comes first.
        detail.next_update().await.unwrap().unwrap();

        backend
            .update_post(
                ids[1],
                &PostEdit {
                    content: PostBody::new("other".to_owned()).unwrap(),
                    file_urls: Vec::new(),
                },
            )
            .await
            .unwrap();
        backend
            .update_post(
                ids[0],
                &PostEdit {
                    content: PostBody::new("edited\nbody".to_owned()).unwrap(),
                    file_urls: vec!["memory://a.png".to_owned()],
                },
            )
            .await
            .unwrap();

        let post = detail.next_update().await.unwrap().unwrap();
        assert_eq!(post.content, "edited\nbody");
        assert_eq!(post.title, "edited");
        assert!(post.is_edited());
    }

    #[tokio::test]
    async fn like_is_optimistic() {
        let backend = Arc::new(MemoryBackend::new());
        let id = backend.seed_posts(1).await[0];
        let mut detail = PostDetail::open(Arc::clone(&backend), id).await.unwrap();

        backend.fail_next(Operation::IncrementPostLikes).await;
        assert!(detail.like().await.is_err());
        assert_eq!(detail.post().likes, 1);
    }

    #[tokio::test]
    async fn liking_without_opening_counts_no_view() {
        let backend = MemoryBackend::new();
        let id = backend.seed_posts(1).await[0];

        let liked = like_post(&backend, id).await.unwrap();

        assert_eq!(liked.likes, 1);
        let stored = backend.post(id).await.unwrap();
        assert_eq!(stored.likes, 1);
        assert_eq!(stored.views, 0);
        assert!(matches!(
            like_post(&backend, Id::new(9)).await,
            Err(ClientError::PostNotFound(_))
        ));
    }
}
