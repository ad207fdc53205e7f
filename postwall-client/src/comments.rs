use crate::error::Result;
use postwall_backend::{
    change::{ChangeKind, EventFilter, RowChange, RowFilter, Subscription},
    client::Backend,
};
use postwall_common::model::{
    Id,
    comment::{Comment, CommentBody, NewComment},
    post::PostMarker,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// The comments under one post, oldest first, growing with live inserts.
pub struct CommentThread<B: Backend + ?Sized> {
    backend: Arc<B>,
    post_id: Id<PostMarker>,
    comments: Vec<Comment>,
    inserts: Subscription<Comment>,
}

impl<B: Backend + ?Sized> CommentThread<B> {
    pub async fn open(backend: Arc<B>, post_id: Id<PostMarker>) -> Result<Self> {
        // Subscribe before fetching so no insert falls between the two.
        let inserts = Subscription::open(
            backend.as_ref(),
            EventFilter::Only(ChangeKind::Insert),
            Some(RowFilter::eq("post_id", post_id)),
        )
        .await?;
        let comments = backend.fetch_comments(post_id).await?;

        Ok(Self {
            backend,
            post_id,
            comments,
            inserts,
        })
    }

    #[must_use]
    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    /// Waits for a comment that is not shown yet and appends it.
    pub async fn next_comment(&mut self) -> Option<Result<&Comment>> {
        loop {
            match self.inserts.next().await? {
                Ok(RowChange::Insert(comment)) => {
                    if self.append(comment) {
                        return self.comments.last().map(Ok);
                    }
                }
                Ok(_) => {}
                Err(error) => return Some(Err(error.into())),
            }
        }
    }

    /// Posts a comment and shows it right away. The post's comment count is
    /// bumped afterwards on a best-effort basis.
    #[instrument(skip(self, text), fields(post_id = %self.post_id))]
    pub async fn submit(&mut self, text: &str, author: &str) -> Result<Comment> {
        let content = CommentBody::new(text)?;
        let comment = self
            .backend
            .insert_comment(&NewComment {
                post_id: self.post_id,
                author: author.to_owned(),
                content,
            })
            .await?;
        info!(id = %comment.id, "Comment added");
        self.append(comment.clone());

        if let Err(error) = self.backend.increment_comment_count(self.post_id, 1).await {
            warn!(%error, "Comment count was not updated");
        }

        Ok(comment)
    }

    fn append(&mut self, comment: Comment) -> bool {
        if comment.post_id != self.post_id || self.comments.iter().any(|c| c.id == comment.id) {
            return false;
        }
        self.comments.push(comment);
        true
    }
}
