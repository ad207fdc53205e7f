use crate::error::{ClientError, Result};
use postwall_backend::client::Database;
use postwall_common::{
    model::{
        Id,
        post::{Post, PostMarker},
        sort::SortOrder,
    },
    util::{STATS_SUMMARY_LEN, summarize},
};
use tracing::warn;

/// The post leading one of the rankings.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Highlight {
    pub post_id: Id<PostMarker>,
    pub author: String,
    pub summary: String,
    pub count: u64,
}

/// Site-wide numbers. Each figure is loaded on its own and may fail alone.
#[derive(Debug)]
pub struct Stats {
    pub posts: Result<u64>,
    pub comments: Result<u64>,
    pub most_viewed: Result<Option<Highlight>>,
    pub most_liked: Result<Option<Highlight>>,
    pub most_commented: Result<Option<Highlight>>,
}

impl Highlight {
    fn new(post: &Post, sort: SortOrder) -> Self {
        let count = match sort {
            SortOrder::Popular => post.likes,
            SortOrder::Comments => post.comment_count,
            SortOrder::Views => post.views,
            SortOrder::Newest => 0,
        };

        Self {
            post_id: post.id,
            author: post.author.clone(),
            summary: summarize(&post.content, STATS_SUMMARY_LEN),
            count,
        }
    }
}

async fn leader<B: Database + ?Sized>(backend: &B, sort: SortOrder) -> Result<Option<Highlight>> {
    let top = backend.fetch_top_posts(sort, 1).await?;
    Ok(top.first().map(|post| Highlight::new(post, sort)))
}

/// Runs all five queries at once.
pub async fn load_stats<B: Database + ?Sized>(backend: &B) -> Stats {
    let (posts, comments, most_viewed, most_liked, most_commented) = tokio::join!(
        backend.count_posts(),
        backend.count_comments(),
        leader(backend, SortOrder::Views),
        leader(backend, SortOrder::Popular),
        leader(backend, SortOrder::Comments),
    );

    let stats = Stats {
        posts: posts.map_err(Into::into),
        comments: comments.map_err(Into::into),
        most_viewed,
        most_liked,
        most_commented,
    };
    for error in stats.errors() {
        warn!(%error, "Stats query failed");
    }
    stats
}

impl Stats {
    fn errors(&self) -> impl Iterator<Item = &ClientError> {
        [
            self.posts.as_ref().err(),
            self.comments.as_ref().err(),
            self.most_viewed.as_ref().err(),
            self.most_liked.as_ref().err(),
            self.most_commented.as_ref().err(),
        ]
        .into_iter()
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use crate::stats::load_stats;
    use postwall_backend::{
        client::Database,
        memory::{MemoryBackend, Operation},
    };
    use postwall_common::model::{
        Id,
        comment::{CommentBody, NewComment},
    };

    #[tokio::test]
    async fn empty_site_has_no_leaders() {
        let backend = MemoryBackend::new();

        let stats = load_stats(&backend).await;

        assert_eq!(stats.posts.unwrap(), 0);
        assert_eq!(stats.comments.unwrap(), 0);
        assert_eq!(stats.most_viewed.unwrap(), None);
        assert_eq!(stats.most_liked.unwrap(), None);
        assert_eq!(stats.most_commented.unwrap(), None);
    }

    #[tokio::test]
    async fn leaders_and_counts() {
        let backend = MemoryBackend::new();
        let ids = backend.seed_posts(3).await;
        backend.increment_post_likes(ids[1], 4).await.unwrap();
        backend.set_post_views(ids[2], 9).await.unwrap();
        backend.increment_comment_count(ids[0], 1).await.unwrap();
        backend
            .insert_comment(&NewComment {
                post_id: ids[0],
                author: "ada".to_owned(),
                content: CommentBody::new("hi").unwrap(),
            })
            .await
            .unwrap();

        let stats = load_stats(&backend).await;

        assert_eq!(stats.posts.unwrap(), 3);
        assert_eq!(stats.comments.unwrap(), 1);
        let liked = stats.most_liked.unwrap().unwrap();
        assert_eq!((liked.post_id, liked.count), (ids[1], 4));
        assert_eq!(stats.most_viewed.unwrap().unwrap().post_id, ids[2]);
        assert_eq!(stats.most_commented.unwrap().unwrap().post_id, Id::new(1));
    }

    #[tokio::test]
    async fn one_failure_leaves_the_rest() {
        let backend = MemoryBackend::new();
        backend.seed_posts(2).await;
        backend.fail_next(Operation::CountComments).await;

        let stats = load_stats(&backend).await;

        assert!(stats.comments.is_err());
        assert_eq!(stats.posts.unwrap(), 2);
        assert!(stats.most_liked.unwrap().is_some());
    }
}
