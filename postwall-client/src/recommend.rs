use postwall_backend::client::Database;
use postwall_common::{
    model::{
        Id,
        post::{Post, PostMarker},
        sort::SortOrder,
    },
    util::{RECOMMENDATION_SUMMARY_LEN, summarize},
};
use tracing::warn;

pub const RECOMMENDATION_LIMIT: u64 = 5;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Recommendation {
    pub post_id: Id<PostMarker>,
    pub author: String,
    pub summary: String,
    pub likes: u64,
    pub comment_count: u64,
    pub views: u64,
}

impl From<&Post> for Recommendation {
    fn from(value: &Post) -> Self {
        Self {
            post_id: value.id,
            author: value.author.clone(),
            summary: summarize(&value.content, RECOMMENDATION_SUMMARY_LEN),
            likes: value.likes,
            comment_count: value.comment_count,
            views: value.views,
        }
    }
}

/// The most liked posts. Empty when they cannot be loaded.
pub async fn recommendations<B: Database + ?Sized>(backend: &B) -> Vec<Recommendation> {
    match backend
        .fetch_top_posts(SortOrder::Popular, RECOMMENDATION_LIMIT)
        .await
    {
        Ok(posts) => posts.iter().map(Recommendation::from).collect(),
        Err(error) => {
            warn!(%error, "Could not load recommendations");
            Vec::new()
        }
    }
}
