use crate::{
    client::{BackendError, Database, Result},
    record::{
        CommentRecord, IncrementArgs, NewCommentRecord, NewPostRecord, PostEditRecord, PostRecord,
        ViewsRecord,
    },
    rest::{RestBackend, check, content_range_total},
};
use async_trait::async_trait;
use postwall_common::model::{
    Id,
    comment::{Comment, NewComment},
    page::{Page, PageRange},
    post::{NewPost, Post, PostEdit, PostMarker},
    sort::SortOrder,
};
use reqwest::{Method, RequestBuilder};
use serde::{Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use tracing::{debug, instrument};

const POSTS: &str = "rest/v1/posts";
const COMMENTS: &str = "rest/v1/comments";

fn order_by(sort: SortOrder) -> String {
    format!("{}.desc,id.desc", sort.column())
}

fn id_eq(id: Id<PostMarker>) -> String {
    format!("eq.{id}")
}

/// `ilike` pattern with the characters that end a quoted filter value escaped.
fn search_filter(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('"', "\\\"");
    format!("(content.ilike.\"%{escaped}%\",author.ilike.\"%{escaped}%\")")
}

async fn rows<T: DeserializeOwned>(request: RequestBuilder) -> Result<Vec<T>> {
    let response = check(request.send().await?).await?;
    Ok(response.json().await?)
}

/// Writes and reads back the affected rows.
async fn write<T, B>(request: RequestBuilder, body: &B) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    B: Serialize + Sync + ?Sized,
{
    rows(
        request
            .header("Prefer", "return=representation")
            .json(body),
    )
    .await
}

impl RestBackend {
    async fn table(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.request(method, self.endpoint(path)?).await)
    }

    async fn count(&self, path: &str) -> Result<u64> {
        let request = self
            .table(Method::HEAD, path)
            .await?
            .query(&[("select", "id")])
            .header("Prefer", "count=exact");
        let response = check(request.send().await?).await?;

        content_range_total(&response)
    }

    async fn rpc(&self, procedure: &str, args: IncrementArgs) -> Result<()> {
        let url = self.endpoint_with_segments("rest/v1/rpc", &[procedure])?;
        let request = self.request(Method::POST, url).await.json(&args);
        check(request.send().await?).await?;

        Ok(())
    }
}

#[async_trait]
impl Database for RestBackend {
    #[instrument(skip(self))]
    async fn fetch_posts_page(&self, sort: SortOrder, range: PageRange) -> Result<Page<Post>> {
        let request = self
            .table(Method::GET, POSTS)
            .await?
            .query(&[("select", "*".to_owned()), ("order", order_by(sort))])
            .query(&[("offset", range.from), ("limit", range.size())])
            .header("Prefer", "count=exact");
        let response = check(request.send().await?).await?;
        let total = content_range_total(&response)?;
        let rows: Vec<PostRecord> = response.json().await?;
        debug!(rows = rows.len(), total, "Fetched posts page");

        Ok(Page {
            rows: rows.into_iter().map(Post::from).collect(),
            total,
        })
    }

    async fn fetch_post(&self, id: Id<PostMarker>) -> Result<Option<Post>> {
        let request = self
            .table(Method::GET, POSTS)
            .await?
            .query(&[("select", "*".to_owned()), ("id", id_eq(id))]);
        let rows: Vec<PostRecord> = rows(request).await?;

        Ok(rows.into_iter().next().map(Post::from))
    }

    async fn fetch_top_posts(&self, sort: SortOrder, limit: u64) -> Result<Vec<Post>> {
        let request = self
            .table(Method::GET, POSTS)
            .await?
            .query(&[("select", "*".to_owned()), ("order", order_by(sort))])
            .query(&[("limit", limit)]);
        let rows: Vec<PostRecord> = rows(request).await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    #[instrument(skip(self))]
    async fn search_posts(&self, term: &str, limit: u64) -> Result<Vec<Post>> {
        let request = self
            .table(Method::GET, POSTS)
            .await?
            .query(&[
                ("select", "*".to_owned()),
                ("or", search_filter(term)),
                ("order", order_by(SortOrder::Newest)),
            ])
            .query(&[("limit", limit)]);
        let rows: Vec<PostRecord> = rows(request).await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn count_posts(&self) -> Result<u64> {
        self.count(POSTS).await
    }

    async fn count_comments(&self) -> Result<u64> {
        self.count(COMMENTS).await
    }

    #[instrument(skip_all)]
    async fn insert_post(&self, post: &NewPost) -> Result<Post> {
        let request = self.table(Method::POST, POSTS).await?;
        let rows: Vec<PostRecord> = write(request, &NewPostRecord::from(post)).await?;

        rows.into_iter()
            .next()
            .map(Post::from)
            .ok_or(BackendError::EmptyReply)
    }

    #[instrument(skip(self, edit))]
    async fn update_post(&self, id: Id<PostMarker>, edit: &PostEdit) -> Result<Option<Post>> {
        let request = self
            .table(Method::PATCH, POSTS)
            .await?
            .query(&[("id", id_eq(id))]);
        let body = PostEditRecord::new(edit, OffsetDateTime::now_utc());
        let rows: Vec<PostRecord> = write(request, &body).await?;

        Ok(rows.into_iter().next().map(Post::from))
    }

    async fn set_post_views(&self, id: Id<PostMarker>, views: u64) -> Result<()> {
        let request = self
            .table(Method::PATCH, POSTS)
            .await?
            .query(&[("id", id_eq(id))])
            .json(&ViewsRecord { views });
        check(request.send().await?).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_post(&self, id: Id<PostMarker>) -> Result<()> {
        let request = self
            .table(Method::DELETE, POSTS)
            .await?
            .query(&[("id", id_eq(id))]);
        check(request.send().await?).await?;

        Ok(())
    }

    async fn increment_post_likes(&self, id: Id<PostMarker>, delta: i64) -> Result<()> {
        self.rpc(
            "increment_post_likes",
            IncrementArgs {
                post_id: id.get(),
                increment_value: delta,
            },
        )
        .await
    }

    async fn increment_comment_count(&self, id: Id<PostMarker>, delta: i64) -> Result<()> {
        self.rpc(
            "increment_comment_count",
            IncrementArgs {
                post_id: id.get(),
                increment_value: delta,
            },
        )
        .await
    }

    async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        let request = self.table(Method::GET, COMMENTS).await?.query(&[
            ("select", "*".to_owned()),
            ("post_id", id_eq(post_id)),
            ("order", "created_at.asc,id.asc".to_owned()),
        ]);
        let rows: Vec<CommentRecord> = rows(request).await?;

        Ok(rows.into_iter().map(Comment::from).collect())
    }

    #[instrument(skip_all)]
    async fn insert_comment(&self, comment: &NewComment) -> Result<Comment> {
        let request = self.table(Method::POST, COMMENTS).await?;
        let rows: Vec<CommentRecord> = write(request, &NewCommentRecord::from(comment)).await?;

        rows.into_iter()
            .next()
            .map(Comment::from)
            .ok_or(BackendError::EmptyReply)
    }
}
