//! Writing and editing posts, including attachment uploads.

use crate::error::{ClientError, Result};
use postwall_backend::client::{Database, Storage};
use postwall_common::model::{
    Id,
    post::{AttachmentError, NewPost, Post, PostBody, PostEdit, PostMarker, check_attachment},
    user::UserId,
};
use std::path::Path;
use time::OffsetDateTime;
use tracing::{info, instrument};

pub const POST_FILES_BUCKET: &str = "post-files";

/// A file picked for upload.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct PostDraft {
    body: String,
    kept_urls: Vec<String>,
    files: Vec<Attachment>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let content_type = content_type_for(&name).to_owned();
        Self {
            name,
            content_type,
            bytes,
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map_or_else(|| "file".to_owned(), |name| name.to_string_lossy().into_owned());
        Ok(Self::new(name, bytes))
    }
}

fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt" | "md") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Object name of an upload: the upload time in unix milliseconds, then the file name.
fn object_name(now: OffsetDateTime, file_name: &str) -> String {
    format!("{}-{file_name}", now.unix_timestamp_nanos() / 1_000_000)
}

impl PostDraft {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Starts from an existing post, keeping its attachments.
    #[must_use]
    pub fn editing(post: &Post) -> Self {
        Self {
            body: post.content.clone(),
            kept_urls: post.file_urls.clone(),
            files: Vec::new(),
        }
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.kept_urls.len() + self.files.len()
    }

    /// Adds a file if it stays within the attachment limits.
    pub fn attach(&mut self, file: Attachment) -> Result<(), AttachmentError> {
        check_attachment(self.attachment_count(), &file.name, file.bytes.len())?;
        self.files.push(file);
        Ok(())
    }

    /// Drops an attachment the post already had.
    pub fn remove_kept(&mut self, url: &str) -> bool {
        let before = self.kept_urls.len();
        self.kept_urls.retain(|kept| kept != url);
        self.kept_urls.len() != before
    }

    /// Uploads the new files and returns all attachment URLs, kept ones first.
    async fn upload_files<B: Storage + ?Sized>(&self, backend: &B) -> Result<Vec<String>> {
        let mut urls = self.kept_urls.clone();
        for file in &self.files {
            let name = object_name(OffsetDateTime::now_utc(), &file.name);
            backend
                .upload(POST_FILES_BUCKET, &name, file.bytes.clone(), &file.content_type)
                .await?;
            urls.push(backend.public_url(POST_FILES_BUCKET, &name)?.to_string());
        }
        Ok(urls)
    }

    #[instrument(skip_all, fields(files = self.files.len()))]
    pub async fn publish<B>(self, backend: &B, author: &str, author_id: Option<UserId>) -> Result<Post>
    where
        B: Database + Storage + ?Sized,
    {
        let content = PostBody::new(self.body.clone())?;
        let file_urls = self.upload_files(backend).await?;

        let post = backend
            .insert_post(&NewPost {
                author: author.to_owned(),
                author_id,
                content,
                file_urls,
            })
            .await?;
        info!(id = %post.id, "Published post");

        Ok(post)
    }

    #[instrument(skip(self, backend), fields(files = self.files.len()))]
    pub async fn save_edit<B>(self, backend: &B, id: Id<PostMarker>) -> Result<Post>
    where
        B: Database + Storage + ?Sized,
    {
        let content = PostBody::new(self.body.clone())?;
        let file_urls = self.upload_files(backend).await?;

        let post = backend
            .update_post(id, &PostEdit { content, file_urls })
            .await?
            .ok_or(ClientError::PostNotFound(id))?;
        info!("Edited post");

        Ok(post)
    }
}
