use crate::model::{Id, user::UserId};
use thiserror::Error;
use time::OffsetDateTime;

pub const POST_TITLE_MAX_LEN: usize = 100;
pub const MAX_ATTACHMENTS: usize = 5;
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: String,
    pub author_id: Option<UserId>,
    pub title: String,
    pub content: String,
    pub file_urls: Vec<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
    pub likes: u64,
    pub comment_count: u64,
    pub views: u64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct NewPost {
    pub author: String,
    pub author_id: Option<UserId>,
    pub content: PostBody,
    pub file_urls: Vec<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct PostEdit {
    pub content: PostBody,
    pub file_urls: Vec<String>,
}

/// Markdown body of a post. Never blank.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct PostBody(String);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The text must not be empty")]
pub struct EmptyContentError;

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum AttachmentError {
    #[error("At most {MAX_ATTACHMENTS} files can be attached")]
    TooMany,
    #[error("The file {name} is larger than the {MAX_ATTACHMENT_BYTES} byte limit")]
    TooLarge { name: String, size: usize },
}

impl PostBody {
    pub fn new(content: String) -> Result<Self, EmptyContentError> {
        if content.trim().is_empty() {
            Err(EmptyContentError)
        } else {
            Ok(Self(content))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// The first line of the body, cut to [`POST_TITLE_MAX_LEN`] characters.
    #[must_use]
    pub fn title(&self) -> String {
        self.0
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(POST_TITLE_MAX_LEN)
            .collect()
    }
}

impl Post {
    #[must_use]
    pub fn is_edited(&self) -> bool {
        self.updated_at.is_some()
    }
}

/// Checks whether one more file of `size` bytes may join `attached` files.
pub fn check_attachment(attached: usize, name: &str, size: usize) -> Result<(), AttachmentError> {
    if attached >= MAX_ATTACHMENTS {
        return Err(AttachmentError::TooMany);
    }
    if size > MAX_ATTACHMENT_BYTES {
        return Err(AttachmentError::TooLarge {
            name: name.to_owned(),
            size,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::model::post::{
        AttachmentError, EmptyContentError, MAX_ATTACHMENT_BYTES, PostBody, check_attachment,
    };

    #[test]
    fn blank_bodies_are_rejected() {
        assert_eq!(PostBody::new(String::new()), Err(EmptyContentError));
        assert_eq!(PostBody::new(" \n\t ".to_owned()), Err(EmptyContentError));
        assert_eq!(
            PostBody::new("  hi  ".to_owned()).unwrap().get(),
            "  hi  ",
            "post bodies keep their whitespace"
        );
    }

    #[test]
    fn title_is_first_line_capped() {
        let body = PostBody::new("# Hello\nsecond line".to_owned()).unwrap();
        assert_eq!(body.title(), "# Hello");

        let long = PostBody::new("가".repeat(150)).unwrap();
        assert_eq!(long.title().chars().count(), 100);
    }

    #[test]
    fn attachment_limits() {
        assert_eq!(check_attachment(0, "a.png", 10), Ok(()));
        assert_eq!(check_attachment(4, "a.png", MAX_ATTACHMENT_BYTES), Ok(()));
        assert_eq!(
            check_attachment(5, "a.png", 10),
            Err(AttachmentError::TooMany)
        );
        assert_eq!(
            check_attachment(1, "big.mov", MAX_ATTACHMENT_BYTES + 1),
            Err(AttachmentError::TooLarge {
                name: "big.mov".to_owned(),
                size: MAX_ATTACHMENT_BYTES + 1
            })
        );
    }
}
