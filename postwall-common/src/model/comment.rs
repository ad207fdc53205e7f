use crate::model::{
    Id,
    post::{EmptyContentError, PostMarker},
};
use time::OffsetDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post_id: Id<PostMarker>,
    pub author: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct NewComment {
    pub post_id: Id<PostMarker>,
    pub author: String,
    pub content: CommentBody,
}

/// Trimmed, non-empty comment text.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct CommentBody(String);

impl CommentBody {
    pub fn new(content: &str) -> Result<Self, EmptyContentError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            Err(EmptyContentError)
        } else {
            Ok(Self(trimmed.to_owned()))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{comment::CommentBody, post::EmptyContentError};

    #[test]
    fn comment_body_is_trimmed() {
        assert_eq!(CommentBody::new("  nice post \n").unwrap().get(), "nice post");
        assert_eq!(CommentBody::new("   "), Err(EmptyContentError));
        assert_eq!(CommentBody::new(""), Err(EmptyContentError));
    }
}
