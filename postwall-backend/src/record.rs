//! Row and payload shapes as the hosted service reads and writes them.

use crate::change::{Row, Table};
use postwall_common::model::{
    ModelValidationError,
    auth::{AccessToken, RefreshToken, Session},
    comment::{Comment, CommentMarker, NewComment},
    post::{NewPost, Post, PostEdit, PostMarker},
    user::{ANONYMOUS_AUTHOR, DisplayName, User, UserId},
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: i64,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_urls: Option<Vec<String>>,
    #[serde(with = "timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub likes: Option<i64>,
    #[serde(default)]
    pub comment_count: Option<i64>,
    #[serde(default)]
    pub views: Option<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub post_id: i64,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct NewPostRecord<'a> {
    pub author: &'a str,
    pub author_id: Option<Uuid>,
    pub title: String,
    pub content: &'a str,
    pub file_url: Option<&'a str>,
    pub file_urls: &'a [String],
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct PostEditRecord<'a> {
    pub title: String,
    pub content: &'a str,
    pub file_url: Option<&'a str>,
    pub file_urls: &'a [String],
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct ViewsRecord {
    pub views: u64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct NewCommentRecord<'a> {
    pub post_id: i64,
    pub author: &'a str,
    pub content: &'a str,
}

/// Arguments of the `increment_*` remote procedures.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct IncrementArgs {
    pub post_id: i64,
    pub increment_value: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct SessionRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: UserRecord,
}

/// Sign-up answers with a session, or with the bare user when email
/// confirmation is pending.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(untagged)]
pub enum SignUpReply {
    Session(SessionRecord),
    User(UserRecord),
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct ApiErrorRecord {
    #[serde(default, alias = "msg", alias = "error_description")]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

fn counter(value: Option<i64>) -> u64 {
    value.and_then(|value| u64::try_from(value).ok()).unwrap_or(0)
}

fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl From<PostRecord> for Post {
    fn from(value: PostRecord) -> Self {
        let content = value.content.unwrap_or_default();
        let title = value
            .title
            .unwrap_or_else(|| content.lines().next().unwrap_or_default().to_owned());
        // Older rows only carry a single attachment.
        let file_urls = value
            .file_urls
            .unwrap_or_else(|| value.file_url.into_iter().collect());

        Self {
            id: value.id.into(),
            author: value.author.unwrap_or_else(|| ANONYMOUS_AUTHOR.to_owned()),
            author_id: value.author_id.map(UserId),
            title,
            content,
            file_urls,
            created_at: value.created_at,
            updated_at: value.updated_at,
            likes: counter(value.likes),
            comment_count: counter(value.comment_count),
            views: counter(value.views),
        }
    }
}

impl From<&Post> for PostRecord {
    fn from(value: &Post) -> Self {
        Self {
            id: value.id.get(),
            author: Some(value.author.clone()),
            author_id: value.author_id.map(|id| id.0),
            title: Some(value.title.clone()),
            content: Some(value.content.clone()),
            file_url: value.file_urls.first().cloned(),
            file_urls: Some(value.file_urls.clone()),
            created_at: value.created_at,
            updated_at: value.updated_at,
            likes: Some(signed(value.likes)),
            comment_count: Some(signed(value.comment_count)),
            views: Some(signed(value.views)),
        }
    }
}

impl From<CommentRecord> for Comment {
    fn from(value: CommentRecord) -> Self {
        Self {
            id: value.id.into(),
            post_id: value.post_id.into(),
            author: value.author.unwrap_or_else(|| ANONYMOUS_AUTHOR.to_owned()),
            content: value.content.unwrap_or_default(),
            created_at: value.created_at,
        }
    }
}

impl From<&Comment> for CommentRecord {
    fn from(value: &Comment) -> Self {
        Self {
            id: value.id.get(),
            post_id: value.post_id.get(),
            author: Some(value.author.clone()),
            content: Some(value.content.clone()),
            created_at: value.created_at,
        }
    }
}

impl<'a> From<&'a NewPost> for NewPostRecord<'a> {
    fn from(value: &'a NewPost) -> Self {
        Self {
            author: &value.author,
            author_id: value.author_id.map(|id| id.0),
            title: value.content.title(),
            content: value.content.get(),
            file_url: value.file_urls.first().map(String::as_str),
            file_urls: &value.file_urls,
        }
    }
}

impl<'a> PostEditRecord<'a> {
    #[must_use]
    pub fn new(edit: &'a PostEdit, updated_at: OffsetDateTime) -> Self {
        Self {
            title: edit.content.title(),
            content: edit.content.get(),
            file_url: edit.file_urls.first().map(String::as_str),
            file_urls: &edit.file_urls,
            updated_at,
        }
    }
}

impl<'a> From<&'a NewComment> for NewCommentRecord<'a> {
    fn from(value: &'a NewComment) -> Self {
        Self {
            post_id: value.post_id.get(),
            author: &value.author,
            content: value.content.get(),
        }
    }
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: UserId(value.id),
            email: value.email,
            display_name: value
                .user_metadata
                .username
                .map(DisplayName::new)
                .transpose()?,
        })
    }
}

impl From<&User> for UserRecord {
    fn from(value: &User) -> Self {
        Self {
            id: value.id.0,
            email: value.email.clone(),
            user_metadata: UserMetadata {
                username: value
                    .display_name
                    .as_ref()
                    .map(|name| name.get().to_owned()),
            },
        }
    }
}

impl SessionRecord {
    pub fn into_session(self, now: OffsetDateTime) -> Result<Session, ModelValidationError> {
        let expires_at = self
            .expires_at
            .and_then(|at| OffsetDateTime::from_unix_timestamp(at).ok())
            .unwrap_or(now + Duration::seconds(self.expires_in));

        Ok(Session {
            access_token: AccessToken::new(self.access_token),
            refresh_token: RefreshToken::new(self.refresh_token),
            expires_at,
            user: self.user.try_into()?,
        })
    }
}

impl ApiErrorRecord {
    #[must_use]
    pub fn into_message(self) -> Option<String> {
        self.message.or(self.error)
    }
}

impl Row for Post {
    type Marker = PostMarker;
    type Record = PostRecord;

    const TABLE: Table = Table::Posts;

    fn from_record(record: Self::Record) -> Result<Self, ModelValidationError> {
        Ok(record.into())
    }
}

impl Row for Comment {
    type Marker = CommentMarker;
    type Record = CommentRecord;

    const TABLE: Table = Table::Comments;

    fn from_record(record: Self::Record) -> Result<Self, ModelValidationError> {
        Ok(record.into())
    }
}

/// RFC 3339 timestamps. Columns without a time zone are read as UTC.
mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use time::{
        OffsetDateTime, PrimitiveDateTime, format_description::well_known::Rfc3339,
        macros::format_description,
    };

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        time::serde::rfc3339::serialize(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).ok_or_else(|| D::Error::custom(format!("invalid timestamp {text:?}")))
    }

    fn parse(text: &str) -> Option<OffsetDateTime> {
        if let Ok(value) = OffsetDateTime::parse(text, &Rfc3339) {
            return Some(value);
        }

        let naive = format_description!(
            version = 2,
            "[year]-[month]-[day][first [T] [ ]][hour]:[minute]:[second][optional [.[subsecond]]]"
        );
        PrimitiveDateTime::parse(text, naive)
            .ok()
            .map(PrimitiveDateTime::assume_utc)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::OffsetDateTime;

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            value: &Option<OffsetDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            time::serde::rfc3339::option::serialize(value, serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<OffsetDateTime>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "crate::record::timestamp")] OffsetDateTime);

            let value = Option::<Wrapper>::deserialize(deserializer)?;
            Ok(value.map(|Wrapper(value)| value))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::record::{PostRecord, SignUpReply};
    use postwall_common::model::post::Post;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn post_rows_with_gaps() {
        let record: PostRecord = serde_json::from_value(json!({
            "id": 3,
            "content": "first line\nsecond",
            "file_url": "https://cdn.example/a.png",
            "created_at": "2025-04-18T09:12:33.123456+00:00",
            "likes": null,
            "views": 4
        }))
        .unwrap();
        let post = Post::from(record);

        assert_eq!(post.id.get(), 3);
        assert_eq!(post.author, "Anonymous");
        assert_eq!(post.title, "first line");
        assert_eq!(post.file_urls, ["https://cdn.example/a.png"]);
        assert_eq!(post.likes, 0);
        assert_eq!(post.views, 4);
        assert_eq!(post.updated_at, None);
        assert_eq!(
            post.created_at,
            datetime!(2025-04-18 09:12:33.123456 UTC)
        );
    }

    #[test]
    fn timestamps_without_offset_are_utc() {
        let record: PostRecord = serde_json::from_value(json!({
            "id": 1,
            "created_at": "2025-04-18T09:12:33.5",
            "updated_at": "2025-04-18 10:00:00"
        }))
        .unwrap();

        assert_eq!(record.created_at, datetime!(2025-04-18 09:12:33.5 UTC));
        assert_eq!(record.updated_at, Some(datetime!(2025-04-18 10:00:00 UTC)));
    }

    #[test]
    fn sign_up_reply_shapes() {
        let user = json!({ "id": "6f1c2f8e-4f37-4bd4-9a43-3f9e7d1c0c11", "email": "a@b.c" });

        let pending: SignUpReply = serde_json::from_value(user.clone()).unwrap();
        assert!(matches!(pending, SignUpReply::User(_)));

        let confirmed: SignUpReply = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": user
        }))
        .unwrap();
        assert!(matches!(confirmed, SignUpReply::Session(_)));
    }
}
