//! Client for the hosted backend: PostgREST rows and procedures under
//! `/rest/v1`, objects under `/storage/v1`, accounts under `/auth/v1` and
//! change notifications over the `/realtime/v1` websocket.

mod auth;
mod database;
mod storage;

use crate::{
    change::{ChangeFilter, ChangeStream},
    client::{BackendError, Realtime, Result},
    realtime,
    record::ApiErrorRecord,
};
use async_trait::async_trait;
use postwall_common::model::auth::{AuthEvent, Session};
use reqwest::{Method, RequestBuilder, Response, header::CONTENT_RANGE};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const REALTIME_PROTOCOL_VERSION: &str = "1.0.0";

pub struct RestBackend {
    http: reqwest::Client,
    base_url: Url,
    anon_key: String,
    session: RwLock<Option<Session>>,
    auth_events: broadcast::Sender<AuthEvent>,
    /// Bearer token realtime channels authorize with, kept in step with `session`.
    access_token: watch::Sender<String>,
}

impl RestBackend {
    pub fn new(base_url: Url, anon_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let (auth_events, _) = broadcast::channel(16);
        let access_token = watch::Sender::new(anon_key.clone());

        Ok(Self {
            http,
            base_url,
            anon_key,
            session: RwLock::new(None),
            auth_events,
            access_token,
        })
    }

    /// Adopts a session persisted by an earlier run.
    pub async fn restore_session(&self, session: Option<Session>) {
        self.set_session(session).await;
    }

    async fn set_session(&self, session: Option<Session>) {
        let token = session.as_ref().map_or_else(
            || self.anon_key.clone(),
            |session| session.access_token.expose().to_owned(),
        );
        *self.session.write().await = session;
        self.access_token.send_if_modified(|current| {
            if *current == token {
                return false;
            }
            *current = token;
            true
        });
    }

    /// The stored session as-is, without refreshing it.
    pub async fn stored_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// `prefix` followed by the percent-encoded `segments`.
    fn endpoint_with_segments(&self, prefix: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint(prefix)?;
        url.path_segments_mut()
            .map_err(|()| BackendError::InvalidBaseUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn bearer(&self) -> String {
        self.session.read().await.as_ref().map_or_else(
            || self.anon_key.clone(),
            |session| session.access_token.expose().to_owned(),
        )
    }

    async fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "Backend request");

        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer().await)
    }

    fn realtime_url(&self) -> Result<Url> {
        let mut url = self.endpoint("realtime/v1/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| BackendError::InvalidBaseUrl(self.base_url.clone()))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", REALTIME_PROTOCOL_VERSION);
        Ok(url)
    }

    fn emit_auth(&self, event: AuthEvent) {
        let _ = self.auth_events.send(event);
    }
}

/// Turns non-success replies into [`BackendError::Api`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorRecord>(&body)
        .ok()
        .and_then(ApiErrorRecord::into_message)
        .unwrap_or(body);
    warn!(%status, %message, "Backend request failed");

    Err(BackendError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Total row count from a `Content-Range: 0-4/12` or `*/12` header.
fn content_range_total(response: &Response) -> Result<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit_once('/'))
        .and_then(|(_, total)| total.parse().ok())
        .ok_or(BackendError::MissingCount)
}

#[async_trait]
impl Realtime for RestBackend {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream> {
        let url = self.realtime_url()?;

        Ok(realtime::spawn_channel(
            url,
            filter,
            self.access_token.subscribe(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::rest::RestBackend;
    use postwall_common::model::{
        auth::{AccessToken, RefreshToken, Session},
        user::{User, UserId},
    };
    use time::OffsetDateTime;
    use url::Url;
    use uuid::Uuid;

    #[test]
    fn realtime_url_follows_base_scheme() {
        let backend = RestBackend::new(
            Url::parse("https://demo.example.co/").unwrap(),
            "anon".to_owned(),
        )
        .unwrap();

        assert_eq!(
            backend.realtime_url().unwrap().as_str(),
            "wss://demo.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn object_names_are_encoded() {
        let backend = RestBackend::new(
            Url::parse("http://localhost:54321").unwrap(),
            "anon".to_owned(),
        )
        .unwrap();

        assert_eq!(
            backend
                .endpoint_with_segments("storage/v1/object/public", &["post-files", "1-a b.png"])
                .unwrap()
                .as_str(),
            "http://localhost:54321/storage/v1/object/public/post-files/1-a%20b.png"
        );
    }

    #[tokio::test]
    async fn channel_token_follows_the_session() {
        let backend = RestBackend::new(
            Url::parse("http://localhost:54321").unwrap(),
            "anon".to_owned(),
        )
        .unwrap();
        let tokens = backend.access_token.subscribe();
        assert_eq!(*tokens.borrow(), "anon");

        backend
            .restore_session(Some(Session {
                access_token: AccessToken::new("signed-in".to_owned()),
                refresh_token: RefreshToken::new("refresh".to_owned()),
                expires_at: OffsetDateTime::now_utc(),
                user: User {
                    id: UserId(Uuid::nil()),
                    email: None,
                    display_name: None,
                },
            }))
            .await;
        assert!(tokens.has_changed().unwrap());
        assert_eq!(*tokens.borrow(), "signed-in");

        backend.restore_session(None).await;
        assert_eq!(*tokens.borrow(), "anon");
    }
}
