//! Phoenix channel client for the realtime websocket.

use crate::change::{ChangeFilter, ChangeKind, ChangeStream, RawChange};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
enum ChannelError {
    #[error(transparent)]
    Socket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Malformed channel message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("The channel rejected the subscription: {0}")]
    Rejected(String),
    #[error("The socket was closed by the server")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(Box::new(value))
    }
}

#[derive(Serialize)]
struct Outgoing<'a> {
    topic: &'a str,
    event: &'a str,
    payload: Value,
    #[serde(rename = "ref")]
    reference: String,
}

#[derive(Deserialize)]
struct Incoming {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct ChangesPayload {
    data: ChangeData,
}

#[derive(Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Value,
    #[serde(default)]
    old_record: Value,
}

#[derive(Deserialize)]
struct ReplyPayload {
    status: String,
    #[serde(default)]
    response: Value,
}

/// What one incoming frame means for the channel.
#[derive(Debug, PartialEq)]
enum Frame {
    Change(RawChange),
    Ignored,
}

/// Runs the channel in the background until the returned stream is dropped.
///
/// Every join authorizes with the latest value of `access_token`, and a
/// token change while joined is forwarded to the server.
pub(crate) fn spawn_channel(
    url: Url,
    filter: ChangeFilter,
    access_token: watch::Receiver<String>,
) -> ChangeStream {
    let (changes, receiver) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    tokio::spawn(run(url, filter, access_token, changes, cancel.clone()));

    ChangeStream::new(receiver, Some(cancel.drop_guard()))
}

async fn run(
    url: Url,
    filter: ChangeFilter,
    mut access_token: watch::Receiver<String>,
    changes: mpsc::UnboundedSender<RawChange>,
    cancel: CancellationToken,
) {
    let topic = format!("realtime:public:{}", filter.table.name());

    loop {
        let channel = Channel {
            url: &url,
            topic: &topic,
            filter: &filter,
            changes: &changes,
            cancel: &cancel,
        };
        match channel.serve(&mut access_token).await {
            Ok(()) => {
                debug!(%topic, "Realtime channel released");
                return;
            }
            Err(error) => warn!(%topic, %error, "Realtime channel failed, reconnecting"),
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = changes.closed() => return,
            () = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

struct Channel<'a> {
    url: &'a Url,
    topic: &'a str,
    filter: &'a ChangeFilter,
    changes: &'a mpsc::UnboundedSender<RawChange>,
    cancel: &'a CancellationToken,
}

impl Channel<'_> {
    /// One connection's lifetime. `Ok` means the subscriber went away.
    async fn serve(
        &self,
        access_token: &mut watch::Receiver<String>,
    ) -> Result<(), ChannelError> {
        let (socket, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = socket.split();
        let mut next_ref = 0_u64;
        let mut message = |topic: &str, event: &str, payload: Value| {
            next_ref += 1;
            serde_json::to_string(&Outgoing {
                topic,
                event,
                payload,
                reference: next_ref.to_string(),
            })
        };

        let join = message(self.topic, "phx_join", rejoin_payload(self.filter, access_token))?;
        sink.send(Message::text(join)).await?;
        info!(topic = self.topic, filter = ?self.filter.realtime_filter(), "Joined realtime channel");

        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );
        // Without a sender the token never changes again.
        let mut tokens_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = self.changes.closed() => break,
                changed = access_token.changed(), if tokens_open => {
                    if changed.is_err() {
                        tokens_open = false;
                        continue;
                    }
                    let token = access_token.borrow_and_update().clone();
                    let update = message(self.topic, "access_token", token_payload(&token))?;
                    sink.send(Message::text(update)).await?;
                    debug!(topic = self.topic, "Sent refreshed access token");
                }
                _ = heartbeat.tick() => {
                    let beat = message("phoenix", "heartbeat", json!({}))?;
                    sink.send(Message::text(beat)).await?;
                }
                incoming = stream.next() => {
                    let Some(incoming) = incoming else {
                        return Err(ChannelError::Closed);
                    };
                    match incoming? {
                        Message::Text(text) => {
                            if let Frame::Change(change) = parse_frame(text.as_str())? {
                                // A closed receiver ends the loop on the next turn.
                                let _ = self.changes.send(change);
                            }
                        }
                        Message::Close(_) => return Err(ChannelError::Closed),
                        _ => {}
                    }
                }
            }
        }

        let leave = message(self.topic, "phx_leave", json!({}))?;
        // Best effort, the server also drops channels of closed sockets.
        let _ = sink.send(Message::text(leave)).await;
        let _ = sink.close().await;

        Ok(())
    }
}

fn join_payload(filter: &ChangeFilter, access_token: &str) -> Value {
    let mut change = json!({
        "event": filter.events.as_str(),
        "schema": "public",
        "table": filter.table.name(),
    });
    if let Some(row) = filter.realtime_filter() {
        change["filter"] = Value::String(row);
    }

    json!({
        "config": { "postgres_changes": [change] },
        "access_token": access_token,
    })
}

/// Join payload for the current token, marking that token as seen.
fn rejoin_payload(filter: &ChangeFilter, access_token: &mut watch::Receiver<String>) -> Value {
    join_payload(filter, &access_token.borrow_and_update())
}

fn token_payload(access_token: &str) -> Value {
    json!({ "access_token": access_token })
}

fn parse_frame(text: &str) -> Result<Frame, ChannelError> {
    let incoming: Incoming = serde_json::from_str(text)?;

    match incoming.event.as_str() {
        "postgres_changes" => {
            let payload: ChangesPayload = serde_json::from_value(incoming.payload)?;
            Ok(Frame::Change(RawChange {
                kind: payload.data.kind,
                record: payload.data.record,
                old_record: payload.data.old_record,
            }))
        }
        "phx_reply" => {
            let reply: ReplyPayload = serde_json::from_value(incoming.payload)?;
            if reply.status == "ok" {
                Ok(Frame::Ignored)
            } else {
                Err(ChannelError::Rejected(reply.response.to_string()))
            }
        }
        "phx_error" => Err(ChannelError::Rejected(incoming.payload.to_string())),
        "phx_close" => Err(ChannelError::Closed),
        _ => Ok(Frame::Ignored),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        change::{ChangeFilter, ChangeKind, EventFilter, RawChange, RowFilter, Table},
        realtime::{ChannelError, Frame, join_payload, parse_frame, rejoin_payload, token_payload},
    };
    use serde_json::json;
    use tokio::sync::watch;

    #[test]
    fn join_carries_the_filter() {
        let filter = ChangeFilter::new(
            Table::Comments,
            EventFilter::Only(ChangeKind::Insert),
            Some(RowFilter::eq("post_id", 7)),
        );

        assert_eq!(
            join_payload(&filter, "token"),
            json!({
                "config": {
                    "postgres_changes": [{
                        "event": "INSERT",
                        "schema": "public",
                        "table": "comments",
                        "filter": "post_id=eq.7",
                    }],
                },
                "access_token": "token",
            })
        );
    }

    #[test]
    fn unfiltered_join_has_no_filter_key() {
        let filter = ChangeFilter::new(Table::Posts, EventFilter::All, None);
        let payload = join_payload(&filter, "token");

        assert_eq!(payload["config"]["postgres_changes"][0]["event"], "*");
        assert!(payload["config"]["postgres_changes"][0].get("filter").is_none());
    }

    #[test]
    fn rejoin_uses_the_latest_token() {
        let filter = ChangeFilter::new(Table::Posts, EventFilter::All, None);
        let (tokens, mut access_token) = watch::channel("expired".to_owned());

        assert_eq!(rejoin_payload(&filter, &mut access_token)["access_token"], "expired");

        tokens.send("refreshed".to_owned()).unwrap();
        assert!(access_token.has_changed().unwrap());
        assert_eq!(rejoin_payload(&filter, &mut access_token)["access_token"], "refreshed");
        // Joining with it means there is nothing left to forward.
        assert!(!access_token.has_changed().unwrap());
        assert_eq!(token_payload("refreshed"), json!({ "access_token": "refreshed" }));
    }

    #[test]
    fn change_frames_decode() {
        let frame = parse_frame(
            &json!({
                "topic": "realtime:public:posts",
                "event": "postgres_changes",
                "ref": null,
                "payload": {
                    "ids": [1],
                    "data": {
                        "schema": "public",
                        "table": "posts",
                        "type": "DELETE",
                        "old_record": { "id": 4 },
                    },
                },
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(
            frame,
            Frame::Change(RawChange {
                kind: ChangeKind::Delete,
                record: serde_json::Value::Null,
                old_record: json!({ "id": 4 }),
            })
        );
    }

    #[test]
    fn replies_and_errors() {
        let ok = json!({ "event": "phx_reply", "payload": { "status": "ok", "response": {} } });
        let rejected = json!({
            "event": "phx_reply",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } },
        });

        assert_eq!(parse_frame(&ok.to_string()).unwrap(), Frame::Ignored);
        assert!(matches!(
            parse_frame(&rejected.to_string()),
            Err(ChannelError::Rejected(reason)) if reason.contains("unauthorized")
        ));
        assert_eq!(
            parse_frame(&json!({ "event": "presence_state", "payload": {} }).to_string()).unwrap(),
            Frame::Ignored
        );
    }
}
