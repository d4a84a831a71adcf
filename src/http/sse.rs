//! The three SSE channels spec.md \S6 names: live messages (`/api/sse`),
//! periodic signal/counter snapshots (`/api/signal`), and the log tail
//! (`/api/log`, backed directly by [`crate::logger::Logger`]'s own broadcast
//! channel). Each is "one thread per active SSE connection" in the original;
//! here that's one `tokio` task per connection, reading its own
//! [`tokio::sync::broadcast::Receiver`].

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;

use crate::frame::Tag;
use crate::message::Message;
use crate::stream::Receiver;

use super::AppState;

/// Broadcast hub backing `/api/sse` and `/api/signal`. Subscribers that fall
/// behind silently miss old events (a lagging dashboard tab just jumps
/// forward) rather than blocking the producer, matching the fan-out-and-
/// don't-wait policy `stream::Connection::send` already uses for every
/// other output.
pub struct SseHub {
    messages: broadcast::Sender<String>,
    signal: broadcast::Sender<String>,
}

impl SseHub {
    /// New hub with reasonably deep per-channel backlogs for a
    /// just-connected subscriber.
    #[must_use]
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(256);
        let (signal, _) = broadcast::channel(16);
        Self { messages, signal }
    }

    /// Publish one already-rendered periodic signal/counter snapshot.
    pub fn publish_signal(&self, json: String) {
        let _ = self.signal.send(json);
    }
}

impl Default for SseHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver<Message> for SseHub {
    fn accept(&self, msg: &Message, tag: &Tag) -> crate::error::Result<()> {
        let json = msg.to_peer_json(tag, 0, "aisd", 1);
        // No subscribers is the common case, not an error.
        let _ = self.messages.send(json);
        Ok(())
    }
}

fn event_stream(rx: broadcast::Receiver<String>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|r| r.ok()).map(|json| Ok(Event::default().data(json)))
}

/// `GET /api/sse`: every newly accepted message, as peer JSON.
pub async fn messages_stream(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(event_stream(state.sse.messages.subscribe())).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// `GET /api/signal`: periodic counter/radar snapshots, pushed by whatever
/// drives the daemon's statistics ticker (see `main.rs`).
pub async fn signal_stream(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(event_stream(state.sse.signal.subscribe())).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// `GET /api/log`: the central logger's live feed, prefixed with its
/// existing backlog so a just-opened tab isn't empty.
pub async fn log_stream(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let backlog: Vec<Result<Event, Infallible>> = state
        .logger
        .recent()
        .into_iter()
        .map(|rec| Ok(Event::default().data(serde_json::to_string(&rec).unwrap_or_default())))
        .collect();
    let live = event_stream_from_log(state.logger.subscribe());
    Sse::new(tokio_stream::iter(backlog).chain(live)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn event_stream_from_log(rx: broadcast::Receiver<crate::logger::LogRecord>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx)
        .filter_map(|r| r.ok())
        .map(|rec| Ok(Event::default().data(serde_json::to_string(&rec).unwrap_or_default())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Tag;

    #[test]
    fn accept_publishes_to_messages_channel() {
        let hub = SseHub::new();
        let mut rx = hub.messages.subscribe();

        let mut msg = Message::new();
        msg.set_uint(0, 6, 1).unwrap();
        msg.set_uint(8, 30, 123_456_789).unwrap();
        Receiver::accept(&hub, &msg, &Tag::default()).unwrap();

        let received = rx.try_recv().unwrap();
        assert!(received.contains("\"mmsi\":123456789"));
    }

    #[test]
    fn publish_signal_reaches_subscriber() {
        let hub = SseHub::new();
        let mut rx = hub.signal.subscribe();
        hub.publish_signal("{\"count\":1}".to_string());
        assert_eq!(rx.try_recv().unwrap(), "{\"count\":1}");
    }
}
