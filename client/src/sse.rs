//! Incremental decoder for the `/chat/stream` server-sent-event protocol.
//!
//! The backend writes one JSON object per `data: {...}\n\n` message. Network
//! chunks are not aligned to messages, so fragments are buffered until the
//! delimiter is seen. Exactly one terminal event ends every decoded stream.

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use shared::GeocodedLocation;

use crate::error::ClientError;
use crate::transport::FragmentStream;

const MESSAGE_DELIMITER: &str = "\n\n";
const DATA_PREFIX: &str = "data: ";

/// Final assistant text plus whether the UI should resync with the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub requires_ui_update: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    Chunk(String),
    RouteGenerated(ChatReply),
    PlacesRequested { reply: ChatReply, show: bool },
    FeaturesRequested { reply: ChatReply, show: bool },
    WaypointAdded {
        reply: ChatReply,
        waypoint: GeocodedLocation,
    },
    Completion(ChatReply),
    Error(String),
}

impl ChatStreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChatStreamEvent::Chunk(_))
    }

    pub fn reply(&self) -> Option<&ChatReply> {
        match self {
            ChatStreamEvent::RouteGenerated(reply)
            | ChatStreamEvent::Completion(reply)
            | ChatStreamEvent::PlacesRequested { reply, .. }
            | ChatStreamEvent::FeaturesRequested { reply, .. }
            | ChatStreamEvent::WaypointAdded { reply, .. } => Some(reply),
            ChatStreamEvent::Chunk(_) | ChatStreamEvent::Error(_) => None,
        }
    }
}

pub type ChatEvents = Pin<Box<dyn Stream<Item = ChatStreamEvent> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminalStatus {
    RouteGenerated,
    PlacesRequested,
    FeaturesRequested,
    WaypointAdded,
}

impl TerminalStatus {
    fn parse(status: &str) -> Option<Self> {
        match status {
            "route_generated" => Some(Self::RouteGenerated),
            "places_requested" => Some(Self::PlacesRequested),
            "features_requested" => Some(Self::FeaturesRequested),
            "waypoint_added" => Some(Self::WaypointAdded),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireMessage {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    requires_ui_update: Option<bool>,
    #[serde(default)]
    show_places: Option<bool>,
    #[serde(default)]
    show_features: Option<bool>,
    #[serde(default)]
    waypoint: Option<GeocodedLocation>,
    #[serde(default)]
    chunk: Option<String>,
    #[serde(default)]
    complete: Option<Value>,
}

#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    buffer: String,
    full_response: String,
    requires_ui_update: bool,
    finished: bool,
}

impl ChatStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Text accumulated from chunk events so far.
    pub fn full_response(&self) -> &str {
        &self.full_response
    }

    /// Feeds one raw fragment and returns the events it completes.
    ///
    /// Once a terminal event has been returned, every later call yields nothing.
    pub fn push(&mut self, fragment: &str) -> Vec<ChatStreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.push_str(fragment);

        while let Some(end) = self.buffer.find(MESSAGE_DELIMITER) {
            let segment: String = self.buffer.drain(..end + MESSAGE_DELIMITER.len()).collect();
            let Some(event) = self.decode_segment(&segment[..end]) else {
                continue;
            };
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                self.finished = true;
                self.buffer.clear();
                break;
            }
        }

        events
    }

    /// Natural end of the transport. Synthesizes the completion event unless a
    /// terminal event was already produced.
    pub fn finish(&mut self) -> Option<ChatStreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;

        if !self.buffer.trim().is_empty() {
            tracing::debug!(
                "discarding {} bytes of unterminated stream data",
                self.buffer.len()
            );
        }
        self.buffer.clear();

        Some(ChatStreamEvent::Completion(ChatReply {
            text: std::mem::take(&mut self.full_response),
            requires_ui_update: self.requires_ui_update,
        }))
    }

    /// Stops decoding without producing a terminal event.
    pub fn abort(&mut self) {
        self.finished = true;
        self.buffer.clear();
    }

    fn decode_segment(&mut self, segment: &str) -> Option<ChatStreamEvent> {
        let segment = segment.trim_start_matches(['\r', '\n']);
        if segment.trim().is_empty() {
            return None;
        }
        let Some(payload) = segment.strip_prefix(DATA_PREFIX) else {
            tracing::debug!("ignoring non-data stream segment: {segment:?}");
            return None;
        };

        let message: WireMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(err) => {
                let err = ClientError::Protocol(format!("{err} in {payload:?}"));
                tracing::warn!("skipping malformed chat message: {err}");
                return None;
            }
        };

        self.classify(message)
    }

    // error > named status > chunk/complete; first match wins.
    fn classify(&mut self, message: WireMessage) -> Option<ChatStreamEvent> {
        if let Some(error) = message.error {
            let text = match error {
                Value::String(text) => text,
                other => other.to_string(),
            };
            return Some(ChatStreamEvent::Error(text));
        }

        if let Some(status) = message.status.as_deref() {
            match TerminalStatus::parse(status) {
                Some(status) => {
                    let reply = ChatReply {
                        text: message
                            .message
                            .unwrap_or_else(|| self.full_response.clone()),
                        requires_ui_update: message.requires_ui_update.unwrap_or(false),
                    };
                    return match status {
                        TerminalStatus::RouteGenerated => {
                            Some(ChatStreamEvent::RouteGenerated(reply))
                        }
                        TerminalStatus::PlacesRequested => Some(ChatStreamEvent::PlacesRequested {
                            reply,
                            show: message.show_places.unwrap_or(false),
                        }),
                        TerminalStatus::FeaturesRequested => {
                            Some(ChatStreamEvent::FeaturesRequested {
                                reply,
                                show: message.show_features.unwrap_or(false),
                            })
                        }
                        TerminalStatus::WaypointAdded => match message.waypoint {
                            Some(waypoint) => {
                                Some(ChatStreamEvent::WaypointAdded { reply, waypoint })
                            }
                            None => {
                                tracing::warn!(
                                    "skipping waypoint_added message without a waypoint"
                                );
                                None
                            }
                        },
                    };
                }
                None => tracing::warn!("ignoring unknown stream status {status:?}"),
            }
        }

        if matches!(message.complete, Some(ref flag) if flag != &Value::Bool(false)) {
            self.requires_ui_update = message.requires_ui_update.unwrap_or(false);
        }

        message.chunk.map(|chunk| {
            self.full_response.push_str(&chunk);
            ChatStreamEvent::Chunk(chunk)
        })
    }
}

/// Decodes a fragment stream into chat events.
///
/// The source is dropped as soon as a terminal event is yielded. A transport
/// error, or `idle_timeout` elapsing between fragments, ends the stream with a
/// synthesized [`ChatStreamEvent::Error`].
pub fn decode_events(mut fragments: FragmentStream, idle_timeout: Option<Duration>) -> ChatEvents {
    Box::pin(async_stream::stream! {
        let mut decoder = ChatStreamDecoder::new();

        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, fragments.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!("chat stream idle for {limit:?}, cancelling");
                        decoder.abort();
                        yield ChatStreamEvent::Error(ClientError::Timeout.to_string());
                        break;
                    }
                },
                None => fragments.next().await,
            };

            match next {
                Some(Ok(fragment)) => {
                    for event in decoder.push(&fragment) {
                        tracing::debug!("decoded chat event: {event:?}");
                        yield event;
                    }
                    if decoder.is_finished() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!("chat stream failed: {err}");
                    decoder.abort();
                    yield ChatStreamEvent::Error(err.to_string());
                    break;
                }
                None => {
                    if let Some(event) = decoder.finish() {
                        yield event;
                    }
                    break;
                }
            }
        }
    })
}
