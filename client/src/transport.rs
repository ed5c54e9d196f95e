use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{header, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    ApiError, ChatHistory, ChatRequest, ChatResponse, ChatTurn, CurrentRoute, FeaturesResponse,
    FeaturesUpdate, GeocodeRequest, GeocodedLocation, PlacesRequest, PlacesResponse,
    PlacesUpdate, PointOfInterest, RouteRequest, RouteResponse,
};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::sse::ChatReply;

/// Raw text fragments of an event stream, in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

/// Everything the reconciler needs from the MapChat backend.
///
/// Calls are at-most-once: failures surface immediately and are never retried.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<GeocodedLocation, ClientError>;
    async fn route(&self, request: &RouteRequest) -> Result<RouteResponse, ClientError>;
    async fn places(&self, request: &PlacesRequest) -> Result<Vec<PointOfInterest>, ClientError>;
    async fn natural_features(
        &self,
        request: &PlacesRequest,
    ) -> Result<Vec<PointOfInterest>, ClientError>;
    async fn chat(&self, message: &str) -> Result<ChatReply, ClientError>;
    async fn chat_stream(&self, message: &str) -> Result<FragmentStream, ClientError>;
    async fn reset_chat(&self) -> Result<(), ClientError>;
    async fn chat_history(&self) -> Result<Vec<ChatTurn>, ClientError>;
    /// `Ok(None)` when the conversation has no active route.
    async fn current_route(&self) -> Result<Option<CurrentRoute>, ClientError>;
    async fn update_conversation_state(&self, state: &CurrentRoute) -> Result<(), ClientError>;
    async fn update_places_data(&self, places: &[PointOfInterest]) -> Result<(), ClientError>;
    async fn update_features_data(&self, features: &[PointOfInterest])
        -> Result<(), ClientError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let mut transport = Self::new(config.base_url.clone());
        transport.request_timeout = config.request_timeout();
        transport
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn with_timeout(&self, request: RequestBuilder) -> RequestBuilder {
        match self.request_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    /// POSTs `body` as JSON and decodes the JSON reply.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        tracing::debug!("POST {path}");
        let request = self.with_timeout(self.http.post(self.url(path)).json(body));
        let response = check_status(request.send().await?).await?;
        Ok(response.json::<R>().await?)
    }

    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        tracing::debug!("GET {path}");
        let request = self.with_timeout(self.http.get(self.url(path)));
        let response = check_status(request.send().await?).await?;
        Ok(response.json::<R>().await?)
    }

    /// POST whose reply body is irrelevant beyond its status.
    pub async fn post_ack<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), ClientError> {
        tracing::debug!("POST {path}");
        let mut request = self.http.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        check_status(self.with_timeout(request).send().await?).await?;
        Ok(())
    }

    /// Opens a server-sent-event stream. Dropping the returned stream closes
    /// the connection.
    pub async fn open_event_stream<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<FragmentStream, ClientError> {
        tracing::debug!("POST {path} (event stream)");
        let response = self
            .http
            .post(self.url(path))
            .header(header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut text = Utf8Fragments::default();
        let fragments = response
            .bytes_stream()
            .map(move |chunk| chunk.map(|bytes| text.push(&bytes)).map_err(ClientError::from))
            .filter(|fragment| {
                let keep = !matches!(fragment, Ok(text) if text.is_empty());
                futures::future::ready(keep)
            });
        Ok(Box::pin(fragments))
    }
}

#[async_trait]
impl Backend for HttpTransport {
    async fn geocode(&self, address: &str) -> Result<GeocodedLocation, ClientError> {
        let request = GeocodeRequest {
            address: address.to_string(),
        };
        match self.post_json::<_, GeocodedLocation>("/geocode", &request).await {
            Ok(location) => Ok(location),
            Err(ClientError::Http { status, message })
                if status == StatusCode::NOT_FOUND.as_u16() =>
            {
                Err(ClientError::Geocode {
                    address: address.to_string(),
                    message,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn route(&self, request: &RouteRequest) -> Result<RouteResponse, ClientError> {
        self.post_json("/route", request).await
    }

    async fn places(&self, request: &PlacesRequest) -> Result<Vec<PointOfInterest>, ClientError> {
        let response: PlacesResponse = self.post_json("/places", request).await?;
        Ok(response.places)
    }

    async fn natural_features(
        &self,
        request: &PlacesRequest,
    ) -> Result<Vec<PointOfInterest>, ClientError> {
        let response: FeaturesResponse = self.post_json("/natural_features", request).await?;
        Ok(response.features)
    }

    async fn chat(&self, message: &str) -> Result<ChatReply, ClientError> {
        let request = ChatRequest {
            message: message.to_string(),
        };
        let response: ChatResponse = self.post_json("/chat", &request).await?;
        Ok(ChatReply {
            text: response.message,
            requires_ui_update: response.requires_ui_update,
        })
    }

    async fn chat_stream(&self, message: &str) -> Result<FragmentStream, ClientError> {
        let request = ChatRequest {
            message: message.to_string(),
        };
        self.open_event_stream("/chat/stream", &request).await
    }

    async fn reset_chat(&self) -> Result<(), ClientError> {
        self.post_ack::<()>("/chat/reset", None).await
    }

    async fn chat_history(&self) -> Result<Vec<ChatTurn>, ClientError> {
        let history: ChatHistory = self.get_json("/chat/history").await?;
        Ok(history.history)
    }

    async fn current_route(&self) -> Result<Option<CurrentRoute>, ClientError> {
        match self.get_json::<CurrentRoute>("/get_current_route").await {
            Ok(route) => Ok(Some(route)),
            Err(ClientError::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn update_conversation_state(&self, state: &CurrentRoute) -> Result<(), ClientError> {
        self.post_ack("/update_conversation_state", Some(state)).await
    }

    async fn update_places_data(&self, places: &[PointOfInterest]) -> Result<(), ClientError> {
        let update = PlacesUpdate {
            places: places.to_vec(),
        };
        self.post_ack("/update_places_data", Some(&update)).await
    }

    async fn update_features_data(
        &self,
        features: &[PointOfInterest],
    ) -> Result<(), ClientError> {
        let update = FeaturesUpdate {
            features: features.to_vec(),
        };
        self.post_ack("/update_features_data", Some(&update)).await
    }
}

/// Maps a non-2xx response to [`ClientError::Http`], preferring the
/// backend's `{"error": ...}` text over the bare status line.
async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&body)
        .map(|api| api.error)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body.trim().to_string()
            }
        });
    tracing::debug!("backend returned {status}: {message}");
    Err(ClientError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Incremental UTF-8 decoding that holds back a multi-byte sequence cut by a
/// chunk boundary until the rest of it arrives.
#[derive(Debug, Default)]
struct Utf8Fragments {
    pending: Vec<u8>,
}

impl Utf8Fragments {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // incomplete sequence at the end, wait for the next chunk
                        None => {
                            self.pending.drain(..valid);
                            return text;
                        }
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_split_is_reassembled() {
        let mut decoder = Utf8Fragments::default();
        let bytes = "Lac d'Annecy – été".as_bytes();
        let dash = bytes.iter().position(|b| *b == 0xE2).unwrap();

        let head = decoder.push(&bytes[..dash + 1]);
        assert_eq!(head, "Lac d'Annecy ");
        let tail = decoder.push(&bytes[dash + 1..]);
        assert_eq!(format!("{head}{tail}"), "Lac d'Annecy – été");
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8Fragments::default();
        assert_eq!(decoder.push(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
        assert_eq!(decoder.push(b"c"), "c");
    }

    #[test]
    fn test_split_char_after_invalid_byte_survives() {
        let mut decoder = Utf8Fragments::default();
        let head = decoder.push(&[b'a', 0xFF, 0xE2]);
        assert_eq!(head, "a\u{FFFD}");
        let tail = decoder.push(&[0x80, 0x93]);
        assert_eq!(format!("{head}{tail}"), "a\u{FFFD}–");
    }

    #[test]
    fn test_each_invalid_run_is_replaced_once() {
        let mut decoder = Utf8Fragments::default();
        assert_eq!(decoder.push(&[0xFF, b'x', 0xC3]), "\u{FFFD}x");
        assert_eq!(decoder.push(&[0xA9, 0xFE]), "é\u{FFFD}");
    }

    #[test]
    fn test_urls_are_joined_without_double_slashes() {
        let transport = HttpTransport::new("http://localhost:5000/");
        assert_eq!(transport.base_url(), "http://localhost:5000");
        assert_eq!(transport.url("/chat/stream"), "http://localhost:5000/chat/stream");
        assert_eq!(transport.url("geocode"), "http://localhost:5000/geocode");
    }
}
