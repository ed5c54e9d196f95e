//! Maps user actions and decoded chat events onto session state and view
//! updates.
//!
//! The reconciler is the only owner of [`SessionState`]. It runs on a single
//! task: every method takes `&mut self`, so calls are serialized by
//! construction and a second chat stream cannot be opened while one is active
//! ([`ClientError::Busy`]).

use std::time::Duration;

use futures::StreamExt;
use shared::{CurrentRoute, GeocodedLocation, PlacesRequest, PointOfInterest, RouteResult};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::form::RouteForm;
use crate::geo;
use crate::session::{SearchRadius, SessionState};
use crate::sse::{self, ChatEvents, ChatReply, ChatStreamEvent};
use crate::transport::Backend;
use crate::view::{InputField, PoiKind, Tab, View};

const POI_KINDS: [PoiKind; 2] = [PoiKind::Places, PoiKind::Features];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UiState {
    Idle,
    AwaitingRoute,
    StreamingChat,
}

pub struct Reconciler<B, V> {
    backend: B,
    view: V,
    session: SessionState,
    form: RouteForm,
    state: UiState,
    streaming: bool,
    stream_idle_timeout: Option<Duration>,
}

impl<B: Backend, V: View> Reconciler<B, V> {
    pub fn new(backend: B, view: V, config: &ClientConfig) -> Self {
        Self {
            backend,
            view,
            session: SessionState::new(),
            form: RouteForm::from_config(config),
            state: UiState::Idle,
            streaming: config.streaming,
            stream_idle_timeout: config.stream_idle_timeout(),
        }
    }

    pub fn state(&self) -> UiState {
        self.state
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn form(&self) -> &RouteForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut RouteForm {
        &mut self.form
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether chat goes through `/chat/stream` rather than `/chat`.
    pub fn streaming(&self) -> bool {
        self.streaming
    }

    /// Full route-generation flow: geocode both endpoints, request the route,
    /// replace the session route and load any enabled point catalogs.
    pub async fn generate_route(&mut self) -> Result<(), ClientError> {
        if self.state != UiState::Idle {
            return Err(ClientError::Busy);
        }
        self.state = UiState::AwaitingRoute;
        self.view.set_loading(true);

        let result = self.run_route_flow().await;

        self.state = UiState::Idle;
        self.view.set_loading(false);
        match &result {
            Ok(()) => {}
            // already shown next to the offending input
            Err(ClientError::Geocode { .. }) | Err(ClientError::InvalidInput(_)) => {}
            Err(err) => {
                tracing::warn!("route generation failed: {err}");
                self.view
                    .show_alert(&format!("Failed to generate route: {err}"));
            }
        }
        result
    }

    async fn run_route_flow(&mut self) -> Result<(), ClientError> {
        self.view.clear_input_errors();
        if let Err((field, message)) = self.form.validate() {
            self.view.mark_input_error(field, &message);
            return Err(ClientError::InvalidInput(message));
        }

        let origin_text = self.form.origin.clone();
        let destination_text = self.form.destination.clone();
        let origin = self.geocode_field(InputField::Origin, &origin_text).await?;
        let destination = self
            .geocode_field(InputField::Destination, &destination_text)
            .await?;

        let request = self
            .form
            .to_request(origin.coordinate(), destination.coordinate());
        tracing::info!(
            "requesting route {} -> {} with {} waypoint(s)",
            origin.label(),
            destination.label(),
            request.waypoints.len()
        );
        let response = self.backend.route(&request).await?;
        let route = RouteResult::from_response(origin, destination, response);
        if !route.has_path() {
            return Err(ClientError::Protocol(
                "route response contained no coordinates".into(),
            ));
        }

        let snapshot = CurrentRoute {
            origin: route.origin.clone(),
            destination: route.destination.clone(),
            waypoints: self.form.waypoints.clone(),
            route_data: route.to_response(),
        };
        self.apply_route(route);
        if let Err(err) = self.backend.update_conversation_state(&snapshot).await {
            tracing::warn!("could not share route with the conversation: {err}");
        }

        for kind in POI_KINDS {
            if self.form.shows(kind) {
                self.show_points_or_alert(kind).await;
            }
        }
        Ok(())
    }

    /// Geocodes `address` and appends it to the pending waypoints.
    pub async fn add_waypoint(&mut self, address: &str) -> Result<(), ClientError> {
        let index = self.form.waypoints.len();
        let location = self
            .geocode_field(InputField::Waypoint(index), address)
            .await?;
        tracing::info!("added waypoint {}", location.label());
        self.form.waypoints.push(location);
        self.view.update_form(&self.form);
        Ok(())
    }

    async fn geocode_field(
        &mut self,
        field: InputField,
        address: &str,
    ) -> Result<GeocodedLocation, ClientError> {
        let address = address.trim();
        match self.backend.geocode(address).await {
            Ok(location) => Ok(location),
            Err(err) => {
                let err = match err {
                    ClientError::Http { message, .. } => ClientError::Geocode {
                        address: address.to_string(),
                        message,
                    },
                    other => other,
                };
                if matches!(err, ClientError::Geocode { .. }) {
                    self.view.mark_input_error(field, &err.to_string());
                }
                Err(err)
            }
        }
    }

    fn apply_route(&mut self, route: RouteResult) {
        let bounds = geo::bounds(&route.path);
        let distance = if route.distance_text.trim().is_empty() {
            format!("{:.1} km", geo::approximate_distance_km(&route.path))
        } else {
            route.distance_text.clone()
        };

        self.view.render_route(&route, bounds);
        self.view.show_route_summary(&distance, &route.duration_text);
        for kind in POI_KINDS {
            self.view.clear_points(kind);
        }
        self.session.set_route(route);
    }

    /// Shows `kind` along the current route, fetching only when the cached
    /// result is missing or was searched with a different radius.
    pub async fn refresh_points(&mut self, kind: PoiKind) -> Result<(), ClientError> {
        let Self {
            backend,
            view,
            session,
            form,
            ..
        } = self;

        let path = match session.route() {
            Some(route) if route.has_path() => route.path.clone(),
            _ => {
                return Err(ClientError::InvalidInput(format!(
                    "no route to search {} along",
                    kind.label()
                )))
            }
        };
        let radius = SearchRadius::from_km(form.radius_km(kind));
        let backend = &*backend;
        let fetcher = |radius: SearchRadius| async move {
            let request = PlacesRequest {
                polyline_coords: path,
                radius_m: radius.meters(),
                method: kind.search_method(),
            };
            match kind {
                PoiKind::Places => backend.places(&request).await,
                PoiKind::Features => backend.natural_features(&request).await,
            }
        };

        let fetched = cached_points(session, kind, radius).is_none();
        let points = match kind {
            PoiKind::Places => session.get_or_fetch_places(radius, fetcher).await?,
            PoiKind::Features => session.get_or_fetch_features(radius, fetcher).await?,
        };
        tracing::info!(
            "showing {} {} within {} m",
            points.len(),
            kind.label(),
            radius.meters()
        );
        view.render_points(kind, points);

        if fetched {
            let pushed = match kind {
                PoiKind::Places => backend.update_places_data(points).await,
                PoiKind::Features => backend.update_features_data(points).await,
            };
            if let Err(err) = pushed {
                tracing::warn!("could not share {} with the conversation: {err}", kind.label());
            }
        }
        Ok(())
    }

    async fn show_points_or_alert(&mut self, kind: PoiKind) {
        if let Err(err) = self.refresh_points(kind).await {
            tracing::warn!("loading {} failed: {err}", kind.label());
            self.view
                .show_alert(&format!("Failed to load {}: {err}", kind.label()));
        }
    }

    /// Sends a chat message and dispatches every resulting event.
    ///
    /// Falls back to the non-streaming endpoint when streaming is disabled.
    pub async fn send_chat(&mut self, message: &str) -> Result<ChatReply, ClientError> {
        if !self.streaming {
            return self.send_chat_once(message).await;
        }

        let mut events = self.open_chat(message).await?;
        let terminal = loop {
            match events.next().await {
                Some(event) if event.is_terminal() => break Some(event),
                Some(event) => {
                    self.apply(event).await?;
                }
                None => break None,
            }
        };
        // close the connection before running side effects
        drop(events);

        match terminal {
            Some(event) => self.apply(event).await?.ok_or_else(|| {
                ClientError::Protocol("terminal chat event produced no reply".into())
            }),
            None => {
                self.abandon_stream();
                Err(ClientError::Protocol(
                    "chat stream ended without a terminal event".into(),
                ))
            }
        }
    }

    async fn send_chat_once(&mut self, message: &str) -> Result<ChatReply, ClientError> {
        let message = self.begin_chat(message)?;
        match self.backend.chat(&message).await {
            Ok(reply) => self
                .apply(ChatStreamEvent::Completion(reply))
                .await?
                .ok_or_else(|| ClientError::Protocol("chat reply was not applied".into())),
            Err(err) => {
                self.state = UiState::Idle;
                self.view.show_error(&format!("Error: {err}"));
                Err(err)
            }
        }
    }

    /// Opens a chat stream. The caller drives it by passing each event to
    /// [`Reconciler::apply`], or cancels it with [`Reconciler::abandon_stream`].
    pub async fn open_chat(&mut self, message: &str) -> Result<ChatEvents, ClientError> {
        let message = self.begin_chat(message)?;
        match self.backend.chat_stream(&message).await {
            Ok(fragments) => Ok(sse::decode_events(fragments, self.stream_idle_timeout)),
            Err(err) => {
                tracing::warn!("could not open chat stream: {err}");
                self.state = UiState::Idle;
                self.view.show_error(&format!("Error: {err}"));
                Err(err)
            }
        }
    }

    fn begin_chat(&mut self, message: &str) -> Result<String, ClientError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ClientError::InvalidInput("message is empty".into()));
        }
        if self.state != UiState::Idle {
            return Err(ClientError::Busy);
        }
        self.state = UiState::StreamingChat;
        self.view.push_user_message(message);
        self.view.begin_assistant_message();
        Ok(message.to_string())
    }

    /// Returns to idle after the caller stopped reading a stream early.
    /// Effects already dispatched stay in place.
    pub fn abandon_stream(&mut self) {
        if self.state == UiState::StreamingChat {
            tracing::info!("chat stream cancelled");
            self.state = UiState::Idle;
        }
    }

    /// Dispatches one decoded event.
    ///
    /// Returns the reply for terminal events, `None` for chunks, and
    /// [`ClientError::Application`] for a backend-reported error. Failures of
    /// follow-up flows (route regeneration, place lookups) are shown through
    /// the view and logged, not returned.
    pub async fn apply(
        &mut self,
        event: ChatStreamEvent,
    ) -> Result<Option<ChatReply>, ClientError> {
        match event {
            ChatStreamEvent::Chunk(chunk) => {
                self.view.append_chunk(&chunk);
                Ok(None)
            }
            ChatStreamEvent::Error(message) => {
                self.state = UiState::Idle;
                self.view.show_error(&message);
                Err(ClientError::Application(message))
            }
            ChatStreamEvent::RouteGenerated(reply) => {
                self.finish_reply(&reply);
                self.check_for_route_update_logged().await;
                Ok(Some(reply))
            }
            ChatStreamEvent::PlacesRequested { reply, show } => {
                self.finish_reply(&reply);
                self.points_requested(PoiKind::Places, show).await;
                Ok(Some(reply))
            }
            ChatStreamEvent::FeaturesRequested { reply, show } => {
                self.finish_reply(&reply);
                self.points_requested(PoiKind::Features, show).await;
                Ok(Some(reply))
            }
            ChatStreamEvent::WaypointAdded { reply, waypoint } => {
                self.finish_reply(&reply);
                tracing::info!("assistant added waypoint {}", waypoint.label());
                self.form.waypoints.push(waypoint);
                self.view.update_form(&self.form);
                if let Err(err) = self.generate_route().await {
                    tracing::debug!("route regeneration after waypoint failed: {err}");
                }
                Ok(Some(reply))
            }
            ChatStreamEvent::Completion(reply) => {
                self.finish_reply(&reply);
                if reply.requires_ui_update {
                    self.check_for_route_update_logged().await;
                }
                Ok(Some(reply))
            }
        }
    }

    fn finish_reply(&mut self, reply: &ChatReply) {
        self.state = UiState::Idle;
        self.view.finish_assistant_message(&reply.text);
    }

    async fn points_requested(&mut self, kind: PoiKind, show: bool) {
        if show {
            self.form.set_shows(kind, true);
            self.view.set_option(kind, true);
        }

        let has_route = self.session.route().is_some_and(RouteResult::has_path);
        if !has_route {
            tracing::info!("no route yet, generating one before loading {}", kind.label());
            if let Err(err) = self.generate_route().await {
                tracing::debug!("route generation for {} failed: {err}", kind.label());
                return;
            }
        }

        match self.refresh_points(kind).await {
            Ok(()) => self.view.set_tab(kind.tab()),
            Err(err) => {
                tracing::warn!("loading {} failed: {err}", kind.label());
                self.view
                    .show_alert(&format!("Failed to load {}: {err}", kind.label()));
            }
        }
    }

    /// Pulls the conversation's route snapshot and adopts it locally.
    ///
    /// Returns `false` when the backend has no active route.
    pub async fn check_for_route_update(&mut self) -> Result<bool, ClientError> {
        let Some(snapshot) = self.backend.current_route().await? else {
            tracing::debug!("conversation has no active route");
            return Ok(false);
        };
        self.reconcile_snapshot(snapshot).await;
        self.view.set_tab(Tab::Info);
        Ok(true)
    }

    async fn check_for_route_update_logged(&mut self) {
        if let Err(err) = self.check_for_route_update().await {
            tracing::warn!("route update check failed: {err}");
        }
    }

    async fn reconcile_snapshot(&mut self, snapshot: CurrentRoute) {
        self.form.origin = snapshot.origin.label();
        self.form.destination = snapshot.destination.label();
        self.form.waypoints = snapshot.waypoints;
        self.view.update_form(&self.form);

        let route =
            RouteResult::from_response(snapshot.origin, snapshot.destination, snapshot.route_data);
        if !route.has_path() {
            tracing::debug!("route snapshot has no coordinates, keeping local route");
            return;
        }

        if self.session.route() == Some(&route) {
            for kind in POI_KINDS {
                let radius = SearchRadius::from_km(self.form.radius_km(kind));
                if let Some(points) = cached_points(&self.session, kind, radius) {
                    self.view.render_points(kind, points);
                }
            }
        } else {
            tracing::info!(
                "adopting route {} -> {} from the conversation",
                route.origin.label(),
                route.destination.label()
            );
            self.apply_route(route);
        }

        for kind in POI_KINDS {
            let radius = SearchRadius::from_km(self.form.radius_km(kind));
            if self.form.shows(kind) && cached_points(&self.session, kind, radius).is_none() {
                self.show_points_or_alert(kind).await;
            }
        }
    }

    pub async fn reset_conversation(&mut self) -> Result<(), ClientError> {
        self.backend.reset_chat().await?;
        self.view.clear_chat();
        tracing::info!("conversation reset");
        Ok(())
    }

    pub async fn load_history(&mut self) -> Result<usize, ClientError> {
        let history = self.backend.chat_history().await?;
        self.view.render_history(&history);
        Ok(history.len())
    }
}

fn cached_points(
    session: &SessionState,
    kind: PoiKind,
    radius: SearchRadius,
) -> Option<&[PointOfInterest]> {
    match kind {
        PoiKind::Places => session.cached_places(radius),
        PoiKind::Features => session.cached_features(radius),
    }
}
