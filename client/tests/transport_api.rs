use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use client::{decode_events, Backend, ChatReply, ChatStreamEvent, ClientError, HttpTransport};
use futures::{stream, StreamExt};
use serde_json::json;
use shared::{
    Coordinate, GeocodeRequest, GeocodedLocation, PathPoint, PlacesRequest, PointOfInterest,
    RouteRequest, RouteResponse, SearchMethod,
};

async fn geocode(Json(request): Json<GeocodeRequest>) -> Response {
    match request.address.as_str() {
        "Lyon" => Json(GeocodedLocation {
            lat: 45.76,
            lng: 4.83,
            display_name: Some("Lyon, France".into()),
        })
        .into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Location not found"})),
        )
            .into_response(),
    }
}

async fn route(Json(request): Json<RouteRequest>) -> Response {
    if request.origin == request.destination {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Could not find route"})),
        )
            .into_response();
    }
    Json(RouteResponse {
        polyline: Some("_p~iF~ps|U".into()),
        polyline_coords: vec![
            PathPoint(request.origin.lat, request.origin.lng),
            PathPoint(request.destination.lat, request.destination.lng),
        ],
        distance_text: "104 km".into(),
        duration_text: "1 hour 12 mins".into(),
        sampled_points: None,
    })
    .into_response()
}

// Echoes the search parameters back through the point name.
async fn places(Json(request): Json<PlacesRequest>) -> Json<serde_json::Value> {
    Json(json!({
        "places": [{
            "name": format!("{} points within {} m", request.polyline_coords.len(), request.radius_m),
            "type": if request.method == SearchMethod::Node { "node" } else { "way" },
            "lat": 45.5,
            "lon": 5.2
        }]
    }))
}

async fn chat_stream() -> Response {
    let fragments = stream::iter(vec![
        Ok::<_, Infallible>("data: {\"chunk\":\"Hel\"}\n"),
        Ok("\ndata: {\"chu"),
        Ok("nk\":\"lo\"}\n\n"),
        Ok("data: {\"complete\":true}\n\n"),
    ]);
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(fragments))
        .unwrap()
}

async fn current_route() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "No active route"})),
    )
        .into_response()
}

async fn history() -> Json<serde_json::Value> {
    Json(json!({
        "history": [
            {"role": "user", "content": "Plan a ride from Lyon"},
            {"role": "assistant", "content": "Where to?"}
        ]
    }))
}

async fn reset() -> Json<serde_json::Value> {
    Json(json!({"status": "success"}))
}

fn mock_backend() -> Router {
    Router::new()
        .route("/geocode", post(geocode))
        .route("/route", post(route))
        .route("/places", post(places))
        .route("/chat/stream", post(chat_stream))
        .route("/chat/history", get(history))
        .route("/chat/reset", post(reset))
        .route("/get_current_route", get(current_route))
}

async fn spawn_backend() -> HttpTransport {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, mock_backend()).await.unwrap();
    });
    HttpTransport::new(format!("http://{addr}/"))
}

#[tokio::test]
async fn geocode_returns_location() {
    let transport = spawn_backend().await;
    let location = transport.geocode("Lyon").await.unwrap();
    assert_eq!(location.coordinate(), Coordinate { lat: 45.76, lng: 4.83 });
    assert_eq!(location.label(), "Lyon, France");
}

#[tokio::test]
async fn unknown_address_is_a_geocode_error() {
    let transport = spawn_backend().await;
    let err = transport.geocode("Atlantis").await.unwrap_err();
    match err {
        ClientError::Geocode { address, message } => {
            assert_eq!(address, "Atlantis");
            assert_eq!(message, "Location not found");
        }
        other => panic!("expected geocode error, got {other:?}"),
    }
}

#[tokio::test]
async fn route_error_body_is_surfaced() {
    let transport = spawn_backend().await;
    let here = Coordinate { lat: 45.0, lng: 5.0 };
    let request = RouteRequest {
        origin: here,
        destination: here,
        waypoints: Vec::new(),
        sample: None,
        sample_method: None,
        interval_km: None,
        every_nth: None,
    };

    let err = transport.route(&request).await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("Could not find route"));
}

#[tokio::test]
async fn route_returns_polyline_coordinates() {
    let transport = spawn_backend().await;
    let request = RouteRequest {
        origin: Coordinate { lat: 45.76, lng: 4.83 },
        destination: Coordinate { lat: 45.19, lng: 5.72 },
        waypoints: Vec::new(),
        sample: None,
        sample_method: None,
        interval_km: None,
        every_nth: None,
    };

    let response = transport.route(&request).await.unwrap();
    assert_eq!(response.polyline_coords.len(), 2);
    assert_eq!(response.distance_text, "104 km");
}

#[tokio::test]
async fn places_request_carries_radius_in_meters() {
    let transport = spawn_backend().await;
    let request = PlacesRequest {
        polyline_coords: vec![PathPoint(45.76, 4.83), PathPoint(45.19, 5.72)],
        radius_m: 10_000,
        method: SearchMethod::Node,
    };

    let places: Vec<PointOfInterest> = transport.places(&request).await.unwrap();
    assert_eq!(places.len(), 1);
    assert_eq!(places[0].name, "2 points within 10000 m");
    assert_eq!(places[0].kind, "node");
}

#[tokio::test]
async fn missing_endpoint_maps_to_http_error() {
    let transport = spawn_backend().await;
    let request = PlacesRequest {
        polyline_coords: vec![PathPoint(45.76, 4.83)],
        radius_m: 2_000,
        method: SearchMethod::Way,
    };
    let err = transport.natural_features(&request).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn chat_stream_decodes_end_to_end() {
    let transport = spawn_backend().await;
    let fragments = transport.chat_stream("hi").await.unwrap();
    let events: Vec<_> = decode_events(fragments, Some(Duration::from_secs(5)))
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            ChatStreamEvent::Chunk("Hel".into()),
            ChatStreamEvent::Chunk("lo".into()),
            ChatStreamEvent::Completion(ChatReply {
                text: "Hello".into(),
                requires_ui_update: false,
            }),
        ]
    );
}

#[tokio::test]
async fn no_active_route_is_none() {
    let transport = spawn_backend().await;
    assert_eq!(transport.current_route().await.unwrap(), None);
}

#[tokio::test]
async fn history_and_reset() {
    let transport = spawn_backend().await;
    let history = transport.chat_history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, "assistant");

    transport.reset_chat().await.unwrap();
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new(format!("http://{addr}"));
    let err = transport.chat_history().await.unwrap_err();
    assert!(matches!(err, ClientError::Network(_)));
}
