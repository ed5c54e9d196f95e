use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

/// A geocoder hit as returned by `/geocode` and carried in waypoint events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedLocation {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl GeocodedLocation {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            lat: self.lat,
            lng: self.lng,
        }
    }

    /// Human-readable label, falling back to the raw coordinates.
    pub fn label(&self) -> String {
        match &self.display_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("{:.5}, {:.5}", self.lat, self.lng),
        }
    }
}

/// One polyline vertex, serialized as `[lat, lng]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint(pub f64, pub f64);

impl PathPoint {
    pub fn lat(self) -> f64 {
        self.0
    }

    pub fn lng(self) -> f64 {
        self.1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeRequest {
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMethod {
    Interval,
    Nth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub origin: Coordinate,
    pub destination: Coordinate,
    #[serde(default)]
    pub waypoints: Vec<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_method: Option<SampleMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every_nth: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polyline: Option<String>,
    #[serde(default)]
    pub polyline_coords: Vec<PathPoint>,
    #[serde(default)]
    pub distance_text: String,
    #[serde(default)]
    pub duration_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampled_points: Option<Vec<PathPoint>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Node,
    Way,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacesRequest {
    pub polyline_coords: Vec<PathPoint>,
    pub radius_m: u32,
    pub method: SearchMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacesResponse {
    #[serde(default)]
    pub places: Vec<PointOfInterest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeaturesResponse {
    #[serde(default)]
    pub features: Vec<PointOfInterest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    #[serde(default)]
    pub requires_ui_update: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatHistory {
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

/// Conversation-side route snapshot (`/get_current_route`, `/update_conversation_state`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentRoute {
    pub origin: GeocodedLocation,
    pub destination: GeocodedLocation,
    #[serde(default)]
    pub waypoints: Vec<GeocodedLocation>,
    #[serde(default)]
    pub route_data: RouteResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacesUpdate {
    pub places: Vec<PointOfInterest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesUpdate {
    pub features: Vec<PointOfInterest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Last successfully fetched route. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    pub origin: GeocodedLocation,
    pub destination: GeocodedLocation,
    pub path: Vec<PathPoint>,
    pub distance_text: String,
    pub duration_text: String,
    pub sampled_points: Option<Vec<PathPoint>>,
}

impl RouteResult {
    pub fn from_response(
        origin: GeocodedLocation,
        destination: GeocodedLocation,
        response: RouteResponse,
    ) -> Self {
        Self {
            origin,
            destination,
            path: response.polyline_coords,
            distance_text: response.distance_text,
            duration_text: response.duration_text,
            sampled_points: response.sampled_points,
        }
    }

    pub fn to_response(&self) -> RouteResponse {
        RouteResponse {
            polyline: None,
            polyline_coords: self.path.clone(),
            distance_text: self.distance_text.clone(),
            duration_text: self.duration_text.clone(),
            sampled_points: self.sampled_points.clone(),
        }
    }

    pub fn has_path(&self) -> bool {
        !self.path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_points_use_array_form() {
        let response: RouteResponse = serde_json::from_str(
            r#"{"polyline_coords": [[45.0, 5.0], [45.1, 5.2]], "distance_text": "12.3 km", "duration_text": "15 minutes"}"#,
        )
        .unwrap();
        assert_eq!(response.polyline_coords[1], PathPoint(45.1, 5.2));
        assert!(response.sampled_points.is_none());
    }

    #[test]
    fn test_empty_route_data_defaults() {
        let snapshot: CurrentRoute = serde_json::from_str(
            r#"{"origin": {"lat": 1.0, "lng": 2.0}, "destination": {"lat": 3.0, "lng": 4.0, "display_name": "Lyon"}, "route_data": {}}"#,
        )
        .unwrap();
        assert!(snapshot.route_data.polyline_coords.is_empty());
        assert!(snapshot.waypoints.is_empty());
        assert_eq!(snapshot.destination.label(), "Lyon");
        assert_eq!(snapshot.origin.label(), "1.00000, 2.00000");
    }

    #[test]
    fn test_route_request_omits_unset_sampling() {
        let request = RouteRequest {
            origin: Coordinate { lat: 1.0, lng: 2.0 },
            destination: Coordinate { lat: 3.0, lng: 4.0 },
            waypoints: Vec::new(),
            sample: None,
            sample_method: None,
            interval_km: None,
            every_nth: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("sample").is_none());
        assert!(json.get("every_nth").is_none());
        assert_eq!(json["waypoints"], serde_json::json!([]));
    }

    #[test]
    fn test_point_of_interest_renames_type() {
        let poi: PointOfInterest =
            serde_json::from_str(r#"{"name": "Col", "type": "peak", "lat": 45.0, "lon": 6.0}"#)
                .unwrap();
        assert_eq!(poi.kind, "peak");
        let places = PlacesRequest {
            polyline_coords: vec![PathPoint(1.0, 2.0)],
            radius_m: 2000,
            method: SearchMethod::Way,
        };
        let json = serde_json::to_value(&places).unwrap();
        assert_eq!(json["method"], "way");
        assert_eq!(json["polyline_coords"], serde_json::json!([[1.0, 2.0]]));
    }
}
