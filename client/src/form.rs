use shared::{Coordinate, GeocodedLocation, RouteRequest};

use crate::config::{ClientConfig, Sampling};
use crate::view::{InputField, PoiKind};

/// Pending route request as the user (or the assistant) has filled it in.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteForm {
    pub origin: String,
    pub destination: String,
    pub waypoints: Vec<GeocodedLocation>,
    pub places_radius_km: f64,
    pub features_radius_km: f64,
    pub show_places: bool,
    pub show_features: bool,
    pub sampling: Option<Sampling>,
}

impl Default for RouteForm {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl RouteForm {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            origin: String::new(),
            destination: String::new(),
            waypoints: Vec::new(),
            places_radius_km: config.places_radius_km,
            features_radius_km: config.features_radius_km,
            show_places: false,
            show_features: false,
            sampling: config.sampling,
        }
    }

    pub fn validate(&self) -> Result<(), (InputField, String)> {
        if self.origin.trim().is_empty() {
            return Err((InputField::Origin, "Origin is required".into()));
        }
        if self.destination.trim().is_empty() {
            return Err((InputField::Destination, "Destination is required".into()));
        }
        for kind in [PoiKind::Places, PoiKind::Features] {
            let radius = self.radius_km(kind);
            if !radius.is_finite() || radius <= 0.0 {
                return Err((
                    InputField::Radius(kind),
                    format!("Invalid {} radius: {radius}", kind.label()),
                ));
            }
        }
        Ok(())
    }

    pub fn to_request(&self, origin: Coordinate, destination: Coordinate) -> RouteRequest {
        let (sample, sample_method, interval_km, every_nth) = match self.sampling {
            Some(sampling @ Sampling::Interval { interval_km }) => {
                (Some(true), Some(sampling.method()), Some(interval_km), None)
            }
            Some(sampling @ Sampling::Nth { every_nth }) => {
                (Some(true), Some(sampling.method()), None, Some(every_nth))
            }
            None => (None, None, None, None),
        };

        RouteRequest {
            origin,
            destination,
            waypoints: self.waypoints.iter().map(GeocodedLocation::coordinate).collect(),
            sample,
            sample_method,
            interval_km,
            every_nth,
        }
    }

    pub fn radius_km(&self, kind: PoiKind) -> f64 {
        match kind {
            PoiKind::Places => self.places_radius_km,
            PoiKind::Features => self.features_radius_km,
        }
    }

    pub fn shows(&self, kind: PoiKind) -> bool {
        match kind {
            PoiKind::Places => self.show_places,
            PoiKind::Features => self.show_features,
        }
    }

    pub fn set_shows(&mut self, kind: PoiKind, enabled: bool) {
        match kind {
            PoiKind::Places => self.show_places = enabled,
            PoiKind::Features => self.show_features = enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use shared::SampleMethod;

    use super::*;

    fn filled() -> RouteForm {
        RouteForm {
            origin: "Lyon".into(),
            destination: "Grenoble".into(),
            ..RouteForm::default()
        }
    }

    #[test]
    fn test_validate_requires_endpoints() {
        let form = RouteForm {
            origin: "  ".into(),
            ..filled()
        };
        assert_eq!(form.validate().unwrap_err().0, InputField::Origin);

        let form = RouteForm {
            destination: String::new(),
            ..filled()
        };
        assert_eq!(form.validate().unwrap_err().0, InputField::Destination);

        assert!(filled().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_radius() {
        let form = RouteForm {
            features_radius_km: f64::NAN,
            ..filled()
        };
        assert_eq!(
            form.validate().unwrap_err().0,
            InputField::Radius(PoiKind::Features)
        );
    }

    #[test]
    fn test_to_request_carries_waypoints_and_sampling() {
        let mut form = filled();
        form.waypoints.push(GeocodedLocation {
            lat: 45.56,
            lng: 5.92,
            display_name: Some("Chambéry".into()),
        });
        form.sampling = Some(Sampling::Nth { every_nth: 7 });

        let request = form.to_request(
            Coordinate { lat: 45.76, lng: 4.83 },
            Coordinate { lat: 45.19, lng: 5.72 },
        );
        assert_eq!(request.waypoints, vec![Coordinate { lat: 45.56, lng: 5.92 }]);
        assert_eq!(request.sample, Some(true));
        assert_eq!(request.sample_method, Some(SampleMethod::Nth));
        assert_eq!(request.every_nth, Some(7));
        assert_eq!(request.interval_km, None);
    }

    #[test]
    fn test_show_flags_per_kind() {
        let mut form = filled();
        form.set_shows(PoiKind::Features, true);
        assert!(form.shows(PoiKind::Features));
        assert!(!form.shows(PoiKind::Places));
        assert_eq!(form.radius_km(PoiKind::Places), 10.0);
        assert_eq!(form.radius_km(PoiKind::Features), 2.0);
    }
}
