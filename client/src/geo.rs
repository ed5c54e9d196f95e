use shared::{PathPoint, RouteBounds};

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: PathPoint, b: PathPoint) -> f64 {
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();
    let dlat = (b.lat() - a.lat()).to_radians();
    let dlon = (b.lng() - a.lng()).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

pub fn approximate_distance_km(path: &[PathPoint]) -> f64 {
    path.windows(2).map(|w| haversine_km(w[0], w[1])).sum()
}

/// Bounding box used to fit the map view; `None` for an empty path.
pub fn bounds(path: &[PathPoint]) -> Option<RouteBounds> {
    let first = path.first()?;
    let init = RouteBounds {
        min_lat: first.lat(),
        max_lat: first.lat(),
        min_lon: first.lng(),
        max_lon: first.lng(),
    };
    Some(path.iter().skip(1).fold(init, |acc, point| RouteBounds {
        min_lat: acc.min_lat.min(point.lat()),
        max_lat: acc.max_lat.max(point.lat()),
        min_lon: acc.min_lon.min(point.lng()),
        max_lon: acc.max_lon.max(point.lng()),
    }))
}
