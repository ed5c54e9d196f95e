use std::future::Future;

use shared::{PointOfInterest, RouteResult};

/// Search radius, compared at meter precision because meters are what the
/// backend receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchRadius {
    meters: u32,
}

impl SearchRadius {
    pub fn from_km(km: f64) -> Self {
        Self {
            meters: (km.max(0.0) * 1000.0).round() as u32,
        }
    }

    pub fn meters(self) -> u32 {
        self.meters
    }

    pub fn km(self) -> f64 {
        f64::from(self.meters) / 1000.0
    }
}

/// Points of interest together with the radius they were searched with.
#[derive(Debug, Clone, PartialEq)]
pub struct RadiusScoped {
    pub radius: SearchRadius,
    pub items: Vec<PointOfInterest>,
}

/// Client-held results for the lifetime of a session.
///
/// Cached places and features are only valid for the route they were
/// measured against, so replacing the route drops both.
#[derive(Debug, Default)]
pub struct SessionState {
    route: Option<RouteResult>,
    places: Option<RadiusScoped>,
    features: Option<RadiusScoped>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self) -> Option<&RouteResult> {
        self.route.as_ref()
    }

    pub fn places(&self) -> Option<&RadiusScoped> {
        self.places.as_ref()
    }

    pub fn features(&self) -> Option<&RadiusScoped> {
        self.features.as_ref()
    }

    pub fn set_route(&mut self, route: RouteResult) {
        self.route = Some(route);
        self.places = None;
        self.features = None;
    }

    pub fn cached_places(&self, radius: SearchRadius) -> Option<&[PointOfInterest]> {
        cached(&self.places, radius)
    }

    pub fn cached_features(&self, radius: SearchRadius) -> Option<&[PointOfInterest]> {
        cached(&self.features, radius)
    }

    pub async fn get_or_fetch_places<F, Fut, E>(
        &mut self,
        radius: SearchRadius,
        fetcher: F,
    ) -> Result<&[PointOfInterest], E>
    where
        F: FnOnce(SearchRadius) -> Fut,
        Fut: Future<Output = Result<Vec<PointOfInterest>, E>>,
    {
        get_or_fetch(&mut self.places, radius, fetcher).await
    }

    pub async fn get_or_fetch_features<F, Fut, E>(
        &mut self,
        radius: SearchRadius,
        fetcher: F,
    ) -> Result<&[PointOfInterest], E>
    where
        F: FnOnce(SearchRadius) -> Fut,
        Fut: Future<Output = Result<Vec<PointOfInterest>, E>>,
    {
        get_or_fetch(&mut self.features, radius, fetcher).await
    }
}

fn cached(slot: &Option<RadiusScoped>, radius: SearchRadius) -> Option<&[PointOfInterest]> {
    slot.as_ref()
        .filter(|scoped| scoped.radius == radius)
        .map(|scoped| scoped.items.as_slice())
}

async fn get_or_fetch<F, Fut, E>(
    slot: &mut Option<RadiusScoped>,
    radius: SearchRadius,
    fetcher: F,
) -> Result<&[PointOfInterest], E>
where
    F: FnOnce(SearchRadius) -> Fut,
    Fut: Future<Output = Result<Vec<PointOfInterest>, E>>,
{
    let fresh = slot.as_ref().is_some_and(|scoped| scoped.radius == radius);
    if !fresh {
        let items = fetcher(radius).await?;
        *slot = Some(RadiusScoped { radius, items });
    }
    Ok(slot
        .as_ref()
        .map(|scoped| scoped.items.as_slice())
        .unwrap_or_default())
}
