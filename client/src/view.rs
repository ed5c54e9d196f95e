use shared::{ChatTurn, PointOfInterest, RouteBounds, RouteResult, SearchMethod};

use crate::form::RouteForm;

/// The two point-of-interest catalogs shown alongside a route.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum PoiKind {
    Places,
    Features,
}

impl PoiKind {
    pub fn search_method(self) -> SearchMethod {
        match self {
            PoiKind::Places => SearchMethod::Node,
            PoiKind::Features => SearchMethod::Way,
        }
    }

    pub fn tab(self) -> Tab {
        match self {
            PoiKind::Places => Tab::Places,
            PoiKind::Features => Tab::Features,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PoiKind::Places => "places",
            PoiKind::Features => "natural features",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Tab {
    Info,
    Places,
    Features,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InputField {
    Origin,
    Destination,
    Waypoint(usize),
    Radius(PoiKind),
}

/// Rendering surface driven by the reconciler.
///
/// Implementations only draw; every decision about what to show lives in
/// [`crate::reconciler::Reconciler`].
pub trait View {
    fn set_loading(&mut self, loading: bool);

    /// Draws the polyline and fits the map to `bounds` when present.
    fn render_route(&mut self, route: &RouteResult, bounds: Option<RouteBounds>);
    fn show_route_summary(&mut self, distance: &str, duration: &str);

    fn render_points(&mut self, kind: PoiKind, points: &[PointOfInterest]);
    fn clear_points(&mut self, kind: PoiKind);
    /// Mirrors the "show places" / "show features" checkboxes.
    fn set_option(&mut self, kind: PoiKind, enabled: bool);
    fn set_tab(&mut self, tab: Tab);

    fn update_form(&mut self, form: &RouteForm);
    fn mark_input_error(&mut self, field: InputField, message: &str);
    fn clear_input_errors(&mut self);
    /// Blocking notice for a failed route request.
    fn show_alert(&mut self, message: &str);
    /// Replaces the pending assistant bubble with an error.
    fn show_error(&mut self, message: &str);

    fn push_user_message(&mut self, text: &str);
    fn begin_assistant_message(&mut self);
    fn append_chunk(&mut self, chunk: &str);
    fn finish_assistant_message(&mut self, text: &str);
    fn render_history(&mut self, history: &[ChatTurn]);
    fn clear_chat(&mut self);
}
