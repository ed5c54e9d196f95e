use std::fmt;
use std::future::Future;
use std::io::{self, Stdout, Write};

use shared::{ChatTurn, PointOfInterest, RouteBounds, RouteResult};

use tokio::io::{AsyncBufRead, Lines};

use crate::form::RouteForm;
use crate::view::{InputField, PoiKind, Tab, View};

const MAX_LISTED_POINTS: usize = 15;

/// Plain-text renderer used by the `mapchat` binary.
pub struct TerminalView<W: Write> {
    out: W,
    streamed_chunks: bool,
}

impl TerminalView<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            streamed_chunks: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        if let Err(err) = writeln!(self.out, "{args}") {
            tracing::warn!("terminal write failed: {err}");
        }
    }

    fn raw(&mut self, text: &str) {
        let result = write!(self.out, "{text}").and_then(|_| self.out.flush());
        if let Err(err) = result {
            tracing::warn!("terminal write failed: {err}");
        }
    }
}

/// Reads the next prompt line. `None` on end of input, on a read error, or
/// when `interrupt` resolves first.
pub async fn next_input<R, F>(lines: &mut Lines<R>, interrupt: F) -> Option<String>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        line = lines.next_line() => match line {
            Ok(line) => line,
            Err(err) => {
                tracing::error!("failed to read input: {err}");
                None
            }
        },
        _ = interrupt => {
            tracing::info!("interrupted at the prompt");
            None
        }
    }
}

fn field_label(field: InputField) -> String {
    match field {
        InputField::Origin => "origin".into(),
        InputField::Destination => "destination".into(),
        InputField::Waypoint(index) => format!("waypoint #{}", index + 1),
        InputField::Radius(kind) => format!("{} radius", kind.label()),
    }
}

impl<W: Write> View for TerminalView<W> {
    fn set_loading(&mut self, loading: bool) {
        if loading {
            self.line(format_args!("Generating route..."));
        }
    }

    fn render_route(&mut self, route: &RouteResult, bounds: Option<RouteBounds>) {
        self.line(format_args!(
            "Route: {} -> {} ({} points)",
            route.origin.label(),
            route.destination.label(),
            route.path.len()
        ));
        if let Some(b) = bounds {
            self.line(format_args!(
                "  bounds [{:.3}..{:.3}] lat / [{:.3}..{:.3}] lon",
                b.min_lat, b.max_lat, b.min_lon, b.max_lon
            ));
        }
        if let Some(samples) = &route.sampled_points {
            self.line(format_args!("  {} sampled points", samples.len()));
        }
    }

    fn show_route_summary(&mut self, distance: &str, duration: &str) {
        self.line(format_args!("Distance: {distance} | Duration: {duration}"));
    }

    fn render_points(&mut self, kind: PoiKind, points: &[PointOfInterest]) {
        self.line(format_args!("{} {} along the route:", points.len(), kind.label()));
        for point in points.iter().take(MAX_LISTED_POINTS) {
            self.line(format_args!(
                "  - {} ({}) {:.4}, {:.4}",
                point.name, point.kind, point.lat, point.lon
            ));
        }
        if points.len() > MAX_LISTED_POINTS {
            self.line(format_args!(
                "  ... and {} more",
                points.len() - MAX_LISTED_POINTS
            ));
        }
    }

    fn clear_points(&mut self, _kind: PoiKind) {}

    fn set_option(&mut self, kind: PoiKind, enabled: bool) {
        let state = if enabled { "on" } else { "off" };
        self.line(format_args!("[show {}: {state}]", kind.label()));
    }

    fn set_tab(&mut self, tab: Tab) {
        let name = match tab {
            Tab::Info => "route info",
            Tab::Places => "places",
            Tab::Features => "natural features",
        };
        self.line(format_args!("== {name} =="));
    }

    fn update_form(&mut self, form: &RouteForm) {
        let waypoints: Vec<String> = form.waypoints.iter().map(|w| w.label()).collect();
        self.line(format_args!(
            "From: {} | To: {}{}",
            form.origin,
            form.destination,
            if waypoints.is_empty() {
                String::new()
            } else {
                format!(" | Via: {}", waypoints.join(", "))
            }
        ));
    }

    fn mark_input_error(&mut self, field: InputField, message: &str) {
        self.line(format_args!("! {}: {message}", field_label(field)));
    }

    fn clear_input_errors(&mut self) {}

    fn show_alert(&mut self, message: &str) {
        self.line(format_args!("!! {message}"));
    }

    fn show_error(&mut self, message: &str) {
        if self.streamed_chunks {
            self.raw("\n");
            self.streamed_chunks = false;
        }
        self.line(format_args!("[error] {message}"));
    }

    fn push_user_message(&mut self, text: &str) {
        self.line(format_args!("you> {text}"));
    }

    fn begin_assistant_message(&mut self) {
        self.streamed_chunks = false;
        self.raw("assistant> ");
    }

    fn append_chunk(&mut self, chunk: &str) {
        self.streamed_chunks = true;
        self.raw(chunk);
    }

    fn finish_assistant_message(&mut self, text: &str) {
        if self.streamed_chunks {
            self.raw("\n");
        } else {
            self.line(format_args!("{text}"));
        }
        self.streamed_chunks = false;
    }

    fn render_history(&mut self, history: &[ChatTurn]) {
        if history.is_empty() {
            self.line(format_args!("(no messages yet)"));
        }
        for turn in history {
            self.line(format_args!("{}: {}", turn.role, turn.content));
        }
    }

    fn clear_chat(&mut self) {
        self.line(format_args!("-- conversation cleared --"));
    }
}

#[cfg(test)]
mod tests {
    use shared::{GeocodedLocation, PathPoint};
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    fn output(view: TerminalView<Vec<u8>>) -> String {
        String::from_utf8(view.into_inner()).unwrap()
    }

    #[test]
    fn test_streamed_reply_is_not_printed_twice() {
        let mut view = TerminalView::new(Vec::new());
        view.push_user_message("hi");
        view.begin_assistant_message();
        view.append_chunk("Hel");
        view.append_chunk("lo");
        view.finish_assistant_message("Hello");
        assert_eq!(output(view), "you> hi\nassistant> Hello\n");
    }

    #[test]
    fn test_unstreamed_reply_prints_final_text() {
        let mut view = TerminalView::new(Vec::new());
        view.begin_assistant_message();
        view.finish_assistant_message("Route planned.");
        assert_eq!(output(view), "assistant> Route planned.\n");
    }

    #[test]
    fn test_long_point_lists_are_truncated() {
        let mut view = TerminalView::new(Vec::new());
        let points: Vec<_> = (0..20)
            .map(|i| PointOfInterest {
                name: format!("Village {i}"),
                kind: "village".into(),
                lat: 45.0,
                lon: 5.0,
            })
            .collect();
        view.render_points(PoiKind::Places, &points);
        let text = output(view);
        assert!(text.starts_with("20 places along the route:"));
        assert!(text.contains("... and 5 more"));
        assert!(!text.contains("Village 15"));
    }

    #[test]
    fn test_route_lists_endpoints_and_bounds() {
        let mut view = TerminalView::new(Vec::new());
        let route = RouteResult {
            origin: GeocodedLocation {
                lat: 45.76,
                lng: 4.83,
                display_name: Some("Lyon".into()),
            },
            destination: GeocodedLocation {
                lat: 45.19,
                lng: 5.72,
                display_name: Some("Grenoble".into()),
            },
            path: vec![PathPoint(45.76, 4.83), PathPoint(45.19, 5.72)],
            distance_text: "104 km".into(),
            duration_text: "1 hour".into(),
            sampled_points: None,
        };
        let bounds = crate::geo::bounds(&route.path);
        view.render_route(&route, bounds);
        view.mark_input_error(InputField::Waypoint(0), "not found");
        let text = output(view);
        assert!(text.contains("Route: Lyon -> Grenoble (2 points)"));
        assert!(text.contains("[45.190..45.760] lat"));
        assert!(text.contains("! waypoint #1: not found"));
    }

    #[tokio::test]
    async fn test_next_input_reads_lines_until_eof() {
        let mut lines = BufReader::new(&b"/history\nhello\n"[..]).lines();
        let pending = std::future::pending::<()>;
        assert_eq!(next_input(&mut lines, pending()).await.as_deref(), Some("/history"));
        assert_eq!(next_input(&mut lines, pending()).await.as_deref(), Some("hello"));
        assert_eq!(next_input(&mut lines, pending()).await, None);
    }

    #[tokio::test]
    async fn test_next_input_stops_on_interrupt_at_idle_prompt() {
        // the writer half stays open and silent, as a terminal waiting for input
        let (reader, _writer) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();
        assert_eq!(next_input(&mut lines, std::future::ready(())).await, None);
    }
}
