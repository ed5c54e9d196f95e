pub mod config;
pub mod error;
pub mod form;
pub mod geo;
pub mod reconciler;
pub mod session;
pub mod sse;
pub mod terminal;
pub mod transport;
pub mod view;

pub use config::ClientConfig;
pub use error::ClientError;
pub use form::RouteForm;
pub use reconciler::{Reconciler, UiState};
pub use session::{SearchRadius, SessionState};
pub use sse::{decode_events, ChatReply, ChatStreamDecoder, ChatStreamEvent};
pub use transport::{Backend, FragmentStream, HttpTransport};
pub use view::{InputField, PoiKind, Tab, View};
