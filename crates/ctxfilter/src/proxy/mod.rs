mod error;
mod relay;
mod server;

pub use error::{RelayError, json_error};
pub use relay::{FilteredBody, filter_body, forward_request, upstream_url};
pub use server::{AppState, ProxyServer, create_router};
