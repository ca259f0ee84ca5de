use camber_core::Engine;

mod http;

pub use http::serve;

/// Shared handle given to every request handler. The engine itself holds no
/// per-run state, so one clone serves any number of concurrent connections.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}
