mod app;
mod middleware;
mod state;

pub use app::create_app;
pub use middleware::AuthUser;
pub use state::{AppState, Backends};
