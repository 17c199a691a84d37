//! The client-facing surface: HTTP connect/status endpoints plus the
//! websocket streaming sessions and their command router.

pub mod handlers;
pub mod history;
pub mod messages;
pub mod push;
pub mod server;
pub mod session;
pub mod state;

pub use push::TickThrottle;
pub use server::ApiServer;
pub use state::AppState;
