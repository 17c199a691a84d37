use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/status", get(handlers::get_status))
            .route("/connect", post(handlers::post_connect))
            .route("/ws", get(handlers::ws_upgrade))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Starts the terminal server listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Terminal server listening on {}", addr);

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}
