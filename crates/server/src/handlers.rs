use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use fx_terminal_core::{Credentials, SymbolMap};

use crate::session::serve_socket;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connected: bool,
    pub initialized: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let initialized = !state.symbols.read().await.is_empty();
    Json(StatusResponse {
        connected: state.broker.connected(),
        initialized,
    })
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub server: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Opens the broker session and discovers the tradable symbol table.
pub async fn post_connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Json<ConnectResponse> {
    let login = request.login.trim();
    let password = request.password.trim();
    let server = request.server.trim();
    if login.is_empty() || password.is_empty() || server.is_empty() {
        return Json(ConnectResponse::failure("All fields are required"));
    }
    let Ok(login) = login.parse::<u64>() else {
        return Json(ConnectResponse::failure("Login must be a number"));
    };

    let credentials = Credentials {
        login,
        password: password.to_string(),
        server: server.to_string(),
    };
    let account = match state.broker.connect(&credentials).await {
        Ok(account) => account,
        Err(e) => {
            error!("broker connect failed: {e}");
            return Json(ConnectResponse::failure(e.to_string()));
        }
    };

    match SymbolMap::discover(state.broker.as_ref()).await {
        Ok(map) => {
            info!(symbols = map.len(), "symbol discovery complete");
            *state.symbols.write().await = map;
        }
        Err(e) => error!("symbol discovery failed: {e}"),
    }

    Json(ConnectResponse {
        success: true,
        message: Some(format!("Connected to {} as {}", account.server, account.login)),
        error: None,
    })
}

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}
