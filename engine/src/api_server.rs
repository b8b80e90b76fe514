//! Outbound HTTP API
//!
//! `POST /send-message {conversation, message}` pushes a text message through
//! the active transport. Callers are checked against `allowed_ips` and must
//! present one of `api_keys` in the `x-api-key` header.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use sdk::errors::EngineError;
use serde::Deserialize;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ApiServerConfig;
use crate::memory::ConversationKey;
use crate::transport::{OutboundMessage, Transport};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
struct ApiState {
    transport: Option<Arc<dyn Transport>>,
    api_keys: Arc<Vec<String>>,
    allowed_ips: Arc<Vec<String>>,
    signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    #[serde(default, alias = "number")]
    conversation: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn reply(status: StatusCode, error: Option<&str>) -> Response {
    let body = match error {
        None => json!({ "success": true }),
        Some(error) => json!({ "success": false, "error": error }),
    };
    (status, Json(body)).into_response()
}

impl ApiState {
    fn ip_allowed(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.allowed_ips.iter().any(|allowed| {
            allowed == "*"
                || allowed
                    .parse::<IpAddr>()
                    .map(|a| a.to_canonical() == ip)
                    .unwrap_or(false)
        })
    }

    fn key_allowed(&self, headers: &HeaderMap) -> bool {
        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|key| self.api_keys.iter().any(|k| k == key))
            .unwrap_or(false)
    }

    fn sign(&self, message: &str) -> String {
        match &self.signature {
            Some(signature) if !signature.is_empty() => format!("{}\n\n{}", message, signature),
            _ => message.to_string(),
        }
    }
}

async fn send_message_handler(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Response {
    if !state.ip_allowed(peer.ip()) {
        warn!("Rejected /send-message from {}", peer.ip());
        return reply(StatusCode::FORBIDDEN, Some("IP not allowed"));
    }

    if !state.key_allowed(&headers) {
        warn!("Rejected /send-message from {}: bad API key", peer.ip());
        return reply(StatusCode::UNAUTHORIZED, Some("Invalid API key"));
    }

    let (conversation, message) = match body {
        Ok(Json(SendMessageRequest {
            conversation: Some(conversation),
            message: Some(message),
        })) if !conversation.trim().is_empty() && !message.trim().is_empty() => {
            (conversation, message)
        }
        _ => {
            return reply(
                StatusCode::BAD_REQUEST,
                Some("Both conversation and message are required"),
            )
        }
    };

    let Some(transport) = &state.transport else {
        return reply(StatusCode::SERVICE_UNAVAILABLE, Some("Transport not connected"));
    };

    let outbound = OutboundMessage::text(
        ConversationKey::new(conversation.trim()),
        state.sign(&message),
    );
    match transport.send(outbound).await {
        Ok(()) => {
            info!(conversation = %conversation.trim(), "Message sent via API");
            reply(StatusCode::OK, None)
        }
        Err(e) => {
            warn!("API send failed: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, Some("Failed to send message"))
        }
    }
}

/// Router for the API; serve it with connect info so peer IPs are known
pub fn router(config: &ApiServerConfig, transport: Option<Arc<dyn Transport>>) -> Router {
    let state = ApiState {
        transport,
        api_keys: Arc::new(config.api_keys.clone()),
        allowed_ips: Arc::new(config.allowed_ips.clone()),
        signature: config.signature.clone(),
    };

    Router::new()
        .route("/send-message", post(send_message_handler))
        .with_state(state)
}

/// Running API server
pub struct ApiServer {
    addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl ApiServer {
    pub async fn start(
        config: &ApiServerConfig,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self, EngineError> {
        let listener = tokio::net::TcpListener::bind(&config.bind)
            .await
            .map_err(|e| EngineError::Network(format!("Failed to bind {}: {}", config.bind, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| EngineError::Network(format!("Failed to get local address: {}", e)))?;

        let app = router(config, transport);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            info!("API server listening on http://{}", addr);

            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_rx.await.ok();
                info!("API server shutting down gracefully");
            })
            .await
            .unwrap_or_else(|e| {
                tracing::error!("API server error: {}", e);
            });
        });

        Ok(Self {
            addr,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}
