use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::{JwtSecret, TokenGate};
use crate::chat::{messages, presence};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret and token verifier into request extensions so the
/// Claims extractor can find them.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    req.extensions_mut().insert(TokenGate(state.gate.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on WebSocket handshakes, per client IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(state.relay.handshake_replenish_secs.max(1))
            .burst_size(state.relay.handshake_burst.max(1))
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // WebSocket endpoints (auth via query param, not JWT header)
    let ws_routes = Router::new()
        .route(
            "/ws/{conversation_id}",
            axum::routing::get(ws_handler::conversation_upgrade),
        )
        .route(
            "/ws/groups/{group_id}",
            axum::routing::get(ws_handler::group_upgrade),
        )
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Authenticated routes (JWT required, validated by the Claims extractor)
    let api_routes = Router::new()
        .route(
            "/api/presence/{user_id}",
            axum::routing::get(presence::get_presence),
        )
        .route(
            "/api/conversations/{id}/messages",
            axum::routing::get(messages::get_conversation_messages),
        )
        .route(
            "/api/groups/{id}/messages",
            axum::routing::get(messages::get_group_messages),
        );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
