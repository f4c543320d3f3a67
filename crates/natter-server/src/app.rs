use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use natter_api::error::ApiError;
use natter_api::middleware::{header_token, require_auth};
use natter_api::{AppStateInner, auth, chats, friends, messages};
use natter_core::{IdentityGate, Services};
use natter_db::Database;
use natter_gateway::Dispatcher;
use natter_gateway::connection;

#[derive(Clone)]
struct ServerState {
    services: Services,
    dispatcher: Dispatcher,
}

/// Services and the realtime dispatcher, wired so that service writes fan out
/// through the dispatcher.
pub fn wire(db: Arc<Database>, identity: IdentityGate) -> (Services, Dispatcher) {
    let dispatcher = Dispatcher::new();
    let services = Services::new(db, Arc::new(dispatcher.clone()), identity);
    (services, dispatcher)
}

pub fn router(services: Services, dispatcher: Dispatcher, api_prefix: &str) -> Router {
    let app_state = AppStateInner::new(services.clone());

    // Routes
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/signin", post(auth::signin))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/users/me", get(auth::me))
        .route("/friends", get(friends::list_friends))
        .route(
            "/friends/requests",
            get(friends::list_requests).post(friends::send_request),
        )
        .route("/friends/requests/{request_id}/accept", post(friends::accept_request))
        .route("/friends/requests/{request_id}/reject", post(friends::reject_request))
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route("/chats/{chat_id}", get(chats::get_chat).patch(chats::update_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route(
            "/chats/{chat_id}/messages/{message_id}/read",
            post(messages::mark_read),
        )
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let api = Router::new().merge(public_routes).merge(protected_routes);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState {
            services,
            dispatcher,
        });

    let app = if api_prefix.is_empty() {
        api
    } else {
        Router::new().nest(api_prefix, api)
    };

    app.route("/health", get(health))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// A token in the query or `Authorization` header is checked before the
/// upgrade; without one the socket must send `identify` first.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query.token.as_deref().or_else(|| header_token(&headers));
    let claims = match token {
        Some(token) => match state.services.identity.verify(token) {
            Ok(claims) => Some(claims),
            Err(e) => return ApiError(e).into_response(),
        },
        None => None,
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.services, state.dispatcher, claims)
    })
}
