use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hub_shared::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use hub_shared::media::sniff;
use hub_shared::protocol::frame_limit;
use hub_shared::{GroupId, UserId};
use hub_store::{ChatMessage, MarkRead, Notification};

use crate::auth::{bearer, Credentials};
use crate::chat::ChatRelay;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway::Gateway;
use crate::mailer::Mailer;
use crate::media_store::MediaStore;
use crate::notify::NotificationService;
use crate::presence::Presence;
use crate::rooms::{Broadcaster, RoomRegistry};
use crate::sync::{self, EntitySync};
use crate::throttle::ChatThrottle;
use crate::translator::{DomainEvent, TranslationTable, Translator};
use crate::ws::{self, Session};
use crate::Db;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub session: Arc<Session>,
    pub chat: Arc<ChatRelay>,
    pub translator: Arc<Translator>,
    pub throttle: ChatThrottle,
    pub media: MediaStore,
    pub credentials: Credentials,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire every subsystem around one room registry and one database.
    pub async fn new(
        config: ServerConfig,
        db: Db,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, ServerError> {
        let rooms = RoomRegistry::new();
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(rooms.clone());
        let media = MediaStore::new(config.uploads_path.clone()).await?;

        let notifier = NotificationService::new(db.clone(), broadcaster.clone(), mailer);
        let translator = Arc::new(Translator::new(
            TranslationTable::standard(),
            notifier.clone(),
        ));
        let chat = Arc::new(ChatRelay::new(
            db.clone(),
            broadcaster,
            notifier,
            media.clone(),
            config.max_media_size,
        ));

        let credentials = Credentials::new(config.internal_token.as_deref());
        let presence = Presence::new(db.clone(), rooms.clone());
        let gateway = Arc::new(Gateway::new(
            rooms,
            presence,
            credentials.clone(),
            config.presence_on_close,
        ));
        let throttle = ChatThrottle::new(config.chat_rate, config.chat_burst);
        let session = Arc::new(Session::new(
            gateway,
            chat.clone(),
            throttle.clone(),
            frame_limit(config.max_media_size),
        ));

        Ok(Self {
            db,
            session,
            chat,
            translator,
            throttle,
            media,
            credentials,
            config: Arc::new(config),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::upgrade))
        .route("/notifications/:user_id", get(list_notifications))
        .route("/notifications/:user_id/unread-count", get(unread_count))
        .route("/notifications/:user_id/read", post(mark_read))
        .route("/chat/:user_a/:user_b/history", get(chat_history))
        .route("/groups/:group_id/history", get(group_history))
        .route("/events", post(ingest_event))
        .route("/entities", post(sync_entity))
        .route("/auth/token", post(issue_token))
        .route("/uploads/:file", get(download_upload))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

#[derive(Deserialize)]
struct PageQuery {
    skip: Option<u32>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct NotificationPage {
    notifications: Vec<Notification>,
    un_read_count: u64,
}

#[derive(Serialize)]
struct UnreadCount {
    un_read_count: u64,
}

#[derive(Deserialize)]
struct ReadRequest {
    /// A notification id, or `all`.
    id: String,
}

#[derive(Serialize)]
struct ReadResponse {
    updated: usize,
    un_read_count: u64,
}

#[derive(Serialize)]
struct Accepted {
    accepted: bool,
}

#[derive(Serialize)]
struct Applied {
    applied: bool,
}

#[derive(Deserialize)]
struct ViewerQuery {
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct TokenRequest {
    user_id: UserId,
}

#[derive(Serialize)]
struct TokenResponse {
    user_id: UserId,
    /// `None` while authentication is off.
    token: Option<String>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.session.gateway().rooms().connection_count(),
    })
}

async fn list_notifications(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<NotificationPage>, ServerError> {
    let user = UserId(user_id);
    authorize_user(&headers, &state, &user)?;
    let skip = page.skip.unwrap_or(0);
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let db = state.db.lock().await;
    let notifications = db.list_notifications(&user, skip, limit)?;
    let un_read_count = db.count_unread(&user)?;
    Ok(Json(NotificationPage {
        notifications,
        un_read_count,
    }))
}

async fn unread_count(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UnreadCount>, ServerError> {
    let user = UserId(user_id);
    authorize_user(&headers, &state, &user)?;
    let un_read_count = state.db.lock().await.count_unread(&user)?;
    Ok(Json(UnreadCount { un_read_count }))
}

async fn mark_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, ServerError> {
    let user = UserId(user_id);
    authorize_user(&headers, &state, &user)?;
    let which = if req.id == "all" {
        MarkRead::All
    } else {
        let id = Uuid::parse_str(&req.id)
            .map_err(|_| ServerError::BadRequest(format!("Invalid notification id: {}", req.id)))?;
        MarkRead::One(id)
    };

    let db = state.db.lock().await;
    let updated = db.mark_read(&user, which)?;
    let un_read_count = db.count_unread(&user)?;
    debug!(user = %user, updated, "Notifications marked read");
    Ok(Json(ReadResponse {
        updated,
        un_read_count,
    }))
}

/// Conversation between two users. Reading it as `user_a` marks what
/// `user_b` sent as read, so only `user_a` may read it.
async fn chat_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((user_a, user_b)): Path<(String, String)>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let viewer = UserId(user_a);
    authorize_user(&headers, &state, &viewer)?;
    let history = state
        .chat
        .aggregate_history(&viewer, &UserId(user_b))
        .await?;
    Ok(Json(history))
}

/// Group conversation. Users read it as `?user_id=` and must be members.
async fn group_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(viewer): Query<ViewerQuery>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let group = GroupId(group_id);
    if !state.credentials.verify_internal(bearer(&headers)) {
        let viewer = viewer
            .user_id
            .map(UserId)
            .ok_or_else(|| ServerError::Unauthorized("user_id is required".into()))?;
        authorize_user(&headers, &state, &viewer)?;
        if !state.db.lock().await.group_members(&group)?.contains(&viewer) {
            return Err(ServerError::Forbidden(format!("Not a member of group {group}")));
        }
    }
    let history = state.chat.group_history(&group).await?;
    Ok(Json(history))
}

/// Domain events from the CRUD services. Dispatch runs detached; a payload
/// that does not parse is logged and acknowledged.
async fn ingest_event(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Accepted>), ServerError> {
    verify_internal_token(&headers, &state)?;

    let event: DomainEvent = match serde_json::from_value(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Dropping malformed domain event");
            return Ok((StatusCode::ACCEPTED, Json(Accepted { accepted: false })));
        }
    };

    debug!(
        module = ?event.module,
        action = ?event.action,
        reference = %event.reference_id,
        "Domain event received"
    );
    {
        let db = state.db.lock().await;
        match sync::project_event(&db, &event) {
            Ok(true) => debug!(reference = %event.reference_id, "Entity row updated from event"),
            Ok(false) => {}
            Err(e) => warn!(reference = %event.reference_id, error = %e, "Failed to store entity"),
        }
    }
    state.translator.spawn_dispatch(event);
    Ok((StatusCode::ACCEPTED, Json(Accepted { accepted: true })))
}

/// Snapshots of users, groups, tasks and invoices from the CRUD services.
async fn sync_entity(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(entity): Json<EntitySync>,
) -> Result<Json<Applied>, ServerError> {
    verify_internal_token(&headers, &state)?;
    let applied = sync::apply(&mut *state.db.lock().await, &entity)?;
    debug!(applied, "Entity synced");
    Ok(Json(Applied { applied }))
}

/// Room token for a user, minted for services that cannot compute it.
async fn issue_token(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ServerError> {
    verify_internal_token(&headers, &state)?;
    if req.user_id.is_blank() {
        return Err(ServerError::BadRequest("user_id is required".into()));
    }
    let token = state.credentials.issue(&req.user_id);
    Ok(Json(TokenResponse {
        user_id: req.user_id,
        token,
    }))
}

async fn download_upload(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.media.read(&file).await?;
    let content_type = sniff(&data)
        .map(|format| format.mime_type())
        .unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

fn verify_internal_token(headers: &HeaderMap, state: &AppState) -> Result<(), ServerError> {
    if state.credentials.verify_internal(bearer(headers)) {
        Ok(())
    } else {
        Err(ServerError::Forbidden("Invalid internal token".into()))
    }
}

/// The caller holds `user`'s token, or is a service using the internal one.
fn authorize_user(
    headers: &HeaderMap,
    state: &AppState,
    user: &UserId,
) -> Result<(), ServerError> {
    let presented = bearer(headers);
    if state.credentials.verify_internal(presented)
        || state.credentials.verify_user(user, presented)
    {
        Ok(())
    } else {
        Err(ServerError::Unauthorized(format!("Token does not match {user}")))
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
