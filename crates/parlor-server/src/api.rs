use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Query, State,
    },
    http::Method,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use parlor_shared::{ChatEvent, ConversationKey, GroupId, SendRequest, TypingRequest, UserId};
use parlor_store::{Database, Group};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::db::SharedDatabase;
use crate::error::ServerError;
use crate::membership::SqliteMembership;
use crate::message_log::SqliteMessageLog;
use crate::registry::ConnectionRegistry;
use crate::router::{MessageRouter, StatsSnapshot};
use crate::session;

#[derive(Clone)]
pub struct AppState {
    pub router: MessageRouter,
    pub db: SharedDatabase,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the log, membership resolver, registry and router around one
    /// database.
    pub fn new(database: Database, config: ServerConfig) -> Self {
        let db = SharedDatabase::new(database);
        let router = MessageRouter::new(
            Arc::new(SqliteMessageLog::new(db.clone(), config.history_window)),
            Arc::new(SqliteMembership::new(db.clone())),
            ConnectionRegistry::new(),
        );

        Self {
            router,
            db,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/events", get(open_events))
        .route("/api/send", post(send_message))
        .route("/api/typing", post(typing))
        .route("/api/messages", get(history))
        .route("/api/groups", get(list_groups).post(create_group))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct StatsResponse {
    online: usize,
    #[serde(flatten)]
    delivery: StatsSnapshot,
}

#[derive(Serialize)]
struct SendResponse {
    status: &'static str,
    id: i64,
    timestamp: i64,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsQuery {
    user_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    user_id: Option<i64>,
    contact_id: Option<i64>,
    group_id: Option<i64>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupsQuery {
    user_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest {
    name: String,
    creator_id: i64,
    #[serde(default)]
    member_ids: Vec<i64>,
}

#[derive(Serialize)]
struct CreateGroupResponse {
    id: GroupId,
    name: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        online: state.router.registry().online_count().await,
        delivery: state.router.stats(),
    })
}

/// Long-lived push stream for one user. Each event is written as
/// `data: <json>\n\n`, starting with `{"type":"connected"}`.
async fn open_events(
    State(state): State<AppState>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let user = UserId::from_wire(query.user_id)
        .ok_or_else(|| ServerError::BadRequest("Invalid user ID".into()))?;

    let link = session::open(state.router.registry(), user, state.config.queue_capacity).await;

    let stream = futures::stream::unfold(link, |mut link| async move {
        link.recv()
            .await
            .map(|payload| (Ok(Event::default().data(&*payload)), link))
    });

    let mut sse = Sse::new(stream);
    if let Some(interval) = state.config.keepalive {
        sse = sse.keep_alive(KeepAlive::new().interval(interval));
    }
    Ok(sse)
}

async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ServerError> {
    let Json(request) = payload?;
    let message = state.router.send(request).await?;

    Ok(Json(SendResponse {
        status: "ok",
        id: message.id.0,
        timestamp: message.timestamp.timestamp(),
    }))
}

async fn typing(
    State(state): State<AppState>,
    payload: Result<Json<TypingRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ServerError> {
    let Json(request) = payload?;
    state.router.typing(request).await?;
    Ok(Json(StatusResponse { status: "ok" }))
}

async fn history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<ChatEvent>>, ServerError> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;

    let key = match (
        GroupId::from_wire(query.group_id),
        UserId::from_wire(query.user_id),
        UserId::from_wire(query.contact_id),
    ) {
        (Some(group), _, _) => ConversationKey::group(group),
        (None, Some(user), Some(contact)) => ConversationKey::direct(user, contact),
        _ => {
            return Err(ServerError::BadRequest(
                "Expected groupId or both userId and contactId".into(),
            ))
        }
    };

    let ceiling = state.config.history_limit;
    let limit = query.limit.unwrap_or(ceiling).clamp(1, ceiling);

    let messages = state.router.history(key, limit).await?;
    Ok(Json(messages.iter().map(|m| m.to_event()).collect()))
}

async fn list_groups(
    State(state): State<AppState>,
    query: Result<Query<GroupsQuery>, QueryRejection>,
) -> Result<Json<Vec<Group>>, ServerError> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let user = UserId::from_wire(query.user_id)
        .ok_or_else(|| ServerError::BadRequest("Invalid user ID".into()))?;

    let groups = state.db.call(move |db| db.groups_for_user(user)).await?;
    Ok(Json(groups))
}

async fn create_group(
    State(state): State<AppState>,
    payload: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> Result<Json<CreateGroupResponse>, ServerError> {
    let Json(req) = payload?;

    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ServerError::BadRequest("Group name is required".into()));
    }
    let creator = UserId::from_wire(Some(req.creator_id))
        .ok_or_else(|| ServerError::BadRequest("Invalid creator ID".into()))?;
    let members: Vec<UserId> = req
        .member_ids
        .into_iter()
        .filter_map(|id| UserId::from_wire(Some(id)))
        .collect();

    let group = state
        .db
        .call(move |db| db.create_group(&name, creator, &members))
        .await?;

    info!(group = %group.id, creator = %creator, "Group created via API");

    Ok(Json(CreateGroupResponse {
        id: group.id,
        name: group.name,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_log::MessageLog;
    use axum::body::{Body, BodyDataStream};
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, Utc};
    use futures::StreamExt;
    use parlor_shared::{Message, NewMessage};
    use parlor_store::StoreError;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = ServerConfig {
            keepalive: None,
            ..ServerConfig::default()
        };
        AppState::new(Database::open_in_memory().unwrap(), config)
    }

    async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        read_json(app.clone().oneshot(request).await.unwrap()).await
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        read_json(app.clone().oneshot(request).await.unwrap()).await
    }

    async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn open_stream(app: &Router, user: i64) -> EventReader {
        let request = Request::get(format!("/events?userId={user}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        EventReader {
            body: response.into_body().into_data_stream(),
            buffer: String::new(),
        }
    }

    /// Splits an SSE body into `data:` payloads.
    struct EventReader {
        body: BodyDataStream,
        buffer: String,
    }

    impl EventReader {
        /// Next raw frame, including its terminating blank line.
        async fn next_frame(&mut self) -> String {
            tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    if let Some(end) = self.buffer.find("\n\n") {
                        return self.buffer.drain(..end + 2).collect();
                    }
                    let chunk = self.body.next().await.expect("stream ended").unwrap();
                    self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
                }
            })
            .await
            .expect("timed out waiting for event")
        }

        /// Next `data:` payload, skipping comment frames.
        async fn next(&mut self) -> Value {
            loop {
                let frame = self.next_frame().await;
                let data: String = frame
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim)
                    .collect();
                if !data.is_empty() {
                    return serde_json::from_str(&data).unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state());
        let (status, body) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_direct_message_end_to_end() {
        let state = test_state();
        let app = build_router(state.clone());

        let mut bob = open_stream(&app, 2).await;
        assert_eq!(bob.next().await, json!({"type": "connected"}));

        let (status, ack) = post_json(&app, "/api/send", json!({"from": 1, "to": 2, "content": "hi"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["status"], "ok");

        let event = bob.next().await;
        assert_eq!(event["type"], "message");
        assert_eq!(event["from"], 1);
        assert_eq!(event["to"], 2);
        assert_eq!(event["content"], "hi");
        assert!(event["timestamp"].as_i64().unwrap() > 0);

        let (status, history) = get_json(&app, "/api/messages?userId=2&contactId=1").await;
        assert_eq!(status, StatusCode::OK);
        let history = history.as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], event);
    }

    #[tokio::test]
    async fn test_group_message_end_to_end() {
        let state = test_state();
        let app = build_router(state.clone());

        let (status, group) = post_json(
            &app,
            "/api/groups",
            json!({"name": "trio", "creatorId": 1, "memberIds": [2, 3]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let group_id = group["id"].as_i64().unwrap();

        let mut streams = Vec::new();
        for user in 1..=3 {
            let mut reader = open_stream(&app, user).await;
            assert_eq!(reader.next().await["type"], "connected");
            streams.push(reader);
        }

        let (status, _) = post_json(
            &app,
            "/api/send",
            json!({"from": 1, "to": 0, "groupId": group_id, "content": "hello all"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        for reader in streams.iter_mut().skip(1) {
            let event = reader.next().await;
            assert_eq!(event["groupId"], group_id);
            assert_eq!(event["content"], "hello all");
        }

        // Typing marker to user 1 proves nothing else was queued before it.
        post_json(&app, "/api/typing", json!({"from": 2, "to": 1})).await;
        assert_eq!(streams[0].next().await, json!({"type": "typing", "from": 2}));
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_session() {
        let state = test_state();
        let app = build_router(state.clone());

        let mut reader = open_stream(&app, 5).await;
        reader.next().await;
        assert!(state.router.registry().lookup(UserId(5)).await.is_some());

        drop(reader);
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.router.registry().lookup(UserId(5)).await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session should be removed after disconnect");
    }

    #[tokio::test]
    async fn test_events_requires_user() {
        let app = build_router(test_state());
        let (status, body) = get_json(&app, "/events?userId=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid user ID"));
    }

    #[tokio::test]
    async fn test_malformed_send_is_rejected() {
        let state = test_state();
        let app = build_router(state.clone());

        let request = Request::post("/api/send")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = read_json(app.clone().oneshot(request).await.unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = post_json(&app, "/api/send", json!({"from": 1, "content": "nowhere"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(state.router.stats().sent, 0);
    }

    #[tokio::test]
    async fn test_typing_never_reaches_history() {
        let app = build_router(test_state());

        let (status, body) = post_json(&app, "/api/typing", json!({"from": 1, "to": 2})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));

        let (_, history) = get_json(&app, "/api/messages?userId=1&contactId=2").await;
        assert_eq!(history, json!([]));
    }

    #[tokio::test]
    async fn test_history_limit_is_capped() {
        let state = test_state();
        let app = build_router(state.clone());

        for n in 0..5 {
            post_json(&app, "/api/send", json!({"from": 1, "to": 2, "content": n.to_string()})).await;
        }

        let (_, history) = get_json(&app, "/api/messages?userId=1&contactId=2&limit=2").await;
        let contents: Vec<_> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(contents, vec!["3", "4"]);

        let (status, _) = get_json(&app, "/api/messages?userId=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_groups_listing() {
        let app = build_router(test_state());

        post_json(&app, "/api/groups", json!({"name": "b-team", "creatorId": 1, "memberIds": [2]})).await;
        post_json(&app, "/api/groups", json!({"name": "a-team", "creatorId": 2})).await;

        let (status, groups) = get_json(&app, "/api/groups?userId=2").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<_> = groups
            .as_array()
            .unwrap()
            .iter()
            .map(|g| g["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a-team", "b-team"]);

        let (status, _) = post_json(&app, "/api/groups", json!({"name": "  ", "creatorId": 1})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_reports_online_and_drops() {
        let state = ServerConfig {
            keepalive: None,
            queue_capacity: 1,
            ..ServerConfig::default()
        };
        let state = AppState::new(Database::open_in_memory().unwrap(), state);
        let app = build_router(state.clone());

        // Stream opened but never read: the loop parks on the link after the
        // connected event, so the single queue slot fills up.
        let _stalled = open_stream(&app, 2).await;
        for _ in 0..4 {
            post_json(&app, "/api/send", json!({"from": 1, "to": 2, "content": "x"})).await;
        }

        let (_, stats) = get_json(&app, "/stats").await;
        assert_eq!(stats["online"], 1);
        assert_eq!(stats["sent"], 4);
        assert!(stats["dropped"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_keepalive_comments_when_idle() {
        let config = ServerConfig {
            keepalive: Some(Duration::from_millis(50)),
            ..ServerConfig::default()
        };
        let app = build_router(AppState::new(Database::open_in_memory().unwrap(), config));

        let mut reader = open_stream(&app, 1).await;
        assert_eq!(reader.next().await, json!({"type": "connected"}));

        let frame = reader.next_frame().await;
        assert!(frame.starts_with(':'), "expected keep-alive comment, got {frame:?}");
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_origin() {
        let app = build_router(test_state());

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/send")
            .header("origin", "https://chat.example.com")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert!(response.status().is_success());
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        let methods = response.headers()["access-control-allow-methods"]
            .to_str()
            .unwrap()
            .to_string();
        assert!(methods.contains("POST"));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let config = ServerConfig {
            keepalive: None,
            max_body_bytes: 64,
            ..ServerConfig::default()
        };
        let state = AppState::new(Database::open_in_memory().unwrap(), config);
        let app = build_router(state.clone());

        let (status, body) = post_json(
            &app,
            "/api/send",
            json!({"from": 1, "to": 2, "content": "x".repeat(256)}),
        )
        .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].is_string());
        assert_eq!(state.router.stats().sent, 0);

        let (status, _) = post_json(&app, "/api/send", json!({"from": 1, "to": 2, "content": "ok"})).await;
        assert_eq!(status, StatusCode::OK);
    }

    struct UnwritableLog;

    #[async_trait::async_trait]
    impl MessageLog for UnwritableLog {
        async fn append(
            &self,
            _message: NewMessage,
            _timestamp: DateTime<Utc>,
        ) -> Result<Message, ServerError> {
            Err(ServerError::Store(StoreError::Corrupt("read-only volume".into())))
        }

        async fn history(
            &self,
            _key: ConversationKey,
            _limit: u32,
        ) -> Result<Vec<Message>, ServerError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_returns_500() {
        let db = SharedDatabase::new(Database::open_in_memory().unwrap());
        let state = AppState {
            router: MessageRouter::new(
                Arc::new(UnwritableLog),
                Arc::new(SqliteMembership::new(db.clone())),
                ConnectionRegistry::new(),
            ),
            db,
            config: Arc::new(ServerConfig {
                keepalive: None,
                ..ServerConfig::default()
            }),
        };
        let app = build_router(state.clone());

        let mut bob = open_stream(&app, 2).await;
        assert_eq!(bob.next().await, json!({"type": "connected"}));

        let (status, body) = post_json(&app, "/api/send", json!({"from": 1, "to": 2, "content": "lost"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Storage error"}));

        // Nothing was fanned out: the next event bob sees is this typing marker.
        post_json(&app, "/api/typing", json!({"from": 1, "to": 2})).await;
        assert_eq!(bob.next().await, json!({"type": "typing", "from": 1}));
        assert_eq!(state.router.stats().sent, 0);
    }
}
