//! Realtime WebSocket routes.
//!
//! Two logical channels: a user-scoped notification channel and a
//! course-scoped progress channel. The transport has no header concept, so
//! the bearer credential arrives as a `token` query parameter; bad
//! credentials close the socket with a distinguishing code instead of an
//! HTTP error body.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::api::server::AppState;
use crate::progress::ProgressUpdate;
use crate::realtime::{ClientMessage, ConnectionHandle, ServerMessage};

/// Close code for missing/invalid credentials.
const CLOSE_UNAUTHENTICATED: u16 = 4001;
/// Close code for a course channel the user is not enrolled in.
const CLOSE_NOT_ENROLLED: u16 = 4003;
/// Close code for a server that is missing its collaborators.
const CLOSE_UNAVAILABLE: u16 = 1011;

/// Create the websocket router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(notifications_ws))
        .route("/progress/{course_id}", get(progress_ws))
}

#[derive(Debug, Deserialize)]
pub struct WsAuthParams {
    /// Bearer credential; the transport has no Authorization header.
    pub token: Option<String>,
}

/// Resolve a token to a user id, if valid.
fn ws_user(state: &AppState, token: Option<&str>) -> Option<String> {
    let jwt_service = state.jwt_service.as_ref()?;
    let claims = jwt_service.validate_token(token?).ok()?;
    Some(claims.sub)
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        })))
        .await;
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(frame) => sender.send(Message::Text(frame.into())).await,
        Err(_) => Ok(()),
    }
}

/// WebSocket endpoint for the user-scoped notification channel.
async fn notifications_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(auth): Query<WsAuthParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_notifications(socket, state, auth.token))
}

async fn handle_notifications(socket: WebSocket, state: AppState, token: Option<String>) {
    if token.is_none() {
        close_with(socket, CLOSE_UNAUTHENTICATED, "Authentication required").await;
        return;
    }
    let Some(user_id) = ws_user(&state, token.as_deref()) else {
        close_with(socket, CLOSE_UNAUTHENTICATED, "Invalid token").await;
        return;
    };
    let Some(enrollments) = state.enrollments.clone() else {
        close_with(socket, CLOSE_UNAVAILABLE, "Service unavailable").await;
        return;
    };

    let (mut sender, mut receiver) = socket.split();
    let (connection, mut outbox) = ConnectionHandle::new(&user_id);
    state.registry.register(&connection);
    debug!(user_id = %user_id, connection_id = %connection.id(), "Notification channel opened");

    if send_message(&mut sender, &ServerMessage::connected(&user_id))
        .await
        .is_err()
    {
        state.registry.unregister(&connection);
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match parse_client_message(&text) {
                            ParsedMessage::Invalid => {
                                Some(ServerMessage::error("Invalid JSON format"))
                            }
                            ParsedMessage::Unknown => None,
                            ParsedMessage::Known(ClientMessage::Ping) => {
                                Some(ServerMessage::pong())
                            }
                            ParsedMessage::Known(ClientMessage::SubscribeCourse { course_id }) => {
                                // Not enrolled: silent no-op, the connection
                                // stays open and no bucket is touched.
                                match enrollments.is_enrolled(&user_id, &course_id).await {
                                    Ok(true) => {
                                        state.registry.subscribe_course(&connection, &course_id);
                                        Some(ServerMessage::subscription_confirmed(&course_id))
                                    }
                                    _ => None,
                                }
                            }
                            ParsedMessage::Known(ClientMessage::UnsubscribeCourse { course_id }) => {
                                state.registry.unsubscribe_course(&connection, &course_id);
                                Some(ServerMessage::unsubscription_confirmed(&course_id))
                            }
                            // Progress updates belong to the course channel.
                            ParsedMessage::Known(ClientMessage::ProgressUpdate { .. }) => None,
                        };
                        if let Some(reply) = reply
                            && send_message(&mut sender, &reply).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            pushed = outbox.recv() => {
                match pushed {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.registry.unregister(&connection);
    debug!(user_id = %user_id, "Notification channel closed");
}

/// WebSocket endpoint for the course-scoped progress channel.
async fn progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    Query(auth): Query<WsAuthParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_progress(socket, state, course_id, auth.token))
}

async fn handle_progress(
    socket: WebSocket,
    state: AppState,
    course_id: String,
    token: Option<String>,
) {
    if token.is_none() {
        close_with(socket, CLOSE_UNAUTHENTICATED, "Authentication required").await;
        return;
    }
    let Some(user_id) = ws_user(&state, token.as_deref()) else {
        close_with(socket, CLOSE_UNAUTHENTICATED, "Invalid token").await;
        return;
    };
    let (Some(enrollments), Some(progress_service)) =
        (state.enrollments.clone(), state.progress_service.clone())
    else {
        close_with(socket, CLOSE_UNAVAILABLE, "Service unavailable").await;
        return;
    };

    // Course-scoped channel requires enrollment up front.
    if !enrollments
        .is_enrolled(&user_id, &course_id)
        .await
        .unwrap_or(false)
    {
        close_with(socket, CLOSE_NOT_ENROLLED, "Not enrolled in course").await;
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    let (connection, mut outbox) = ConnectionHandle::new(&user_id);
    state.registry.register(&connection);
    state.registry.subscribe_course(&connection, &course_id);
    debug!(user_id = %user_id, course_id = %course_id, "Progress channel opened");

    // Initial snapshot of the caller's progress in this course.
    let snapshot = progress_service
        .course_snapshot(&user_id, &course_id)
        .await
        .unwrap_or_default();
    if send_message(
        &mut sender,
        &ServerMessage::initial_progress(&course_id, &snapshot),
    )
    .await
    .is_err()
    {
        state.registry.unregister(&connection);
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match parse_client_message(&text) {
                            ParsedMessage::Invalid => {
                                Some(ServerMessage::error("Invalid JSON format"))
                            }
                            ParsedMessage::Unknown => None,
                            ParsedMessage::Known(ClientMessage::Ping) => {
                                Some(ServerMessage::pong())
                            }
                            ParsedMessage::Known(ClientMessage::ProgressUpdate {
                                content_id,
                                progress_percentage,
                                last_position,
                            }) => {
                                // Persist + fan out through the one bridge
                                // operation shared with the REST ingress.
                                // The sender is in the course bucket, so it
                                // sees its own update echoed back.
                                let update = ProgressUpdate {
                                    content_id,
                                    progress_percentage,
                                    last_position,
                                };
                                match progress_service
                                    .apply_update(&user_id, &course_id, &update)
                                    .await
                                {
                                    Ok(_) => None,
                                    Err(e) => Some(ServerMessage::error(format!(
                                        "Error processing message: {e}"
                                    ))),
                                }
                            }
                            // Subscription management belongs to the
                            // notification channel.
                            ParsedMessage::Known(_) => None,
                        };
                        if let Some(reply) = reply
                            && send_message(&mut sender, &reply).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            pushed = outbox.recv() => {
                match pushed {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Abrupt or clean, either way every bucket membership goes.
    state.registry.unregister(&connection);
    debug!(user_id = %user_id, course_id = %course_id, "Progress channel closed");
}

enum ParsedMessage {
    Known(ClientMessage),
    /// Valid JSON, but not a message shape we know. Silently ignored.
    Unknown,
    /// Not JSON at all.
    Invalid,
}

fn parse_client_message(text: &str) -> ParsedMessage {
    match serde_json::from_str::<serde_json::Value>(text) {
        Err(_) => ParsedMessage::Invalid,
        Ok(value) => match serde_json::from_value::<ClientMessage>(value) {
            Ok(message) => ParsedMessage::Known(message),
            Err(_) => ParsedMessage::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::test_support::jwt;
    use crate::config::UploadConfig;
    use crate::database::models::{ContentDbModel, ContentType, EnrollmentDbModel};
    use crate::database::repositories::content::test_support::{seed_course, seed_user};
    use crate::database::repositories::{
        ContentRepository, EnrollmentRepository, SqlxContentRepository, SqlxEnrollmentRepository,
        SqlxProgressRepository, SqlxTaskRepository,
    };
    use crate::database::test_pool;
    use crate::progress::ProgressService;
    use crate::queue::TaskQueue;
    use crate::realtime::ConnectionRegistry;
    use crate::storage::MemoryObjectStore;
    use futures::{SinkExt, StreamExt};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite;

    struct Fixture {
        base: String,
        token: String,
        content_id: String,
        registry: Arc<ConnectionRegistry>,
        progress_service: Arc<ProgressService>,
    }

    /// Serve the ws router on a real listener; tungstenite needs a socket.
    async fn fixture() -> Fixture {
        let pool = test_pool().await;
        seed_course(&pool, "course-1", "Rust Basics").await;
        seed_user(&pool, "user-1").await;

        let contents = Arc::new(SqlxContentRepository::new(pool.clone()));
        let content = ContentDbModel::new("course-1", ContentType::Video, "Lesson 1", "u", 0);
        contents.create(&content).await.unwrap();

        let enrollments = Arc::new(SqlxEnrollmentRepository::new(pool.clone()));
        enrollments
            .create(&EnrollmentDbModel::new("user-1", "course-1"))
            .await
            .unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let progress_service = Arc::new(ProgressService::new(
            Arc::new(SqlxProgressRepository::new(pool.clone())),
            registry.clone(),
        ));
        let queue = Arc::new(TaskQueue::new(Arc::new(SqlxTaskRepository::new(pool))));

        let jwt = jwt();
        let token = jwt.generate_token("user-1", vec![]).unwrap();
        let state = AppState::with_services(
            Some(jwt),
            contents,
            enrollments,
            progress_service.clone(),
            queue,
            Arc::new(MemoryObjectStore::new()),
            registry.clone(),
            UploadConfig::default(),
        );

        let app = Router::new().nest("/api/ws", router()).with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Fixture {
            base: format!("ws://{addr}"),
            token,
            content_id: content.id,
            registry,
            progress_service,
        }
    }

    async fn next_text(
        ws: &mut (impl futures::Stream<Item = Result<tungstenite::Message, tungstenite::Error>>
              + Unpin),
    ) -> serde_json::Value {
        loop {
            match ws.next().await.expect("socket closed").unwrap() {
                tungstenite::Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                }
                tungstenite::Message::Close(_) => panic!("unexpected close"),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_notifications_welcome_ping_and_subscribe() {
        let fx = fixture().await;
        let url = format!("{}/api/ws/notifications?token={}", fx.base, fx.token);
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        let welcome = next_text(&mut ws).await;
        assert_eq!(welcome["type"], "connection");
        assert_eq!(welcome["user_id"], "user-1");

        ws.send(tungstenite::Message::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();
        let pong = next_text(&mut ws).await;
        assert_eq!(pong["type"], "pong");

        ws.send(tungstenite::Message::Text(
            r#"{"type":"subscribe_course","course_id":"course-1"}"#.into(),
        ))
        .await
        .unwrap();
        let confirmed = next_text(&mut ws).await;
        assert_eq!(confirmed["type"], "subscription_confirmed");
        assert_eq!(confirmed["course_id"], "course-1");
        assert_eq!(fx.registry.stats().course_buckets, 1);
    }

    #[tokio::test]
    async fn test_subscribe_unenrolled_course_is_silent_noop() {
        let fx = fixture().await;
        let url = format!("{}/api/ws/notifications?token={}", fx.base, fx.token);
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        let _welcome = next_text(&mut ws).await;

        // Not enrolled in course-x: no confirmation, no registry mutation,
        // and the connection stays usable.
        ws.send(tungstenite::Message::Text(
            r#"{"type":"subscribe_course","course_id":"course-x"}"#.into(),
        ))
        .await
        .unwrap();
        ws.send(tungstenite::Message::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();

        let next = next_text(&mut ws).await;
        assert_eq!(next["type"], "pong");
        assert_eq!(fx.registry.stats().course_buckets, 0);
    }

    #[tokio::test]
    async fn test_invalid_json_gets_error_frame() {
        let fx = fixture().await;
        let url = format!("{}/api/ws/notifications?token={}", fx.base, fx.token);
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        let _welcome = next_text(&mut ws).await;

        ws.send(tungstenite::Message::Text("not json at all".into()))
            .await
            .unwrap();
        let error = next_text(&mut ws).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["message"], "Invalid JSON format");
    }

    #[tokio::test]
    async fn test_missing_token_closes_with_4001() {
        let fx = fixture().await;
        let url = format!("{}/api/ws/notifications", fx.base);
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        match ws.next().await.unwrap().unwrap() {
            tungstenite::Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4001);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(fx.registry.stats().total_connections, 0);
    }

    #[tokio::test]
    async fn test_progress_channel_requires_enrollment() {
        let fx = fixture().await;
        let url = format!(
            "{}/api/ws/progress/other-course?token={}",
            fx.base, fx.token
        );
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        match ws.next().await.unwrap().unwrap() {
            tungstenite::Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4003);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_progress_update_persists_and_echoes_to_subscribers() {
        let fx = fixture().await;
        let url = format!("{}/api/ws/progress/course-1?token={}", fx.base, fx.token);
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        let initial = next_text(&mut ws).await;
        assert_eq!(initial["type"], "initial_progress");
        assert_eq!(initial["progress"].as_array().unwrap().len(), 0);

        ws.send(tungstenite::Message::Text(
            format!(
                r#"{{"type":"progress_update","content_id":"{}","progress_percentage":80,"last_position":240}}"#,
                fx.content_id
            )
            .into(),
        ))
        .await
        .unwrap();

        // The sender is subscribed to the course bucket, so the broadcast
        // comes back to it.
        let updated = next_text(&mut ws).await;
        assert_eq!(updated["type"], "progress_updated");
        assert_eq!(updated["progress_percentage"], 80);
        assert_eq!(updated["completed"], false);

        let row = fx
            .progress_service
            .get("user-1", &fx.content_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.progress_percentage, 80);
        assert_eq!(row.last_position, Some(240));
    }
}
