//! HTTP surface: the event stream, presence, roster and refresh hooks.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::Stream;

use rollcall_core::{RosterChanges, StoreError};
use rollcall_store::{roster, Context, ServerEvent, Subscription};

pub fn router(ctx: Context) -> Router {
    Router::new()
        .route("/events", get(events))
        .route("/presence", get(presence))
        .route("/roster", get(list_roster))
        .route("/roster/save", post(save_roster))
        .route("/refresh", post(refresh))
        .route("/health", get(health))
        .with_state(ctx)
}

/// A [`StoreError`] rendered as a JSON failure with a matching status.
#[derive(Debug)]
pub struct ApiError(pub StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            StoreError::Backing(_) => StatusCode::BAD_GATEWAY,
            StoreError::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::Interrupted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = Json(json!({ "success": false, "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Hub subscription adapted to an SSE stream. Dropping it (client gone)
/// unregisters the connection.
struct EventStream {
    sub: Subscription,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.sub
            .poll_recv(cx)
            .map(|next| next.map(|event| Ok(sse_event(&event))))
    }
}

fn sse_event(event: &ServerEvent) -> Event {
    Event::default()
        .event(event.kind.as_str())
        .data(event.payload.to_string())
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    name: Option<String>,
}

async fn events(
    State(ctx): State<Context>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let name = query.name.unwrap_or_default();
    let sub = ctx.hub.subscribe(&name)?;
    Ok(Sse::new(EventStream { sub }))
}

async fn presence(State(ctx): State<Context>) -> Json<serde_json::Value> {
    Json(json!({ "names": ctx.hub.current_subscriber_names() }))
}

async fn list_roster(State(ctx): State<Context>) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = roster::list_roster(&ctx).await?;
    Ok(Json(json!({ "roster": entries })))
}

#[derive(Debug, Deserialize)]
struct SaveRosterBody {
    /// Acting member.
    email: String,
    #[serde(flatten)]
    changes: RosterChanges,
}

async fn save_roster(
    State(ctx): State<Context>,
    Json(body): Json<SaveRosterBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.email.trim().is_empty() {
        return Err(StoreError::Validation("an acting email is required".to_string()).into());
    }
    let caller = roster::caller(&ctx, &body.email).await?;
    let report = roster::save_roster_changes(&ctx, &caller, body.changes).await?;
    Ok(Json(json!({
        "success": true,
        "message": report.summary(),
        "report": report,
    })))
}

#[derive(Debug, Deserialize)]
struct RefreshQuery {
    table: Option<String>,
}

async fn refresh(
    State(ctx): State<Context>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let table = query.table.unwrap_or_default();
    let table = table.trim();
    if table.is_empty() {
        return Err(StoreError::Validation("a table name is required".to_string()).into());
    }
    publish_refresh(&ctx, table);
    Ok(Json(json!({ "success": true, "table": table })))
}

/// Invalidate `table` in both workbooks and tell subscribers to re-fetch.
pub fn publish_refresh(ctx: &Context, table: &str) {
    ctx.main.invalidate(table);
    ctx.rush.invalidate(table);
    ctx.notify_changed(table);
}

async fn health(State(ctx): State<Context>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "subscribers": ctx.hub.connection_count(),
        "cacheEntries": ctx.cache.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use rollcall_core::Config;
    use rollcall_store::roster::ROSTER_TABLE;
    use rollcall_store::{EventKind, MemoryBackends};
    use serde_json::Value;
    use tower::ServiceExt;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn seeded() -> (Context, MemoryBackends) {
        let (ctx, backends) = Context::in_memory(Config::default());
        backends.main.seed(
            ROSTER_TABLE,
            vec![
                row(&["Email", "Name", "Position"]),
                row(&["a@x", "A", "Alpha"]),
                row(&["b@x", "B", "Beta"]),
                row(&["p@x", "P", "Pledge"]),
            ],
        );
        (ctx, backends)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn events_without_name_is_rejected() {
        let (ctx, _) = seeded();
        for uri in ["/events", "/events?name=", "/events?name=%20%20"] {
            let response = router(ctx.clone())
                .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
        assert_eq!(ctx.hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn events_stream_starts_with_presence() {
        let (ctx, _) = seeded();
        let response = router(ctx.clone())
            .oneshot(
                Request::get("/events?name=Ann")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(ctx.hub.current_subscriber_names(), vec!["Ann"]);

        let mut body = response.into_body();
        let frame = body
            .frame()
            .await
            .expect("frame")
            .expect("frame ok")
            .into_data()
            .expect("data frame");
        let text = String::from_utf8(frame.to_vec()).expect("utf8");
        assert!(text.contains("event: presence"), "{text}");
        assert!(text.contains(r#"["Ann"]"#), "{text}");

        drop(body);
        assert_eq!(ctx.hub.connection_count(), 0);
    }

    #[test]
    fn event_stream_wakes_on_publish() {
        let (ctx, _) = seeded();
        let mut sub = ctx.hub.subscribe("Ann").expect("subscribe");
        while sub.try_recv().is_some() {}

        let mut stream = tokio_test::task::spawn(EventStream { sub });
        assert!(stream.poll_next().is_pending());

        ctx.notify_changed("Sigma");
        assert!(stream.is_woken());
        assert!(matches!(stream.poll_next(), Poll::Ready(Some(Ok(_)))));

        ctx.hub.close_all();
        assert!(matches!(stream.poll_next(), Poll::Ready(None)));
    }

    #[tokio::test]
    async fn presence_lists_subscribers() {
        let (ctx, _) = seeded();
        let _bo = ctx.hub.subscribe("Bo").expect("subscribe");
        let response = router(ctx)
            .oneshot(Request::get("/presence").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(body_json(response).await["names"], json!(["Bo"]));
    }

    #[tokio::test]
    async fn roster_save_reports_summary() {
        let (ctx, backends) = seeded();
        let response = router(ctx)
            .oneshot(post_json(
                "/roster/save",
                json!({
                    "email": "a@x",
                    "updatedRoster": [
                        {"email": "a@x", "name": "A2", "position": "Alpha"},
                        {"email": "c@x", "name": "C", "position": "Chi"}
                    ],
                    "removedBrothers": [{"email": "b@x"}]
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "1 updated, 1 removed, 1 added");
        assert_eq!(body["report"]["addCount"], 1);

        let table = backends.main.snapshot(ROSTER_TABLE).expect("table");
        assert!(table.contains(&row(&["c@x", "C", "Chi"])));
    }

    #[tokio::test]
    async fn roster_save_by_non_manager_is_forbidden() {
        let (ctx, backends) = seeded();
        let before = backends.main.snapshot(ROSTER_TABLE);
        let response = router(ctx)
            .oneshot(post_json(
                "/roster/save",
                json!({"email": "p@x", "updatedRoster": [], "removedBrothers": [{"email": "a@x"}]}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["success"], false);
        assert_eq!(backends.main.snapshot(ROSTER_TABLE), before);
    }

    #[tokio::test]
    async fn roster_lists_entries() {
        let (ctx, _) = seeded();
        let response = router(ctx)
            .oneshot(Request::get("/roster").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let body = body_json(response).await;
        assert_eq!(body["roster"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["roster"][0]["email"], "a@x");
    }

    #[tokio::test]
    async fn refresh_invalidates_and_publishes() {
        let (ctx, backends) = seeded();
        roster::list_roster(&ctx).await.expect("warm");
        let mut sub = ctx.hub.subscribe("Watcher").expect("subscribe");
        while sub.try_recv().is_some() {}

        let response = router(ctx.clone())
            .oneshot(
                Request::post("/refresh?table=Sigma")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let event = sub.try_recv().expect("event");
        assert_eq!(event.kind, EventKind::Refresh);
        assert_eq!(event.payload["table"], "Sigma");

        roster::list_roster(&ctx).await.expect("re-read");
        assert_eq!(backends.main.read_count(ROSTER_TABLE), 2);
    }

    #[tokio::test]
    async fn refresh_without_table_is_rejected() {
        let (ctx, _) = seeded();
        let response = router(ctx)
            .oneshot(Request::post("/refresh").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (StoreError::not_found("table 'X'"), StatusCode::NOT_FOUND),
            (StoreError::Conflict("closed".into()), StatusCode::CONFLICT),
            (StoreError::Validation("bad".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (ctx, _) = seeded();
        let response = router(ctx)
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }
}
