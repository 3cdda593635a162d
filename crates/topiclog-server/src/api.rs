//! Query API handlers.
//!
//! Provides:
//! - `GET /api/topics`: every topic in the log
//! - `GET /api/events?topic=&from=&to=`: stored history for one topic
//! - `GET /api/live?topic=`: the in-memory recent samples
//! - `GET /events/stream?topic=`: SSE stream of arriving samples

use crate::live::LiveSample;
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{convert::Infallible, sync::Arc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use topiclog_store::Sample;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Response for `GET /api/topics`.
#[derive(Debug, Serialize)]
pub struct TopicsResponse {
    /// Topic names, ascending.
    pub topics: Vec<String>,
}

/// Handler for `GET /api/topics`.
pub async fn get_topics_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<TopicsResponse>, Response> {
    let store = Arc::clone(&state.store);
    let topics = tokio::task::spawn_blocking(move || store.get_topics())
        .await
        .map_err(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("task join error: {}", e),
            )
        })?;
    Ok(Json(TopicsResponse { topics }))
}

/// Query parameters for `GET /api/events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// The topic to read.
    pub topic: String,
    /// Inclusive lower bound (RFC 3339 or `YYYY-MM-DD HH:MM:SS[.fff]` UTC).
    pub from: Option<String>,
    /// Inclusive upper bound, same formats as `from`.
    pub to: Option<String>,
}

/// Response for `GET /api/events`.
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    /// The requested topic.
    pub topic: String,
    /// Samples in timestamp order.
    pub events: Vec<Sample>,
    /// Number of samples returned.
    pub count: usize,
}

/// Parses a query bound. Accepts RFC 3339 or the stored column layout.
pub fn parse_bound(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Handler for `GET /api/events`.
pub async fn get_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, Response> {
    let bound = |raw: &Option<String>, name: &str| match raw.as_deref() {
        None => Ok(None),
        Some(s) => parse_bound(s).map(Some).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid {name} timestamp: {s}"),
            )
        }),
    };
    let from = bound(&params.from, "from")?;
    let to = bound(&params.to, "to")?;

    let store = Arc::clone(&state.store);
    let topic = params.topic.clone();
    let events = tokio::task::spawn_blocking(move || store.get_events(&topic, from, to))
        .await
        .map_err(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("task join error: {}", e),
            )
        })?
        .map_err(|e| {
            tracing::error!(topic = %params.topic, error = %e, "event query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let count = events.len();
    Ok(Json(EventsResponse {
        topic: params.topic,
        events,
        count,
    }))
}

/// Query parameters for `GET /api/live` and `GET /events/stream`.
#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    /// Restrict to one topic.
    pub topic: Option<String>,
}

/// Latest sample for one topic.
#[derive(Debug, Serialize)]
pub struct LatestEntry {
    /// The topic.
    pub topic: String,
    /// Its most recent sample, if any has arrived since start-up.
    pub latest: Option<Sample>,
}

/// Handler for `GET /api/live`.
///
/// With `topic`, returns that topic's recent samples (404 if unknown);
/// without, the latest sample of every known topic.
pub async fn get_live_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<LiveQuery>,
) -> Response {
    match params.topic {
        Some(topic) => match state.live.samples(&topic) {
            Some(samples) => Json(json!({
                "topic": topic,
                "count": samples.len(),
                "samples": samples,
            }))
            .into_response(),
            None => error_response(StatusCode::NOT_FOUND, format!("unknown topic: {topic}")),
        },
        None => {
            let topics: Vec<LatestEntry> = state
                .live
                .topics()
                .into_iter()
                .map(|topic| LatestEntry {
                    latest: state.live.latest(&topic),
                    topic,
                })
                .collect();
            Json(json!({ "topics": topics })).into_response()
        }
    }
}

/// Handler for `GET /events/stream`.
///
/// Streams arriving samples via SSE, optionally for one topic. The stream
/// ends when the server begins shutting down.
pub async fn get_event_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<LiveQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let topic_filter = params.topic;
    let stream = BroadcastStream::new(state.live_tx.subscribe());

    let mapped_stream = stream.filter_map(move |result| match result {
        Ok(sample) => {
            if let Some(ref topic) = topic_filter {
                if &sample.topic != topic {
                    return None;
                }
            }
            sse_event(&sample)
        }
        Err(broadcast_error) => {
            tracing::warn!(
                error = %broadcast_error,
                "live SSE stream lagged; samples were dropped for this subscriber"
            );
            None
        }
    });

    let mut shutdown = state.shutdown_signal();
    let stopped = async move {
        let _ = shutdown.wait_for(|stopping| *stopping).await;
    };
    let bounded = futures_util::StreamExt::take_until(mapped_stream, stopped);

    Sse::new(bounded).keep_alive(KeepAlive::default())
}

fn sse_event(sample: &LiveSample) -> Option<Result<Event, Infallible>> {
    match serde_json::to_string(sample) {
        Ok(data) => Some(Ok(Event::default().event("sample").data(data))),
        Err(e) => {
            tracing::error!(topic = %sample.topic, error = %e, "failed to serialize live sample");
            None
        }
    }
}
