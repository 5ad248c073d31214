use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use pkg_state::{EventType, WatchEvent};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    /// Object kind, e.g. `pods` or `elasticquotas`. All kinds when absent.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub seq: Option<u64>,
}

/// Wire form of a watch event: objects are sent decoded, not as raw bytes.
#[derive(Debug, Serialize)]
struct WatchMessage {
    seq: u64,
    #[serde(rename = "type")]
    event_type: EventType,
    key: String,
    object: Option<serde_json::Value>,
}

fn to_sse(event: &WatchEvent, kind: Option<&str>) -> Option<Event> {
    if kind.is_some_and(|k| event.kind() != Some(k)) {
        return None;
    }
    let object = event.decode_value().or_else(|| event.decode_prev());
    let msg = WatchMessage {
        seq: event.seq,
        event_type: event.event_type,
        key: event.key.clone(),
        object,
    };
    serde_json::to_string(&msg)
        .ok()
        .map(|data| Event::default().data(data))
}

/// GET /api/v1/watch: SSE stream of buffered events since `seq`, then live events.
pub async fn watch_events(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let from_seq = query.seq.unwrap_or(0);
    info!(
        "Watch subscription: kind={}, from_seq={}",
        query.kind.as_deref().unwrap_or("*"),
        from_seq
    );

    // subscribe first so nothing falls between the replay and the live stream
    let rx = state.store.event_log.subscribe();
    let buffered = state.store.event_log.events_since(from_seq).await;
    let last_replayed = buffered.last().map(|e| e.seq).unwrap_or(from_seq);

    let replay_kind = query.kind.clone();
    let buffered_stream = tokio_stream::iter(
        buffered
            .into_iter()
            .filter_map(move |e| to_sse(&e, replay_kind.as_deref()))
            .map(Ok::<_, Infallible>),
    );

    let live_kind = query.kind;
    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.seq > last_replayed => {
            to_sse(&event, live_kind.as_deref()).map(Ok::<_, Infallible>)
        }
        _ => None,
    });

    Sse::new(buffered_stream.chain(live_stream)).keep_alive(KeepAlive::default())
}
