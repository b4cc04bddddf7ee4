//! SSE streaming endpoint for live stage progress.
//!
//! GET /streams/asset/:asset_id
//!
//! Subscribes to the asset's stream topic and forwards stage events as
//! SSE. Opens with a `connected` hello so clients know the subscription
//! is live before the first real event; a lagging client gets a `lagged`
//! event with the number of missed messages instead of silently losing
//! them.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::kernel::stream_hub::asset_topic;
use crate::server::app::AppState;

pub async fn asset_stream_handler(
    Extension(state): Extension<AppState>,
    Path(asset_id): Path<Uuid>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.hub.subscribe(&asset_topic(asset_id)).await;

    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let events = BroadcastStream::new(rx).filter_map(|result| async {
        match result {
            Ok(value) => {
                let event_name = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("message");
                Event::default()
                    .event(event_name)
                    .json_data(&value)
                    .ok()
                    .map(Ok)
            }
            Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                Event::default()
                    .event("lagged")
                    .json_data(&serde_json::json!({ "missed": n }))
                    .ok()
                    .map(Ok)
            }
        }
    });

    Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}
