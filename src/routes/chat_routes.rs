use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{self, HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chat_relay_wire::{ChatReply, ChatRequest, TitleRequest, TitleResponse};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::errors::AppError;
use crate::service::chat_service::ChatService;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// POST `/api/chat/stream` — relays one generation as `data:` events.
///
/// Validation failures come back as an ordinary JSON error before the
/// stream opens. Once streaming, every outcome is a single terminal event.
pub async fn chat_stream_handler(
    State(svc): State<ChatService>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    let cancel = CancellationToken::new();
    let events = svc.stream_chat(request, cancel.clone()).await?;

    // Cancels the relay when the client hangs up and axum drops the body.
    let guard = cancel.drop_guard();
    let stream = events.map(move |event| {
        let _guard = &guard;
        Ok::<_, Infallible>(Event::default().data(event.to_payload()))
    });

    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL));
    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    ))
}

/// POST `/api/chat` — same prompt, one complete reply
pub async fn chat_handler(
    State(svc): State<ChatService>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    Ok(Json(svc.chat(request).await?))
}

/// POST `/api/chat/title`
pub async fn title_handler(
    State(svc): State<ChatService>,
    Json(body): Json<TitleRequest>,
) -> Result<Json<TitleResponse>, AppError> {
    let title = svc.suggest_title(&body.message).await?;
    Ok(Json(TitleResponse { title }))
}
