//! HTTP API handlers

use crate::bus::{BusEvent, SharedBus};
use crate::exchange;
use crate::fetch::NetFetch;
use crate::mpd::PlayerStatus;
use crate::renderer::{Renderer, SourceError};
use crate::services::{RadioError, ReceiverError, VolumeError};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

/// Buffers in flight between a network fetch and the HTTP response
const STREAM_EXCHANGE_DEPTH: usize = 16;
/// How long `/stream` waits for the upstream response headers
const STREAM_HEADER_WAIT: Duration = Duration::from_secs(10);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub renderer: Arc<Renderer>,
    pub bus: SharedBus,
    /// Hosts `/stream` may fetch from; empty allows any
    pub stream_hosts: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(renderer: Arc<Renderer>, bus: SharedBus) -> Self {
        Self {
            renderer,
            bus,
            stream_hosts: Arc::new(Vec::new()),
        }
    }

    pub fn with_allowed_stream_hosts(mut self, hosts: Vec<String>) -> Self {
        self.stream_hosts = Arc::new(hosts);
        self
    }
}

/// All API routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/services/{name}/state", get(service_state_handler))
        .route("/volume", post(volume_handler))
        .route("/mute", post(mute_handler))
        .route("/receiver", get(receiver_handler))
        .route("/receiver/sender", post(receiver_sender_handler))
        .route("/receiver/play", post(receiver_play_handler))
        .route("/receiver/stop", post(receiver_stop_handler))
        .route("/radio", get(radio_handler))
        .route("/radio/channel", post(radio_channel_handler))
        .route("/radio/play", post(radio_play_handler))
        .route("/radio/stop", post(radio_stop_handler))
        .route("/source", post(source_handler))
        .route("/events", get(events_handler))
        .route("/stream", get(stream_handler))
        .with_state(state)
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub mpd_connected: bool,
    pub player: PlayerStatus,
    pub receiver: &'static str,
    pub source: Option<&'static str>,
    pub bus_subscribers: usize,
}

/// GET /status - Service health check with the cached player snapshot
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let (mpd_connected, player) = {
        let player = state.renderer.player().lock().await;
        (player.is_connected(), player.status().clone())
    };
    let receiver = state.renderer.receiver().transport_state().await.as_str();
    let source = state.renderer.active_source().await;

    Json(StatusResponse {
        service: "mpd-renderer-bridge",
        version: env!("CARGO_PKG_VERSION"),
        git_sha: env!("MRB_GIT_SHA"),
        mpd_connected,
        player,
        receiver,
        source,
        bus_subscribers: state.bus.subscriber_count(),
    })
}

/// GET /services/{name}/state - Full state variable map of one service
pub async fn service_state_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.renderer.service(&name) {
        Some(service) => (StatusCode::OK, Json(service.make_state().await)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Service not found: {}", name),
        ),
    }
}

// =============================================================================
// Volume handlers
// =============================================================================

/// Volume request body
#[derive(Deserialize)]
pub struct VolumeRequest {
    pub value: i32,
}

/// Mute request body
#[derive(Deserialize)]
pub struct MuteRequest {
    pub mute: bool,
}

fn volume_error_response(e: VolumeError) -> Response {
    match e {
        VolumeError::Unsupported(_) => error_response(StatusCode::BAD_REQUEST, e),
        VolumeError::Player(_) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

/// POST /volume - Set the volume (0-100)
pub async fn volume_handler(
    State(state): State<AppState>,
    Json(req): Json<VolumeRequest>,
) -> impl IntoResponse {
    match state.renderer.volume().set_volume(req.value).await {
        Ok(volume) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "volume": volume})),
        )
            .into_response(),
        Err(e) => volume_error_response(e),
    }
}

/// POST /mute - Mute or unmute
pub async fn mute_handler(
    State(state): State<AppState>,
    Json(req): Json<MuteRequest>,
) -> impl IntoResponse {
    match state.renderer.volume().set_mute(req.mute).await {
        Ok(volume) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "volume": volume})),
        )
            .into_response(),
        Err(e) => volume_error_response(e),
    }
}

// =============================================================================
// Receiver handlers
// =============================================================================

/// Sender request body
#[derive(Deserialize)]
pub struct SenderRequest {
    pub uri: String,
    pub metadata: String,
}

#[derive(Serialize)]
pub struct ReceiverResponse {
    pub uri: String,
    pub metadata: String,
    pub transport_state: &'static str,
    pub protocol_info: &'static str,
}

fn receiver_error_response(e: ReceiverError) -> Response {
    let status = match e {
        ReceiverError::NotConfigured | ReceiverError::Metadata(_) => StatusCode::BAD_REQUEST,
        ReceiverError::Player(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e)
}

fn ok_response() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response()
}

/// GET /receiver - Sender, transport state and protocol info
pub async fn receiver_handler(State(state): State<AppState>) -> Json<ReceiverResponse> {
    let receiver = state.renderer.receiver();
    let (uri, metadata) = receiver.sender().await;
    Json(ReceiverResponse {
        uri,
        metadata,
        transport_state: receiver.transport_state().await.as_str(),
        protocol_info: receiver.protocol_info(),
    })
}

/// POST /receiver/sender - Set the sender to relay
pub async fn receiver_sender_handler(
    State(state): State<AppState>,
    Json(req): Json<SenderRequest>,
) -> impl IntoResponse {
    match state
        .renderer
        .receiver()
        .set_sender(&req.uri, &req.metadata)
        .await
    {
        Ok(()) => ok_response(),
        Err(e) => receiver_error_response(e),
    }
}

/// POST /receiver/play - Start relaying
pub async fn receiver_play_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.renderer.receiver().play().await {
        Ok(()) => ok_response(),
        Err(e) => receiver_error_response(e),
    }
}

/// POST /receiver/stop - Stop relaying
pub async fn receiver_stop_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.renderer.receiver().stop().await {
        Ok(()) => ok_response(),
        Err(e) => receiver_error_response(e),
    }
}

// =============================================================================
// Radio and source handlers
// =============================================================================

#[derive(Serialize)]
pub struct ChannelEntry {
    pub id: u32,
    pub title: String,
    pub uri: String,
}

#[derive(Serialize)]
pub struct RadioResponse {
    pub id: u32,
    pub transport_state: &'static str,
    pub protocol_info: &'static str,
    pub channels: Vec<ChannelEntry>,
}

/// Channel request body
#[derive(Deserialize)]
pub struct ChannelRequest {
    pub id: u32,
}

/// Source request body
#[derive(Deserialize)]
pub struct SourceRequest {
    pub source: String,
}

fn radio_error_response(e: RadioError) -> Response {
    let status = match e {
        RadioError::NoChannel(_) => StatusCode::BAD_REQUEST,
        RadioError::Resolve(_) | RadioError::EmptyPlaylist(_) | RadioError::Player(_) => {
            StatusCode::BAD_GATEWAY
        }
        RadioError::Fetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e)
}

/// GET /radio - Channel list, selection and transport state
pub async fn radio_handler(State(state): State<AppState>) -> Json<RadioResponse> {
    let radio = state.renderer.radio();
    let channels = radio
        .channels()
        .iter()
        .zip(1..)
        .map(|(channel, id)| ChannelEntry {
            id,
            title: channel.title.clone(),
            uri: channel.uri.clone(),
        })
        .collect();
    Json(RadioResponse {
        id: radio.id().await,
        transport_state: radio.transport_state().await.as_str(),
        protocol_info: radio.protocol_info(),
        channels,
    })
}

/// POST /radio/channel - Select a channel (0 clears)
pub async fn radio_channel_handler(
    State(state): State<AppState>,
    Json(req): Json<ChannelRequest>,
) -> impl IntoResponse {
    match state.renderer.radio().set_id(req.id).await {
        Ok(()) => ok_response(),
        Err(e) => radio_error_response(e),
    }
}

/// POST /radio/play - Play the selected channel
pub async fn radio_play_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.renderer.radio().play().await {
        Ok(()) => ok_response(),
        Err(e) => radio_error_response(e),
    }
}

/// POST /radio/stop - Stop and restore the previous queue
pub async fn radio_stop_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.renderer.radio().stop().await {
        Ok(()) => ok_response(),
        Err(e) => radio_error_response(e),
    }
}

/// POST /source - Activate one source, deactivating the others
pub async fn source_handler(
    State(state): State<AppState>,
    Json(req): Json<SourceRequest>,
) -> impl IntoResponse {
    match state.renderer.select_source(&req.source).await {
        Ok(()) => ok_response(),
        Err(SourceError::Unknown(name)) => error_response(
            StatusCode::NOT_FOUND,
            format!("Source not found: {}", name),
        ),
        Err(SourceError::Receiver(e)) => receiver_error_response(e),
        Err(SourceError::Radio(e)) => radio_error_response(e),
    }
}

// =============================================================================
// Event stream
// =============================================================================

/// GET /events - Server-sent events of everything published on the bus
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(_) => None,
        },
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

// =============================================================================
// Stream relay
// =============================================================================

#[derive(Deserialize)]
pub struct StreamQuery {
    pub url: String,
    #[serde(default)]
    pub offset: u64,
}

/// Only http(s) URLs are relayed, and only to allowed hosts when a list is
/// configured.
fn check_stream_url(url: &str, allowed: &[String]) -> Result<(), Response> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("bad url: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("unsupported scheme: {}", parsed.scheme()),
        ));
    }
    let host = parsed.host_str().unwrap_or_default();
    if !allowed.is_empty() && !allowed.iter().any(|h| h.eq_ignore_ascii_case(host)) {
        warn!("/stream: host {} not allowed", host);
        return Err(error_response(
            StatusCode::FORBIDDEN,
            format!("host not allowed: {}", host),
        ));
    }
    Ok(())
}

/// GET /stream?url= - Fetch a remote resource through a buffer exchange
pub async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    if let Err(response) = check_stream_url(&query.url, &state.stream_hosts) {
        return response;
    }
    let (producer, mut consumer) = exchange::exchange("stream", STREAM_EXCHANGE_DEPTH);
    let mut fetch = NetFetch::new(query.url.clone());

    let bus = state.bus.clone();
    let url = query.url.clone();
    fetch.set_end_of_fetch_cb(Arc::new(move |ok: bool, bytes: u64| {
        bus.publish(BusEvent::FetchCompleted {
            url: url.clone(),
            ok,
            bytes,
        });
    }));

    if let Err(e) = fetch.start(producer, query.offset) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
    }
    if !fetch.wait_for_headers(Some(STREAM_HEADER_WAIT)).await {
        consumer.close();
        let detail = match fetch.fetch_done() {
            Some((status, code)) => format!("fetch failed: {:?} (http {:?})", status, code),
            None => "no response headers".to_string(),
        };
        return error_response(StatusCode::BAD_GATEWAY, detail);
    }
    match fetch.http_code() {
        Some(code) if (200..300).contains(&code) => {}
        code => {
            consumer.close();
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("upstream answered {:?}", code),
            );
        }
    }

    let content_type = fetch
        .header_value("content-type")
        .unwrap_or_else(|| "application/octet-stream".to_string());

    // The fetch travels with the body so the transfer lives as long as the
    // response and is aborted when the client goes away.
    // A transfer that fails mid-body closes the exchange without an end
    // marker; that aborts the response instead of ending it cleanly.
    let body = futures::stream::unfold(Some((consumer, fetch)), |state| async move {
        let (mut consumer, mut fetch) = state?;
        match consumer.take().await {
            Some(buf) if buf.is_eof() => {
                fetch.join().await;
                None
            }
            Some(buf) => {
                let chunk = Bytes::copy_from_slice(buf.remaining());
                consumer.recycle(buf);
                Some((Ok(chunk), Some((consumer, fetch))))
            }
            None => {
                fetch.join().await;
                let detail = format!("{}: transfer failed: {:?}", fetch.url(), fetch.fetch_done());
                warn!("/stream: {}", detail);
                Some((Err(std::io::Error::other(detail)), None))
            }
        }
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(body),
    )
        .into_response()
}
