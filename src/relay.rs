//! The signaling relay.
//!
//! A pass-through: text frames from one WebSocket client go verbatim to every
//! other client. The relay never parses SDP. The only frames it interprets are
//! answers that carry the `id` of an offer posted to `/signal`; those complete
//! the waiting HTTP request instead of being relayed.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, info_span, warn, Instrument};
use warp::http::StatusCode;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::config::RelayConfig;
use crate::health::health_report;
use crate::id_types::{ClientId, OfferId};
use crate::logging::{self, CORRELATION_ID_HEADER};
use crate::metrics::{
    self, RELAY_CONNECTED_CLIENTS, RELAY_MESSAGES_RELAYED_TOTAL, RELAY_OFFERS_TIMED_OUT_TOTAL,
};
use crate::types::{ClientMap, PendingOffers};

/// Largest `/signal` body accepted. SDP offers are a few kilobytes.
const MAX_SIGNAL_BODY: u64 = 64 * 1024;

/// Keeps an offer registered while its `/signal` request is waiting.
/// Dropping it, including when the caller goes away mid-wait, forgets the offer.
struct PendingOfferGuard<'a> {
    pending: &'a PendingOffers,
    offer_id: OfferId,
}

impl<'a> PendingOfferGuard<'a> {
    fn register(pending: &'a PendingOffers, offer_id: OfferId) -> (Self, oneshot::Receiver<Value>) {
        let (answer_tx, answer_rx) = oneshot::channel();
        pending.insert(offer_id.clone(), answer_tx);
        (Self { pending, offer_id }, answer_rx)
    }
}

impl Drop for PendingOfferGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(&self.offer_id).is_some() {
            debug!(offer_id = %self.offer_id, "Pending offer abandoned");
        }
    }
}

/// State shared by every route and connection.
struct RelayState {
    clients: ClientMap,
    pending: PendingOffers,
    answer_timeout: Duration,
}

impl RelayState {
    fn new(answer_timeout: Duration) -> Self {
        Self {
            clients: ClientMap::default(),
            pending: PendingOffers::default(),
            answer_timeout,
        }
    }

    /// Sends `text` to every client except `except`. Returns how many got it.
    fn broadcast(&self, except: Option<&ClientId>, text: &str) -> usize {
        let mut delivered = 0;
        for client in self.clients.iter() {
            if Some(client.key()) == except {
                continue;
            }
            if client.value().send(Message::text(text)).is_ok() {
                delivered += 1;
            }
        }
        RELAY_MESSAGES_RELAYED_TOTAL.inc_by(delivered as u64);
        delivered
    }

    fn route_text(&self, from: &ClientId, text: &str) {
        let data: Value = match serde_json::from_str(text) {
            Ok(data) => data,
            Err(e) => {
                error!(client_id = %from, error = %e, "Invalid JSON in WebSocket message");
                return;
            }
        };

        if data.get("type").and_then(Value::as_str) == Some("answer") {
            if let Some(offer_id) = data.get("id").and_then(Value::as_str) {
                self.complete_offer(OfferId::from(offer_id), data.clone());
                return;
            }
        }

        let delivered = self.broadcast(Some(from), text);
        debug!(client_id = %from, delivered, "Relayed message");
    }

    fn complete_offer(&self, offer_id: OfferId, answer: Value) {
        match self.pending.remove(&offer_id) {
            Some((_, answer_tx)) => {
                if answer_tx.send(answer).is_err() {
                    warn!(offer_id = %offer_id, "HTTP caller stopped waiting for this answer");
                } else {
                    info!(offer_id = %offer_id, "Received answer for pending offer");
                }
            }
            None => warn!(offer_id = %offer_id, "No pending offer for id"),
        }
    }

    /// Broadcasts an HTTP offer and waits for the answer that echoes its id.
    async fn signal(&self, body: Bytes) -> (Value, StatusCode) {
        let data: Value = match serde_json::from_slice(&body) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "Error in signal handler");
                return (json!({ "error": e.to_string() }), StatusCode::BAD_REQUEST);
            }
        };

        let data_type = data.get("type").and_then(Value::as_str);
        if data_type != Some("offer") {
            warn!(data_type = ?data_type, "Unknown signaling data type");
            return (
                json!({ "error": "Invalid data type" }),
                StatusCode::BAD_REQUEST,
            );
        }
        let Some(sdp) = data.get("sdp").and_then(Value::as_str) else {
            return (
                json!({ "error": "Missing field: sdp" }),
                StatusCode::BAD_REQUEST,
            );
        };

        let offer_id = OfferId::generate();
        let (_registered, answer_rx) = PendingOfferGuard::register(&self.pending, offer_id.clone());

        let frame = json!({ "type": "offer", "id": offer_id.as_ref(), "sdp": sdp }).to_string();
        let delivered = self.broadcast(None, &frame);
        info!(offer_id = %offer_id, delivered, "Broadcast HTTP offer");

        match tokio::time::timeout(self.answer_timeout, answer_rx).await {
            Ok(Ok(answer)) => {
                info!(offer_id = %offer_id, "Sending HTTP response with answer");
                (answer, StatusCode::OK)
            }
            Ok(Err(_)) => {
                warn!(offer_id = %offer_id, "Relay shut down before an answer arrived");
                (
                    json!({ "error": "Relay shutting down" }),
                    StatusCode::SERVICE_UNAVAILABLE,
                )
            }
            Err(_) => {
                RELAY_OFFERS_TIMED_OUT_TOTAL.inc();
                warn!(offer_id = %offer_id, "Timeout waiting for answer");
                (
                    json!({ "error": "Timeout waiting for answer" }),
                    StatusCode::REQUEST_TIMEOUT,
                )
            }
        }
    }

    /// Closes every WebSocket client and cancels the pending offers.
    fn shutdown(&self) {
        info!(
            clients = self.clients.len(),
            pending_offers = self.pending.len(),
            "Shutting down relay"
        );
        for client in self.clients.iter() {
            let _ = client.value().send(Message::close());
        }
        self.pending.clear();
    }
}

/// The relay server: routes plus the state they share.
#[derive(Clone)]
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<RelayState>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let state = Arc::new(RelayState::new(config.answer_timeout));
        Self { config, state }
    }

    pub fn client_count(&self) -> usize {
        self.state.clients.len()
    }

    pub fn pending_offers(&self) -> usize {
        self.state.pending.len()
    }

    /// Closes every client and cancels pending offers. Also run by [`RelayServer::bind`]'s
    /// shutdown signal.
    pub fn shutdown(&self) {
        self.state.shutdown();
    }

    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + Send + Sync + 'static
    {
        // GET /ws - relay socket
        let ws_route = warp::path("ws")
            .and(warp::path::end())
            .and(warp::ws())
            .and(with_state(self.state.clone()))
            .map(|ws: Ws, state: Arc<RelayState>| {
                ws.on_upgrade(move |socket| client_connected(socket, state))
            });

        // POST /signal - offer over HTTP, answer in the response
        let signal_route = warp::path("signal")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::header::optional::<String>(CORRELATION_ID_HEADER))
            .and(warp::body::content_length_limit(MAX_SIGNAL_BODY))
            .and(warp::body::bytes())
            .and(with_state(self.state.clone()))
            .and_then(handle_signal);

        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_state(self.state.clone()))
            .map(|state: Arc<RelayState>| {
                warp::reply::json(&health_report(&state.clients, &state.pending))
            });

        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::with_header(
                    metrics::gather_text(),
                    "content-type",
                    "text/plain; version=0.0.4",
                )
            });

        let index_route = warp::path::end()
            .and(warp::get())
            .and(warp::fs::file(self.config.static_dir.join("index.html")));

        let script_route = warp::path("client.js")
            .and(warp::path::end())
            .and(warp::get())
            .and(warp::fs::file(self.config.static_dir.join("client.js")));

        let cors = warp::cors()
            .allow_origins(self.config.allowed_origins.iter().map(String::as_str))
            .allow_credentials(true)
            .allow_methods(vec!["GET", "POST", "OPTIONS"])
            .allow_headers(vec!["content-type", CORRELATION_ID_HEADER]);

        ws_route
            .or(signal_route)
            .or(health_route)
            .or(metrics_route)
            .or(index_route)
            .or(script_route)
            .with(cors)
            .with(warp::trace::request())
    }

    /// Binds the relay. `shutdown` resolving closes every client and stops the server.
    pub fn bind(
        &self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(SocketAddr, impl Future<Output = ()> + 'static), warp::Error> {
        let state = self.state.clone();
        let signal = async move {
            shutdown.await;
            state.shutdown();
        };
        warp::serve(self.routes()).try_bind_with_graceful_shutdown(addr, signal)
    }
}

fn with_state(
    state: Arc<RelayState>,
) -> impl Filter<Extract = (Arc<RelayState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn handle_signal(
    correlation_header: Option<String>,
    body: Bytes,
    state: Arc<RelayState>,
) -> Result<impl Reply, Infallible> {
    let correlation_id = logging::correlation_id(correlation_header);
    let span = info_span!("signal", correlation_id = %correlation_id);
    let (body, status) = state.signal(body).instrument(span).await;

    Ok(warp::reply::with_header(
        warp::reply::with_status(warp::reply::json(&body), status),
        CORRELATION_ID_HEADER,
        correlation_id,
    ))
}

async fn client_connected(ws: WebSocket, state: Arc<RelayState>) {
    let client_id = ClientId::generate();
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Outbound frames go through an unbounded queue so a slow client never
    // blocks the sender of a relayed frame.
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let mut rx = UnboundedReceiverStream::new(rx);
    let writer_id = client_id.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.next().await {
            let closing = message.is_close();
            if let Err(e) = ws_tx.send(message).await {
                debug!(client_id = %writer_id, error = %e, "WebSocket send failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    state.clients.insert(client_id.clone(), tx);
    RELAY_CONNECTED_CLIENTS.inc();
    info!(client_id = %client_id, total = state.clients.len(), "Client connected");

    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        };
        if message.is_close() {
            break;
        }
        if let Ok(text) = message.to_str() {
            state.route_text(&client_id, text);
        }
    }

    if state.clients.remove(&client_id).is_some() {
        RELAY_CONNECTED_CLIENTS.dec();
    }
    info!(client_id = %client_id, total = state.clients.len(), "Client disconnected");
}
