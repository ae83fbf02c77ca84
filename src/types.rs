use crate::id_types::{ClientId, OfferId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Outbound frame queue of one relay WebSocket client.
pub type ClientSender = mpsc::UnboundedSender<warp::ws::Message>;

/// Thread-safe map of connected relay clients
pub type ClientMap = Arc<DashMap<ClientId, ClientSender>>;

/// Answer slot of an HTTP offer; resolved with the answer JSON.
pub type AnswerSender = oneshot::Sender<serde_json::Value>;

/// Thread-safe map of HTTP offers awaiting an answer
pub type PendingOffers = Arc<DashMap<OfferId, AnswerSender>>;
