use serde::Serialize;

use crate::types::{ClientMap, PendingOffers};

/// Body of the relay's `GET /health`.
///
/// The relay is a pass-through, so it is serving as long as the process
/// answers; the client and offer counts are informational for probes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: &'static str,
    pub connected_clients: usize,
    pub pending_offers: usize,
}

pub fn health_report(clients: &ClientMap, pending: &PendingOffers) -> HealthReport {
    HealthReport {
        status: "SERVING",
        connected_clients: clients.len(),
        pending_offers: pending.len(),
    }
}
