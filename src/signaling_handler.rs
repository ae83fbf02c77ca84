use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::call::{CallContext, CallState, CandidatePolicy};
use crate::channel::IncomingMessages;
use crate::error::Result;
use crate::media::{SessionEvent, SessionEvents};
use crate::message::{Candidate, SessionDescription, SignalMessage};
use crate::metrics::{CALL_CANDIDATES_DROPPED_TOTAL, CALL_CANDIDATES_SENT_TOTAL};
use crate::track_handler::bind_remote_track;

/// Drives one call attempt until the channel goes away or the call is closed.
///
/// Channel messages and session events are handled one at a time on this task,
/// so the handshake steps below never interleave.
pub(crate) async fn run_event_loop(
    ctx: Arc<CallContext>,
    mut incoming: IncomingMessages,
    mut events: SessionEvents,
) {
    let mut events_open = true;

    loop {
        tokio::select! {
            message = incoming.recv() => match message {
                Some(message) => handle_message(&ctx, message).await,
                None => {
                    if !ctx.is_closed() {
                        error!(call_id = %ctx.id, "Signaling channel closed; call cannot continue");
                    }
                    break;
                }
            },
            event = events.recv(), if events_open => match event {
                Some(event) => handle_session_event(&ctx, event).await,
                None => {
                    debug!(call_id = %ctx.id, "Session event stream ended");
                    events_open = false;
                }
            },
        }

        if ctx.is_closed() {
            break;
        }
    }
}

/// Creates an offer, commits it locally and sends it to the remote peer.
pub(crate) async fn send_offer(ctx: &CallContext) -> Result<()> {
    let offer = ctx.session.create_offer().await?;
    ctx.session.set_local_description(offer.clone()).await?;
    ctx.channel.send(&SignalMessage::description(offer)).await?;
    info!(call_id = %ctx.id, "Sent offer");
    ctx.set_state(CallState::OfferSent);
    Ok(())
}

async fn handle_message(ctx: &CallContext, message: SignalMessage) {
    if ctx.is_closed() {
        return;
    }

    match message {
        SignalMessage::Offer { sdp, id } => {
            answer_offer(ctx, SessionDescription::offer(sdp), id).await;
        }
        SignalMessage::Answer { sdp, .. } => {
            apply_answer(ctx, SessionDescription::answer(sdp)).await;
        }
        SignalMessage::Candidate { candidate } => {
            apply_remote_candidate(ctx, candidate).await;
        }
    }
}

/// Applies a remote offer and replies with an answer (echoing the relay id).
async fn answer_offer(ctx: &CallContext, offer: SessionDescription, relay_id: Option<String>) {
    let state = ctx.state();
    if state != CallState::Idle {
        warn!(call_id = %ctx.id, ?state, "Ignoring offer outside of the idle state");
        return;
    }

    info!(call_id = %ctx.id, sdp_length = offer.sdp.len(), "Received offer");
    if let Err(e) = ctx.session.set_remote_description(offer).await {
        error!(call_id = %ctx.id, error = %e, "Failed to set remote description");
        return;
    }
    ctx.mark_remote_description_set();
    flush_pending_candidates(ctx).await;

    let answer = match ctx.session.create_answer().await {
        Ok(answer) => answer,
        Err(e) => {
            error!(call_id = %ctx.id, error = %e, "Failed to create answer");
            return;
        }
    };

    if let Err(e) = ctx.session.set_local_description(answer.clone()).await {
        error!(call_id = %ctx.id, error = %e, "Failed to set local description");
        return;
    }

    match ctx
        .channel
        .send(&SignalMessage::correlated(answer, relay_id))
        .await
    {
        Ok(()) => {
            info!(call_id = %ctx.id, "Sent answer");
            ctx.set_state(CallState::Connected);
        }
        Err(e) => {
            // The remote side is left waiting on an answer that never comes.
            error!(call_id = %ctx.id, error = %e, "Failed to send answer");
            ctx.abandon("answer could not be sent");
        }
    }
}

async fn apply_answer(ctx: &CallContext, answer: SessionDescription) {
    let state = ctx.state();
    if state != CallState::OfferSent {
        warn!(call_id = %ctx.id, ?state, "Ignoring answer without an outstanding offer");
        return;
    }

    info!(call_id = %ctx.id, sdp_length = answer.sdp.len(), "Applying answer");
    if let Err(e) = ctx.session.set_remote_description(answer).await {
        error!(call_id = %ctx.id, error = %e, "Failed to set remote description");
        return;
    }
    ctx.mark_remote_description_set();
    flush_pending_candidates(ctx).await;
    ctx.set_state(CallState::Connected);
}

async fn apply_remote_candidate(ctx: &CallContext, candidate: Candidate) {
    if ctx.policy == CandidatePolicy::Queue && !ctx.remote_description_set() {
        let label = candidate.candidate.clone();
        if ctx.queue_candidate(candidate) {
            debug!(call_id = %ctx.id, candidate = %label, "Queued candidate until the remote description is set");
        } else {
            warn!(call_id = %ctx.id, candidate = %label, "Candidate queue full; dropped");
            CALL_CANDIDATES_DROPPED_TOTAL
                .with_label_values(&["overflow"])
                .inc();
        }
        return;
    }
    apply_candidate(ctx, candidate).await;
}

/// Applies one candidate. A failure only drops that candidate.
async fn apply_candidate(ctx: &CallContext, candidate: Candidate) {
    if ctx.is_closed() {
        CALL_CANDIDATES_DROPPED_TOTAL
            .with_label_values(&["closed"])
            .inc();
        return;
    }

    let label = candidate.candidate.clone();
    match ctx.session.add_candidate(candidate).await {
        Ok(()) => debug!(call_id = %ctx.id, candidate = %label, "Applied remote candidate"),
        Err(e) => {
            warn!(call_id = %ctx.id, candidate = %label, error = %e, "Error adding candidate; dropped");
            CALL_CANDIDATES_DROPPED_TOTAL
                .with_label_values(&["rejected"])
                .inc();
        }
    }
}

async fn flush_pending_candidates(ctx: &CallContext) {
    let pending = ctx.take_pending_candidates();
    if pending.is_empty() {
        return;
    }
    info!(call_id = %ctx.id, count = pending.len(), "Applying queued candidates");
    for candidate in pending {
        apply_candidate(ctx, candidate).await;
    }
}

async fn handle_session_event(ctx: &CallContext, event: SessionEvent) {
    if ctx.is_closed() {
        return;
    }

    match event {
        SessionEvent::CandidateDiscovered(candidate) => {
            match ctx.channel.send(&SignalMessage::candidate(candidate)).await {
                Ok(()) => CALL_CANDIDATES_SENT_TOTAL.inc(),
                Err(e) => error!(call_id = %ctx.id, error = %e, "Failed to send local candidate"),
            }
        }
        SessionEvent::GatheringComplete => {
            debug!(call_id = %ctx.id, "Candidate gathering complete");
        }
        SessionEvent::TrackReceived(track) => {
            bind_remote_track(&ctx.sinks, &track);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::MAX_PENDING_CANDIDATES;
    use crate::channel::SignalingConnector;
    use crate::id_types::CallId;
    use crate::media::{MediaSessionProvider, SessionConfig};
    use crate::mock::{MemoryHub, MockMediaProvider, RecordingSink};
    use crate::track_handler::OutputSinks;
    use tokio::sync::watch;

    async fn queueing_context() -> CallContext {
        let (session, _events) = MockMediaProvider::new("local")
            .create_session(&SessionConfig::default())
            .await
            .unwrap();
        let (channel, _incoming) = MemoryHub::new().connect("mem://relay").await.unwrap();
        let (state, _) = watch::channel(CallState::Idle);
        CallContext::new(
            CallId::generate(),
            session,
            channel,
            OutputSinks::new(
                Arc::new(RecordingSink::default()),
                Arc::new(RecordingSink::default()),
            ),
            CandidatePolicy::Queue,
            Arc::new(state),
        )
    }

    #[tokio::test]
    async fn test_candidate_queue_is_bounded() {
        let ctx = queueing_context().await;
        let overflow = CALL_CANDIDATES_DROPPED_TOTAL.with_label_values(&["overflow"]);
        let before = overflow.get();

        for n in 0..MAX_PENDING_CANDIDATES + 5 {
            let candidate = Candidate::new(format!("candidate:{} 1 udp 2122260223 192.0.2.1 {} typ host", n, 50000 + n));
            apply_remote_candidate(&ctx, candidate).await;
        }

        assert_eq!(ctx.pending_candidate_count(), MAX_PENDING_CANDIDATES);
        assert_eq!(overflow.get() - before, 5);

        // The oldest candidates are the ones kept.
        let kept = ctx.take_pending_candidates();
        assert!(kept[0].candidate.starts_with("candidate:0 "));
        assert_eq!(ctx.pending_candidate_count(), 0);
    }
}
