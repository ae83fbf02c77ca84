//! The call controller.
//!
//! A [`Call`] owns at most one media session and one signaling channel at a
//! time. `start` builds both and, for the initiator, sends the offer; a
//! spawned event loop then drives the rest of the handshake. `stop` tears both
//! down. Nothing lives in globals, so independent calls can run side by side.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::channel::{IncomingMessages, SignalingChannel, SignalingConnector, INCOMING_BUFFER};
use crate::config::ClientConfig;
use crate::error::{CallError, Result};
use crate::id_types::CallId;
use crate::media::{MediaSession, MediaSessionProvider, SessionConfig, SessionEvents};
use crate::message::Candidate;
use crate::metrics::CALLS_STARTED_TOTAL;
use crate::signaling_handler;
use crate::track_handler::OutputSinks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the offer.
    Initiator,
    /// Waits for an offer and answers it.
    Responder,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initiator" => Ok(Role::Initiator),
            "responder" => Ok(Role::Responder),
            other => Err(format!("unknown call role '{}'", other)),
        }
    }
}

/// What to do with a candidate that arrives before the remote description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidatePolicy {
    /// Hand it to the session anyway; the rejection is logged and the candidate dropped.
    #[default]
    Drop,
    /// Hold it until the remote description is committed, then apply it.
    Queue,
}

impl FromStr for CandidatePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(CandidatePolicy::Drop),
            "queue" => Ok(CandidatePolicy::Queue),
            other => Err(format!("unknown candidate policy '{}'", other)),
        }
    }
}

/// Handshake state of the current call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    OfferSent,
    Connected,
    Closed,
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    pub signaling_url: String,
    pub session: SessionConfig,
    pub candidate_policy: CandidatePolicy,
}

impl CallConfig {
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            session: SessionConfig::default(),
            candidate_policy: CandidatePolicy::default(),
        }
    }
}

impl From<&ClientConfig> for CallConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            signaling_url: config.signaling_url.clone(),
            session: SessionConfig {
                ice_servers: config.ice_servers(),
            },
            candidate_policy: config.candidate_policy,
        }
    }
}

/// Most candidates held back under [`CandidatePolicy::Queue`].
pub const MAX_PENDING_CANDIDATES: usize = INCOMING_BUFFER;

/// Everything the event loop of one call attempt works on.
pub(crate) struct CallContext {
    pub id: CallId,
    pub session: Arc<dyn MediaSession>,
    pub channel: Arc<dyn SignalingChannel>,
    pub sinks: OutputSinks,
    pub policy: CandidatePolicy,
    pub state: Arc<watch::Sender<CallState>>,
    pub closed: AtomicBool,
    pub remote_set: AtomicBool,
    pub pending_candidates: std::sync::Mutex<Vec<Candidate>>,
    released: AtomicBool,
}

impl CallContext {
    pub fn new(
        id: CallId,
        session: Arc<dyn MediaSession>,
        channel: Arc<dyn SignalingChannel>,
        sinks: OutputSinks,
        policy: CandidatePolicy,
        state: Arc<watch::Sender<CallState>>,
    ) -> Self {
        Self {
            id,
            session,
            channel,
            sinks,
            policy,
            state,
            closed: AtomicBool::new(false),
            remote_set: AtomicBool::new(false),
            pending_candidates: std::sync::Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: CallState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(call_id = %self.id, from = ?previous, to = ?state, "Call state changed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_set.load(Ordering::SeqCst)
    }

    pub fn mark_remote_description_set(&self) {
        self.remote_set.store(true, Ordering::SeqCst);
    }

    /// Holds `candidate` back. Returns false, leaving the queue untouched,
    /// once [`MAX_PENDING_CANDIDATES`] are already waiting.
    pub fn queue_candidate(&self, candidate: Candidate) -> bool {
        let mut pending = match self.pending_candidates.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        if pending.len() >= MAX_PENDING_CANDIDATES {
            return false;
        }
        pending.push(candidate);
        true
    }

    pub fn pending_candidate_count(&self) -> usize {
        match self.pending_candidates.lock() {
            Ok(pending) => pending.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Marks the attempt dead: handlers stop and the state becomes `Closed`.
    /// The session and channel stay allocated until [`CallContext::release`].
    pub fn abandon(&self, reason: &str) {
        error!(call_id = %self.id, reason, "Call cannot continue");
        self.closed.store(true, Ordering::SeqCst);
        self.set_state(CallState::Closed);
    }

    /// Closes the session and the channel. Only the first call does anything.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        teardown(self.session.as_ref(), self.channel.as_ref()).await;
    }

    pub fn take_pending_candidates(&self) -> Vec<Candidate> {
        match self.pending_candidates.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

struct ActiveCall {
    ctx: Arc<CallContext>,
    task: JoinHandle<()>,
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        self.ctx.closed.store(true, Ordering::SeqCst);
        self.task.abort();

        // A `Call` dropped without `stop` still releases its session and channel.
        if self.ctx.released.load(Ordering::SeqCst) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let ctx = self.ctx.clone();
                handle.spawn(async move {
                    ctx.release().await;
                    ctx.set_state(CallState::Closed);
                    debug!(call_id = %ctx.id, "Dropped call released");
                });
            }
            Err(_) => warn!(call_id = %self.ctx.id, "Call dropped outside a runtime; resources not closed"),
        }
    }
}

/// One peer-to-peer call endpoint.
pub struct Call {
    provider: Arc<dyn MediaSessionProvider>,
    connector: Arc<dyn SignalingConnector>,
    sinks: OutputSinks,
    config: CallConfig,
    state: Arc<watch::Sender<CallState>>,
    active: Option<ActiveCall>,
}

impl Call {
    pub fn new(
        provider: Arc<dyn MediaSessionProvider>,
        connector: Arc<dyn SignalingConnector>,
        sinks: OutputSinks,
        config: CallConfig,
    ) -> Self {
        let (state, _) = watch::channel(CallState::Idle);
        Self {
            provider,
            connector,
            sinks,
            config,
            state: Arc::new(state),
            active: None,
        }
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Watches state changes across call attempts.
    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Identifier of the running call attempt, if any.
    pub fn call_id(&self) -> Option<CallId> {
        self.active.as_ref().map(|active| active.ctx.id.clone())
    }

    /// Begins a call: acquires local media, opens the channel, builds the
    /// session and attaches the tracks. The initiator also sends the offer.
    ///
    /// A media acquisition failure aborts before any signaling happens.
    pub async fn start(&mut self, role: Role) -> Result<()> {
        if self.active.is_some() {
            return Err(CallError::AlreadyActive);
        }

        let id = CallId::generate();
        let span = info_span!("call", call_id = %id, role = ?role);
        let (ctx, incoming, events) = self.open(id, role).instrument(span.clone()).await?;

        let task = tokio::spawn(
            signaling_handler::run_event_loop(ctx.clone(), incoming, events).instrument(span),
        );

        CALLS_STARTED_TOTAL.inc();
        self.active = Some(ActiveCall { ctx, task });
        Ok(())
    }

    async fn open(
        &self,
        id: CallId,
        role: Role,
    ) -> Result<(Arc<CallContext>, IncomingMessages, SessionEvents)> {
        let tracks = self.provider.acquire_local_media().await.map_err(|e| {
            error!(error = %e, "Local media acquisition failed; call aborted");
            e
        })?;
        info!(tracks = tracks.len(), "Local media acquired");

        let (channel, incoming) = self.connector.connect(&self.config.signaling_url).await?;

        let (session, events) = match self.provider.create_session(&self.config.session).await {
            Ok(created) => created,
            Err(e) => {
                error!(error = %e, "Failed to create media session");
                channel.close().await;
                return Err(e);
            }
        };
        info!(ice_servers = ?self.config.session.ice_servers, "Media session created");

        for track in tracks {
            if let Err(e) = session.add_local_track(track).await {
                error!(error = %e, "Failed to attach local track");
                teardown(session.as_ref(), channel.as_ref()).await;
                return Err(e);
            }
        }

        self.state.send_replace(CallState::Idle);
        let ctx = Arc::new(CallContext::new(
            id,
            session,
            channel,
            self.sinks.clone(),
            self.config.candidate_policy,
            self.state.clone(),
        ));

        if role == Role::Initiator {
            if let Err(e) = signaling_handler::send_offer(&ctx).await {
                error!(error = %e, "Failed to send offer");
                ctx.closed.store(true, Ordering::SeqCst);
                ctx.release().await;
                self.state.send_replace(CallState::Closed);
                return Err(e);
            }
        }

        Ok((ctx, incoming, events))
    }

    /// Tears down the session and the channel. A no-op when no call is active.
    ///
    /// Dropping the `Call` instead also releases both, from a spawned task.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("Stop requested with no active call");
            return;
        };

        active.ctx.closed.store(true, Ordering::SeqCst);
        active.task.abort();
        active.ctx.release().await;
        active.ctx.set_state(CallState::Closed);
        info!(call_id = %active.ctx.id, "Call stopped");
    }
}

async fn teardown(session: &dyn MediaSession, channel: &dyn SignalingChannel) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "Media session did not close cleanly");
    }
    channel.close().await;
}
