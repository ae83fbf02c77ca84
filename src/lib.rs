pub mod call;
pub mod channel;
pub mod config;
pub mod error;
pub mod health;
pub mod id_types;
pub mod logging;
pub mod media;
pub mod media_setup;
pub mod message;
pub mod metrics;
pub mod mock;
pub mod peer_session;
pub mod relay;
pub mod signaling_handler;
pub mod track_handler;
pub mod types;

pub use call::{Call, CallConfig, CallState, CandidatePolicy, Role};
pub use channel::{SignalingChannel, SignalingConnector, WebSocketConnector};
pub use error::CallError;
pub use media::{MediaSession, MediaSessionProvider};
pub use media_setup::MediaSetup;
pub use message::{Candidate, SessionDescription, SignalMessage};
pub use peer_session::WebRtcProvider;
pub use relay::RelayServer;
pub use track_handler::{OutputSink, OutputSinks};
pub use types::{ClientMap, PendingOffers};
