use std::time::Duration;
use tracing::warn;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTCRtpHeaderExtensionCapability, RTPCodecType,
};

use crate::error::{CallError, Result};
use crate::media::{MediaKind, SessionConfig};

pub const OPUS_PAYLOAD_TYPE: u8 = 111;
pub const VP8_PAYLOAD_TYPE: u8 = 96;

/// Opus TOC 0xf8 (CELT fullband, 20ms, one frame) followed by a silent frame.
const OPUS_SILENCE_FRAME: &[u8] = &[0xf8, 0xff, 0xfe];

/// 16x16 VP8 key frame: frame tag, start code, dimensions, zeroed first partition.
const VP8_KEY_FRAME: &[u8] = &[
    0x50, 0x01, 0x00, 0x9d, 0x01, 0x2a, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00,
];

const HEADER_EXTENSIONS: &[&str] = &[
    "urn:ietf:params:rtp-hdrext:sdes:mid",
    "urn:ietf:params:rtp-hdrext:ssrc-audio-level",
    "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
];

pub struct MediaSetup;

impl MediaSetup {
    /// Builds a WebRTC API with Opus audio, VP8 video and the default interceptors.
    pub fn create_webrtc_api() -> Result<API> {
        let mut media_engine = MediaEngine::default();

        // Opus with FEC and low latency settings
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: Self::codec_for(MediaKind::Audio),
                    payload_type: OPUS_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| CallError::Session(format!("Failed to register Opus codec: {}", e)))?;

        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: Self::codec_for(MediaKind::Video),
                    payload_type: VP8_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(|e| CallError::Session(format!("Failed to register VP8 codec: {}", e)))?;

        for extension in HEADER_EXTENSIONS {
            for codec_type in [RTPCodecType::Audio, RTPCodecType::Video] {
                if let Err(e) = media_engine.register_header_extension(
                    RTCRtpHeaderExtensionCapability {
                        uri: extension.to_string(),
                    },
                    codec_type,
                    None,
                ) {
                    warn!(extension = %extension, error = %e, "Header extension not registered");
                }
            }
        }

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| CallError::Session(format!("Failed to register interceptors: {}", e)))?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    /// Peer connection configuration. An empty server list means host
    /// candidates only.
    pub fn rtc_config(config: &SessionConfig) -> RTCConfiguration {
        let ice_servers = if config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            bundle_policy: RTCBundlePolicy::MaxBundle,
            ..Default::default()
        }
    }

    /// Codec used for local tracks of `kind`. Unknown kinds get an empty capability.
    pub fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
        match kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                ..Default::default()
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "".to_owned(),
                ..Default::default()
            },
            MediaKind::Unknown => RTCRtpCodecCapability::default(),
        }
    }

    /// Frame a local track of `kind` repeats in place of captured media, and
    /// the interval between two writes.
    pub fn placeholder_frame(kind: MediaKind) -> Option<(&'static [u8], Duration)> {
        match kind {
            MediaKind::Audio => Some((OPUS_SILENCE_FRAME, Duration::from_millis(20))),
            MediaKind::Video => Some((VP8_KEY_FRAME, Duration::from_millis(200))),
            MediaKind::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtc_config_without_servers() {
        let config = MediaSetup::rtc_config(&SessionConfig::default());
        assert!(config.ice_servers.is_empty());
        assert_eq!(config.bundle_policy, RTCBundlePolicy::MaxBundle);
    }

    #[test]
    fn test_rtc_config_with_stun() {
        let config = MediaSetup::rtc_config(&SessionConfig {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        });
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(
            config.ice_servers[0].urls,
            vec!["stun:stun.l.google.com:19302".to_string()]
        );
    }

    #[test]
    fn test_codec_for_kind() {
        assert_eq!(MediaSetup::codec_for(MediaKind::Audio).mime_type, "audio/opus");
        assert_eq!(MediaSetup::codec_for(MediaKind::Video).clock_rate, 90000);
    }

    #[test]
    fn test_placeholder_frames() {
        let (audio, audio_interval) = MediaSetup::placeholder_frame(MediaKind::Audio).unwrap();
        assert_eq!(audio[0], 0xf8);
        assert_eq!(audio_interval, Duration::from_millis(20));

        let (video, _) = MediaSetup::placeholder_frame(MediaKind::Video).unwrap();
        // Key frame bit clear, start code present.
        assert_eq!(video[0] & 0x01, 0);
        assert_eq!(&video[3..6], &[0x9d, 0x01, 0x2a]);

        assert!(MediaSetup::placeholder_frame(MediaKind::Unknown).is_none());
    }

    #[test]
    fn test_create_api() {
        assert!(MediaSetup::create_webrtc_api().is_ok());
    }
}
