//! Media kinds, wire-locked codec parameters and the per-track media loops
//!
//! The payload types and loopback ports below are shared with the SDP file
//! the transcoder reads. Changing one side without the other silently breaks
//! the stream.

pub mod pacer;
pub mod pump;

use crate::{Error, Result};
use std::fmt;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

/// RTP payload type for VP8 video
pub const VP8_PAYLOAD_TYPE: u8 = 96;

/// RTP payload type for Opus audio
pub const OPUS_PAYLOAD_TYPE: u8 = 111;

/// VP8 RTP clock rate
pub const VP8_CLOCK_RATE: u32 = 90_000;

/// Opus RTP clock rate
pub const OPUS_CLOCK_RATE: u32 = 48_000;

/// Opus channel count as advertised in SDP
pub const OPUS_CHANNELS: u16 = 2;

/// Loopback port the transcoder listens on for audio RTP
pub const AUDIO_DOWNSTREAM_PORT: u16 = 4000;

/// Loopback port the transcoder listens on for video RTP
pub const VIDEO_DOWNSTREAM_PORT: u16 = 4002;

/// Host every forwarder socket binds to and dials
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Receive buffer size for one RTP packet
pub const RTP_BUFFER_SIZE: usize = 1500;

/// The closed set of media kinds a session forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Opus audio, forwarded to port 4000
    Audio,
    /// VP8 video, forwarded to port 4002
    Video,
}

impl MediaKind {
    /// Both kinds, audio first
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    /// Map a WebRTC codec type onto a forwarded kind
    ///
    /// Returns `None` for anything outside `{audio, video}`; such tracks
    /// are dropped.
    pub fn from_codec_type(codec_type: RTPCodecType) -> Option<Self> {
        match codec_type {
            RTPCodecType::Audio => Some(MediaKind::Audio),
            RTPCodecType::Video => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// The WebRTC codec type used when declaring the transceiver
    pub fn codec_type(self) -> RTPCodecType {
        match self {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        }
    }

    /// Fixed loopback destination port for this kind
    pub fn downstream_port(self) -> u16 {
        match self {
            MediaKind::Audio => AUDIO_DOWNSTREAM_PORT,
            MediaKind::Video => VIDEO_DOWNSTREAM_PORT,
        }
    }

    /// Payload type registered for this kind
    pub fn payload_type(self) -> u8 {
        match self {
            MediaKind::Audio => OPUS_PAYLOAD_TYPE,
            MediaKind::Video => VP8_PAYLOAD_TYPE,
        }
    }

    /// Codec parameters registered with the media engine
    pub fn codec_parameters(self) -> RTCRtpCodecParameters {
        let capability = match self {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_CHANNELS,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: VP8_CLOCK_RATE,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        };

        RTCRtpCodecParameters {
            capability,
            payload_type: self.payload_type(),
            ..Default::default()
        }
    }

    /// Lowercase name, matching the SDP media line
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Register VP8 (PT 96) and Opus (PT 111) with the media engine
///
/// Must run before any negotiation; these are the only codecs the session
/// will accept.
pub fn register_codecs(media_engine: &mut MediaEngine) -> Result<()> {
    for kind in MediaKind::ALL {
        media_engine
            .register_codec(kind.codec_parameters(), kind.codec_type())
            .map_err(|e| {
                Error::Negotiation(format!("Failed to register {} codec: {}", kind, e))
            })?;
    }
    Ok(())
}
