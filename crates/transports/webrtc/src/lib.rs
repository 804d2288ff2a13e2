//! WebRTC publish sessions re-broadcast to RTMP
//!
//! A publisher (typically a browser) sends an SDP offer carrying one Opus
//! audio track and one VP8 video track. The forwarder answers as a
//! receive-only peer, relays the raw RTP packets of each track to fixed
//! loopback UDP ports, and supervises an `ffmpeg` child that reads those
//! ports (through an SDP description file) and pushes FLV to the RTMP
//! ingestion URL.
//!
//! # Features
//!
//! - **Receive-only negotiation**: VP8/90000 PT 96 and Opus/48000 PT 111
//! - **Verbatim RTP relay**: one datagram per packet, audio → 4000, video → 4002
//! - **Keyframe pacing**: Picture Loss Indication every 2 seconds per track
//! - **Scoped lifetime**: ICE failure or transcoder exit tears the session down
//! - **HTTP signaling**: `POST /sdp`, `GET /health`
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Publisher (Browser/Native)                            │
//! │  ↓ POST /sdp {ingestionAddress, streamKey, offer}      │
//! │  SignalingServer (axum)                                │
//! │  └─ SignalingAdapter (panic trap, root shutdown token) │
//! │     └─ PeerSession::negotiate                          │
//! │        ├─ RTCPeerConnection (2 × recvonly)             │
//! │        ├─ ForwarderPair (UDP 127.0.0.1:4000 / :4002)   │
//! │        ├─ TranscoderSupervisor (ffmpeg child)          │
//! │        └─ SessionPipeline                              │
//! │           ├─ RTP pump per track                        │
//! │           ├─ PLI pacer per track                       │
//! │           └─ teardown on SessionScope cancellation     │
//! │     ↓                                                   │
//! │  ffmpeg → rtmp://{ingestionAddress}/{streamKey}        │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use remotemedia_webrtc_rtmp::ForwarderConfig;
//!
//! let config = ForwarderConfig::default().with_pli_interval_ms(1000);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.transcoder.program.to_str(), Some("ffmpeg"));
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use remotemedia_webrtc_rtmp::{ForwarderConfig, SignalingAdapter};
//!
//! # async fn example(offer_json: &str) -> remotemedia_webrtc_rtmp::Result<()> {
//! let adapter = SignalingAdapter::new(ForwarderConfig::default())?;
//! let answer = adapter
//!     .answer_offer("rtmp://live.example/app", "stream-key", offer_json)
//!     .await?;
//! println!("{}", answer.to_json()?);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod forwarder;
pub mod media;
pub mod session;
pub mod signaling;
pub mod transcoder;

mod peer;

// Re-exports for public API
pub use config::{ForwarderConfig, TranscoderConfig};
pub use error::{Error, Result};
pub use forwarder::{ForwarderPair, UdpForwarder};
pub use media::MediaKind;
pub use peer::{build_peer_connection, handle_ice_connection_state};
pub use session::scope::{SessionScope, TeardownReason};
pub use session::{NegotiatedSession, PeerSession, SessionHandle};
pub use signaling::{SessionAnswer, SessionRequest, SignalingAdapter, SignalingServer};
pub use transcoder::{TranscoderExit, TranscoderHandle, TranscoderSupervisor};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
