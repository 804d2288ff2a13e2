//! Periodic Picture Loss Indication
//!
//! Keeps the publisher producing keyframes so the transcoder (and anyone
//! joining the RTMP stream late) can resume decoding.

use crate::session::scope::SessionScope;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;

/// Destination for RTCP feedback
#[async_trait]
pub trait RtcpSink: Send + Sync {
    /// Send a PLI for `media_ssrc`
    async fn send_pli(&self, media_ssrc: u32) -> Result<()>;
}

#[async_trait]
impl RtcpSink for Weak<RTCPeerConnection> {
    async fn send_pli(&self, media_ssrc: u32) -> Result<()> {
        let peer_connection = self
            .upgrade()
            .ok_or_else(|| Error::Pipeline("Peer connection dropped".to_string()))?;

        peer_connection
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })])
            .await
            .map(|_| ())
            .map_err(|e| Error::Pipeline(format!("RTCP write failed: {}", e)))
    }
}

/// Counters reported when a pacer finishes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PacerStats {
    /// PLIs written
    pub sent: u64,
    /// PLI writes that failed
    pub failed: u64,
}

/// Send a PLI for `media_ssrc` every `period` until the scope is cancelled
///
/// The first PLI goes out one period after start. Write failures are
/// logged and do not stop the pacer.
pub async fn run_pli_pacer(
    sink: impl RtcpSink,
    media_ssrc: u32,
    period: Duration,
    scope: SessionScope,
) -> PacerStats {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = PacerStats::default();

    loop {
        tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match sink.send_pli(media_ssrc).await {
            Ok(()) => stats.sent += 1,
            Err(e) => {
                stats.failed += 1;
                warn!(session_id = scope.session_id(), ssrc = media_ssrc, "{}", e);
            }
        }
    }

    debug!(
        session_id = scope.session_id(),
        ssrc = media_ssrc,
        sent = stats.sent,
        failed = stats.failed,
        "PLI pacer stopped"
    );

    stats
}
