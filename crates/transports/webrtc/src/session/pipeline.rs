//! Background pipeline of one session
//!
//! Routes arriving tracks onto their forwarder slot, spawns the per-track
//! pump and pacer, and runs the teardown that follows scope cancellation.

use crate::forwarder::ForwarderPair;
use crate::media::pacer::{run_pli_pacer, PacerStats, RtcpSink};
use crate::media::pump::{run_rtp_pump, PumpStats, RtpSource};
use crate::media::MediaKind;
use crate::session::scope::{SessionScope, TeardownReason};
use crate::transcoder::TranscoderHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Tasks spawned for one accepted track
#[derive(Debug)]
pub struct TrackTasks {
    /// Kind the track was routed as
    pub kind: MediaKind,
    /// RTP pump task
    pub pump: JoinHandle<PumpStats>,
    /// PLI pacer task
    pub pacer: JoinHandle<PacerStats>,
}

/// Per-session pipeline state shared with the track handler
pub struct SessionPipeline {
    scope: SessionScope,
    forwarders: ForwarderPair,
    pli_interval: Duration,
    torn_down: watch::Sender<bool>,
}

impl SessionPipeline {
    /// Create the pipeline for `scope` over an already-dialled pair
    pub fn new(scope: SessionScope, forwarders: ForwarderPair, pli_interval: Duration) -> Self {
        let (torn_down, _) = watch::channel(false);
        Self {
            scope,
            forwarders,
            pli_interval,
            torn_down,
        }
    }

    /// Session scope
    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    /// Forwarder slot table
    pub fn forwarders(&self) -> &ForwarderPair {
        &self.forwarders
    }

    /// Route a newly arrived track
    ///
    /// Tracks of a kind outside `{audio, video}` are dropped and `None` is
    /// returned. Otherwise a pacer and a pump are spawned and their handles
    /// returned.
    pub fn attach_track<S>(
        &self,
        codec_type: RTPCodecType,
        source: Arc<dyn RtpSource>,
        rtcp: S,
    ) -> Option<TrackTasks>
    where
        S: RtcpSink + 'static,
    {
        let ssrc = source.ssrc();

        let Some(kind) = MediaKind::from_codec_type(codec_type) else {
            warn!(
                session_id = self.scope.session_id(),
                ssrc,
                codec_type = %codec_type,
                "Ignoring track of unsupported kind"
            );
            return None;
        };

        if self.scope.is_cancelled() {
            warn!(session_id = self.scope.session_id(), %kind, ssrc, "Track arrived after teardown");
            return None;
        }

        info!(session_id = self.scope.session_id(), %kind, ssrc, "Remote track added");

        let pacer = tokio::spawn(run_pli_pacer(
            rtcp,
            ssrc,
            self.pli_interval,
            self.scope.clone(),
        ));

        let pump = tokio::spawn(run_rtp_pump(
            source,
            Arc::clone(self.forwarders.get(kind)),
            self.scope.clone(),
        ));

        Some(TrackTasks { kind, pump, pacer })
    }

    /// Spawn the task that tears the session down once the scope is
    /// cancelled, on `tracker`
    ///
    /// Closes both forwarders, waits up to `settle` for the transcoder to be
    /// reaped, then closes the peer connection.
    pub fn spawn_teardown(
        self: &Arc<Self>,
        tracker: &TaskTracker,
        peer_connection: Arc<RTCPeerConnection>,
        mut transcoder: TranscoderHandle,
        settle: Duration,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);

        tracker.spawn(async move {
            let scope = &pipeline.scope;
            scope.cancelled().await;
            let reason = scope.reason().unwrap_or(TeardownReason::Abandoned);

            pipeline.forwarders.close();

            match transcoder.wait_exit_timeout(settle).await {
                Some(exit) => {
                    info!(session_id = scope.session_id(), ?exit, "Transcoder reaped")
                }
                None => warn!(
                    session_id = scope.session_id(),
                    pid = ?transcoder.pid(),
                    "Transcoder still running after settle period"
                ),
            }

            if let Err(e) = peer_connection.close().await {
                warn!(session_id = scope.session_id(), "Error closing peer connection: {}", e);
            }

            pipeline.torn_down.send_replace(true);
            info!(session_id = scope.session_id(), %reason, "Session torn down");
        })
    }

    /// Receiver that flips to `true` once teardown has finished
    pub fn subscribe_torn_down(&self) -> watch::Receiver<bool> {
        self.torn_down.subscribe()
    }
}
