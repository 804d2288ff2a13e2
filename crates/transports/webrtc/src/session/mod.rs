//! Peer sessions: negotiation plus the background forwarding pipeline
//!
//! ```text
//! offer ─► PeerSession::negotiate ─► answer
//!               │
//!               ├─ ForwarderPair (udp 4000 / 4002)
//!               ├─ Transcoder (ffmpeg, reads rtp-forwarder.sdp)
//!               ├─ on_track ─► RTP pump + PLI pacer per track
//!               ├─ on ICE Failed/Disconnected ─► scope.cancel()
//!               └─ teardown: sockets, transcoder, peer connection
//! ```

pub mod pipeline;
pub mod scope;

use crate::config::ForwarderConfig;
use crate::forwarder::ForwarderPair;
use crate::media::pump::RtpSource;
use crate::peer::{build_peer_connection, handle_ice_connection_state};
use crate::signaling::protocol::{SessionAnswer, SessionRequest};
use crate::transcoder::{TranscoderHandle, TranscoderSupervisor};
use crate::{Error, Result};
use pipeline::SessionPipeline;
use scope::{SessionScope, TeardownReason};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Result of a successful negotiation
#[derive(Debug)]
pub struct NegotiatedSession {
    /// Local answer to hand back to the publisher
    pub answer: SessionAnswer,
    /// Handle on the running session
    pub handle: SessionHandle,
}

/// Handle on a running session
///
/// Dropping the handle does not end the session; call
/// [`close`](Self::close) to abandon it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    scope: SessionScope,
    torn_down: watch::Receiver<bool>,
}

impl SessionHandle {
    /// Session identifier
    pub fn session_id(&self) -> &str {
        self.scope.session_id()
    }

    /// Abandon the session
    pub fn close(&self) {
        self.scope.cancel(TeardownReason::Abandoned);
    }

    /// Whether teardown has finished
    pub fn is_closed(&self) -> bool {
        *self.torn_down.borrow()
    }

    /// Why the session ended, once cancelled
    pub fn reason(&self) -> Option<TeardownReason> {
        self.scope.reason()
    }

    /// Wait until teardown has finished
    pub async fn closed(&mut self) {
        // Err means the teardown task is gone, which only happens after it
        // has run or the runtime is shutting down
        let _ = self.torn_down.wait_for(|done| *done).await;
    }
}

/// Negotiates receive-only sessions and starts their pipelines
#[derive(Debug, Clone)]
pub struct PeerSession {
    config: Arc<ForwarderConfig>,
    supervisor: TranscoderSupervisor,
    root: CancellationToken,
    teardowns: TaskTracker,
}

impl PeerSession {
    /// Create a negotiator; sessions are cancelled along with `root`
    pub fn new(config: Arc<ForwarderConfig>, root: CancellationToken) -> Self {
        let supervisor = TranscoderSupervisor::new(config.transcoder.clone());
        Self {
            config,
            supervisor,
            root,
            teardowns: TaskTracker::new(),
        }
    }

    /// Negotiate a session for `request` and start forwarding
    ///
    /// On success the background pipeline is already bound to a fresh
    /// session scope. Every failure releases what was created so far,
    /// including a panic or the caller dropping this future midway.
    #[instrument(skip_all, fields(session_id))]
    pub async fn negotiate(&self, request: &SessionRequest) -> Result<NegotiatedSession> {
        self.negotiate_with(request, |peer_connection, offer| async move {
            answer_offer(&peer_connection, offer).await
        })
        .await
    }

    /// [`negotiate`](Self::negotiate) with the offer/answer exchange supplied
    /// by the caller
    async fn negotiate_with<F, Fut>(
        &self,
        request: &SessionRequest,
        exchange: F,
    ) -> Result<NegotiatedSession>
    where
        F: FnOnce(Arc<RTCPeerConnection>, RTCSessionDescription) -> Fut,
        Fut: Future<Output = Result<RTCSessionDescription>>,
    {
        // Decode before creating anything so a bad offer costs nothing
        let offer = request.parse_offer()?;

        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("session_id", session_id.as_str());
        info!(ingestion = %request.ingestion_address, "Negotiating publish session");

        let peer_connection = build_peer_connection(&self.config).await?;

        let forwarders = match ForwarderPair::dial().await {
            Ok(forwarders) => forwarders,
            Err(e) => {
                close_quietly(&peer_connection).await;
                return Err(e);
            }
        };

        let scope = SessionScope::child_of(session_id, &self.root);
        let guard = SetupGuard::new(&scope);

        let transcoder = match self.supervisor.spawn(&request.stream_url(), &scope).await {
            Ok(handle) => handle,
            Err(e) => {
                forwarders.close();
                close_quietly(&peer_connection).await;
                return Err(e);
            }
        };

        let handle = self.start_pipeline(&peer_connection, scope, forwarders, transcoder);

        match exchange(Arc::clone(&peer_connection), offer).await {
            Ok(answer) => {
                guard.disarm();
                info!("Session negotiated");
                Ok(NegotiatedSession {
                    answer: SessionAnswer::new(answer),
                    handle,
                })
            }
            Err(e) => {
                warn!("Negotiation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Wait up to `timeout` for the teardown of every session started so far
    ///
    /// Meant for shutdown, after the root token has been cancelled. Returns
    /// `false` if a teardown was still running at the deadline.
    pub async fn wait_torn_down(&self, timeout: Duration) -> bool {
        self.teardowns.close();
        tokio::time::timeout(timeout, self.teardowns.wait())
            .await
            .is_ok()
    }

    /// Wire the track, ICE and teardown handlers for a session
    fn start_pipeline(
        &self,
        peer_connection: &Arc<RTCPeerConnection>,
        scope: SessionScope,
        forwarders: ForwarderPair,
        transcoder: TranscoderHandle,
    ) -> SessionHandle {
        let pipeline = Arc::new(SessionPipeline::new(
            scope.clone(),
            forwarders,
            self.config.pli_interval(),
        ));

        // The handler lives inside the peer connection; hold it weakly
        let weak_pc = Arc::downgrade(peer_connection);
        let pipeline_for_track = Arc::clone(&pipeline);
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let pipeline = Arc::clone(&pipeline_for_track);
                let rtcp = weak_pc.clone();
                Box::pin(async move {
                    let codec_type = track.kind();
                    let source: Arc<dyn RtpSource> = track;
                    // Tasks are detached; the scope ends them
                    let _ = pipeline.attach_track(codec_type, source, rtcp);
                })
            },
        ));

        let scope_for_candidates = scope.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                debug!(
                    session_id = scope_for_candidates.session_id(),
                    ?candidate,
                    "Local ICE candidate"
                );
            }
            Box::pin(async {})
        }));

        let scope_for_ice = scope.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                handle_ice_connection_state(state, &scope_for_ice);
                Box::pin(async {})
            },
        ));

        let torn_down = pipeline.subscribe_torn_down();
        pipeline.spawn_teardown(
            &self.teardowns,
            Arc::clone(peer_connection),
            transcoder,
            self.config.teardown_settle(),
        );

        SessionHandle { scope, torn_down }
    }
}

/// Cancels a half-built session's scope unless disarmed
///
/// Covers every way out of negotiation after the scope exists: error
/// returns, panics, and the negotiation future being dropped.
struct SetupGuard {
    scope: Option<SessionScope>,
}

impl SetupGuard {
    fn new(scope: &SessionScope) -> Self {
        Self {
            scope: Some(scope.clone()),
        }
    }

    fn disarm(mut self) {
        self.scope = None;
    }
}

impl Drop for SetupGuard {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            debug!(session_id = scope.session_id(), "Releasing unfinished session");
            scope.cancel(TeardownReason::NegotiationFailed);
        }
    }
}

/// Apply the offer, create the answer and apply it locally
async fn answer_offer(
    peer_connection: &RTCPeerConnection,
    offer: RTCSessionDescription,
) -> Result<RTCSessionDescription> {
    peer_connection
        .set_remote_description(offer)
        .await
        .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))?;

    let answer = peer_connection
        .create_answer(None)
        .await
        .map_err(|e| Error::Negotiation(format!("Failed to create answer: {}", e)))?;

    // Candidates trickle after this; the answer goes out without waiting
    // for gathering to complete
    peer_connection
        .set_local_description(answer)
        .await
        .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;

    peer_connection
        .local_description()
        .await
        .ok_or_else(|| Error::Negotiation("No local description after setting answer".to_string()))
}

async fn close_quietly(peer_connection: &RTCPeerConnection) {
    if let Err(e) = peer_connection.close().await {
        warn!("Error closing peer connection: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiator(program: &str) -> PeerSession {
        let config = ForwarderConfig::default().with_transcoder_program(program);
        PeerSession::new(Arc::new(config), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_malformed_offer_is_rejected_before_setup() {
        // the program would fail to spawn; reaching it would surface a
        // supervision error instead
        let session = negotiator("/nonexistent/transcoder");
        let request = SessionRequest::new("rtmp://live.example/app", "key", "not json");

        let err = session.negotiate(&request).await.unwrap_err();
        assert!(err.is_negotiation_error());
    }

    /// Records its pid, then idles until killed
    #[cfg(unix)]
    fn idle_transcoder(dir: &std::path::Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("idle-ffmpeg");
        std::fs::write(&path, "#!/bin/sh\necho $$ > transcoder.pid\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    async fn transcoder_pid(dir: &std::path::Path) -> String {
        let path = dir.join("transcoder.pid");
        for _ in 0..250 {
            if let Ok(pid) = tokio::fs::read_to_string(&path).await {
                if !pid.trim().is_empty() {
                    return pid.trim().to_string();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("transcoder never started");
    }

    #[cfg(unix)]
    fn process_alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    fn local_session(dir: &std::path::Path) -> PeerSession {
        let config = ForwarderConfig::default()
            .with_stun_servers(vec![])
            .with_transcoder_program(idle_transcoder(dir))
            .with_working_dir(dir);
        PeerSession::new(Arc::new(config), CancellationToken::new())
    }

    #[cfg(unix)]
    fn bare_offer() -> SessionRequest {
        SessionRequest::new(
            "rtmp://live.example/app",
            "key",
            r#"{"type":"offer","sdp":"v=0\r\n"}"#,
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_panic_after_transcoder_spawn_releases_session() {
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        let dir = tempfile::tempdir().unwrap();
        let session = local_session(dir.path());
        let request = bare_offer();

        let path = dir.path().to_path_buf();
        let outcome = AssertUnwindSafe(session.negotiate_with(&request, |_pc, _offer| async move {
            transcoder_pid(&path).await;
            panic!("answer exchange blew up")
        }))
        .catch_unwind()
        .await;
        assert!(outcome.is_err());

        let pid = transcoder_pid(dir.path()).await;
        assert!(session.wait_torn_down(Duration::from_secs(5)).await);
        assert!(!process_alive(&pid), "transcoder {} still running", pid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_negotiation_releases_session() {
        let dir = tempfile::tempdir().unwrap();
        let session = local_session(dir.path());
        let request = bare_offer();

        let path = dir.path().to_path_buf();
        let abandoned = tokio::time::timeout(
            Duration::from_secs(5),
            session.negotiate_with(&request, |_pc, _offer| async move {
                transcoder_pid(&path).await;
                std::future::pending().await
            }),
        )
        .await;
        assert!(abandoned.is_err());

        let pid = transcoder_pid(dir.path()).await;
        assert!(session.wait_torn_down(Duration::from_secs(5)).await);
        assert!(!process_alive(&pid), "transcoder {} still running", pid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_exchange_releases_session() {
        let dir = tempfile::tempdir().unwrap();
        let session = local_session(dir.path());
        let request = bare_offer();
        let path = dir.path().to_path_buf();

        let err = session
            .negotiate_with(&request, |_pc, _offer| async move {
                transcoder_pid(&path).await;
                Err(Error::Negotiation("rejected".to_string()))
            })
            .await
            .unwrap_err();
        assert!(err.is_negotiation_error());

        let pid = transcoder_pid(dir.path()).await;
        assert!(session.wait_torn_down(Duration::from_secs(5)).await);
        assert!(!process_alive(&pid));
    }

    #[tokio::test]
    async fn test_wait_torn_down_without_sessions() {
        let session = negotiator("/nonexistent/transcoder");
        assert!(session.wait_torn_down(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_handle_close_sets_abandoned() {
        let scope = SessionScope::new("handle");
        let (tx, rx) = watch::channel(false);
        let mut handle = SessionHandle {
            scope: scope.clone(),
            torn_down: rx,
        };

        assert_eq!(handle.session_id(), "handle");
        assert!(handle.reason().is_none());

        handle.close();
        assert!(scope.is_cancelled());
        assert_eq!(handle.reason(), Some(TeardownReason::Abandoned));
        assert!(!handle.is_closed());

        tx.send_replace(true);
        handle.closed().await;
        assert!(handle.is_closed());
    }
}
