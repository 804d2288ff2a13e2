//! Signaling seam
//!
//! Consumes `(ingestionAddress, streamKey, offerSDP)` and returns the answer
//! description. The adapter is the only place faults from the media stack
//! are trapped and turned into errors.

pub mod http;
pub mod protocol;

pub use http::SignalingServer;
pub use protocol::{SessionAnswer, SessionRequest};

use crate::config::ForwarderConfig;
use crate::session::PeerSession;
use crate::{Error, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Time allowed past the teardown settle period for peer connections to close
pub const PEER_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Entry point for signaling surfaces
#[derive(Debug, Clone)]
pub struct SignalingAdapter {
    session: PeerSession,
    root: CancellationToken,
    teardown_settle: Duration,
}

impl SignalingAdapter {
    /// Create an adapter after validating `config`
    pub fn new(config: ForwarderConfig) -> Result<Self> {
        config.validate()?;

        let root = CancellationToken::new();
        let teardown_settle = config.teardown_settle();
        let session = PeerSession::new(Arc::new(config), root.clone());

        Ok(Self {
            session,
            root,
            teardown_settle,
        })
    }

    /// Negotiate a publish session and return its answer
    ///
    /// The session keeps running in the background after this returns; it
    /// ends on ICE failure, transcoder exit or [`shutdown`](Self::shutdown).
    pub async fn handle(&self, request: SessionRequest) -> Result<SessionAnswer> {
        let negotiation = AssertUnwindSafe(self.session.negotiate(&request)).catch_unwind();

        match negotiation.await {
            Ok(Ok(negotiated)) => {
                info!(
                    session_id = negotiated.handle.session_id(),
                    "Answer ready"
                );
                Ok(negotiated.answer)
            }
            Ok(Err(e)) => Err(e),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Negotiation panicked: {}", message);
                Err(Error::Negotiation(format!(
                    "Negotiation aborted unexpectedly: {}",
                    message
                )))
            }
        }
    }

    /// Convenience wrapper over [`handle`](Self::handle)
    pub async fn answer_offer(
        &self,
        ingestion_address: &str,
        stream_key: &str,
        offer_sdp: &str,
    ) -> Result<SessionAnswer> {
        self.handle(SessionRequest::new(ingestion_address, stream_key, offer_sdp))
            .await
    }

    /// Tear down every session started by this adapter
    pub fn shutdown(&self) {
        info!("Shutting down all sessions");
        self.root.cancel();
    }

    /// Tear down every session and wait for the teardowns to finish
    ///
    /// Waits at most the teardown settle period plus [`PEER_CLOSE_GRACE`].
    /// Returns `false` if sessions were still tearing down at that point.
    pub async fn shutdown_and_wait(&self) -> bool {
        self.shutdown();

        let settled = self
            .session
            .wait_torn_down(self.teardown_settle + PEER_CLOSE_GRACE)
            .await;
        if settled {
            info!("All sessions torn down");
        } else {
            warn!("Sessions still tearing down at shutdown deadline");
        }
        settled
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Root token; cancelled on shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
