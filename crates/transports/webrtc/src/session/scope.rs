//! Session-scoped cancellation
//!
//! Every task belonging to a session holds a clone of its [`SessionScope`]
//! and selects on [`SessionScope::cancelled`] around its I/O. The first
//! caller of [`SessionScope::cancel`] decides the teardown reason.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why a session was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// ICE connection state reached `Failed`
    IceFailed,
    /// ICE connection state reached `Disconnected`
    IceDisconnected,
    /// The transcoder process exited on its own
    TranscoderExited,
    /// Setup failed after session resources were created
    NegotiationFailed,
    /// The caller or the server dropped the session
    Abandoned,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TeardownReason::IceFailed => "ice-failed",
            TeardownReason::IceDisconnected => "ice-disconnected",
            TeardownReason::TranscoderExited => "transcoder-exited",
            TeardownReason::NegotiationFailed => "negotiation-failed",
            TeardownReason::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Cancellation scope shared by all tasks of one session
#[derive(Debug, Clone)]
pub struct SessionScope {
    session_id: Arc<str>,
    token: CancellationToken,
    reason: Arc<Mutex<Option<TeardownReason>>>,
}

impl SessionScope {
    /// Create a standalone scope
    pub fn new(session_id: impl Into<Arc<str>>) -> Self {
        Self::with_token(session_id, CancellationToken::new())
    }

    /// Create a scope that is also cancelled when `parent` is
    pub fn child_of(session_id: impl Into<Arc<str>>, parent: &CancellationToken) -> Self {
        Self::with_token(session_id, parent.child_token())
    }

    fn with_token(session_id: impl Into<Arc<str>>, token: CancellationToken) -> Self {
        Self {
            session_id: session_id.into(),
            token,
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Session identifier, used in log fields
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Cancel the scope, recording `reason` if none was recorded yet
    pub fn cancel(&self, reason: TeardownReason) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() && !self.token.is_cancelled() {
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    /// Whether the scope has been cancelled, directly or through its parent
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The teardown reason, once cancelled
    ///
    /// A scope cancelled through its parent token reports
    /// [`TeardownReason::Abandoned`].
    pub fn reason(&self) -> Option<TeardownReason> {
        if !self.token.is_cancelled() {
            return None;
        }
        Some(self.reason.lock().unwrap_or(TeardownReason::Abandoned))
    }
}
