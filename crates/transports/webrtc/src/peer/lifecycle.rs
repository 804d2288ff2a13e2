//! ICE connection-state handling

use crate::session::scope::{SessionScope, TeardownReason};
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

/// React to an ICE connection-state change
///
/// `Failed` and `Disconnected` cancel the session scope; everything else is
/// informational. Returns the teardown reason when the scope was cancelled.
pub fn handle_ice_connection_state(
    state: RTCIceConnectionState,
    scope: &SessionScope,
) -> Option<TeardownReason> {
    info!(session_id = scope.session_id(), %state, "ICE connection state changed");

    let reason = match state {
        RTCIceConnectionState::Connected => {
            info!(session_id = scope.session_id(), "ICE connection was successful");
            return None;
        }
        RTCIceConnectionState::Failed => TeardownReason::IceFailed,
        RTCIceConnectionState::Disconnected => TeardownReason::IceDisconnected,
        _ => {
            debug!(session_id = scope.session_id(), %state, "ICE state is informational");
            return None;
        }
    };

    warn!(session_id = scope.session_id(), %reason, "Tearing down session");
    scope.cancel(reason);
    Some(reason)
}
