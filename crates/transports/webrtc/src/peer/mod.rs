//! Peer connection setup and ICE lifecycle

mod connection;
mod lifecycle;

pub use connection::build_peer_connection;
pub use lifecycle::handle_ice_connection_state;
