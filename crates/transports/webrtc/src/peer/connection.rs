//! Receive-only peer connection construction

use crate::config::ForwarderConfig;
use crate::media::{register_codecs, MediaKind};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

/// Build a peer connection that accepts one audio and one video track
///
/// Registers VP8/Opus with their wire-locked payload types and the default
/// interceptors, configures the STUN servers from `config`, and declares
/// the two receive-only transceivers. Must complete before the remote
/// description is applied.
pub async fn build_peer_connection(config: &ForwarderConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    register_codecs(&mut media_engine)?;

    // NACK responder/generator and RTCP reports
    let interceptor_registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| Error::Negotiation(format!("Failed to register interceptors: {}", e)))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .build();

    let ice_servers: Vec<RTCIceServer> = config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();

    let rtc_config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
        Error::Negotiation(format!("Failed to create peer connection: {}", e))
    })?);

    for kind in MediaKind::ALL {
        if let Err(e) = peer_connection
            .add_transceiver_from_kind(
                kind.codec_type(),
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
        {
            let _ = peer_connection.close().await;
            return Err(Error::Negotiation(format!(
                "Failed to add {} transceiver: {}",
                kind, e
            )));
        }
    }

    debug!("Receive-only peer connection created");

    Ok(peer_connection)
}
