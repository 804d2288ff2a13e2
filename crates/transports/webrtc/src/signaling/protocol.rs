//! Signaling payloads
//!
//! The offer travels as a JSON-serialised session description
//! (`{"type":"offer","sdp":"..."}`) inside the request; the answer is
//! returned in the same shape.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// A publish request delivered by the signaling surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    /// RTMP ingestion base, e.g. `rtmp://live.example/app`
    pub ingestion_address: String,

    /// Stream key appended to the ingestion address
    pub stream_key: String,

    /// JSON-serialised offer session description
    #[serde(rename = "offer", alias = "offerSDP", alias = "offerSdp")]
    pub offer_sdp: String,
}

impl SessionRequest {
    /// Create a request
    pub fn new(
        ingestion_address: impl Into<String>,
        stream_key: impl Into<String>,
        offer_sdp: impl Into<String>,
    ) -> Self {
        Self {
            ingestion_address: ingestion_address.into(),
            stream_key: stream_key.into(),
            offer_sdp: offer_sdp.into(),
        }
    }

    /// Downstream RTMP URL: `{ingestion_address}/{stream_key}`
    pub fn stream_url(&self) -> String {
        format!("{}/{}", self.ingestion_address, self.stream_key)
    }

    /// Decode the offer description
    ///
    /// Fails with [`Error::Negotiation`] when the payload is not a JSON
    /// session description or is not an offer.
    pub fn parse_offer(&self) -> Result<RTCSessionDescription> {
        let offer: RTCSessionDescription = serde_json::from_str(&self.offer_sdp)
            .map_err(|e| Error::Negotiation(format!("Failed to parse offer: {}", e)))?;

        if offer.sdp_type != RTCSdpType::Offer {
            return Err(Error::Negotiation(format!(
                "Expected an offer, got {}",
                offer.sdp_type
            )));
        }

        Ok(offer)
    }
}

/// The local answer produced by a successful negotiation
#[derive(Debug, Clone)]
pub struct SessionAnswer {
    description: RTCSessionDescription,
}

impl SessionAnswer {
    pub(crate) fn new(description: RTCSessionDescription) -> Self {
        Self { description }
    }

    /// SDP text of the answer
    pub fn sdp(&self) -> &str {
        &self.description.sdp
    }

    /// The full session description
    pub fn description(&self) -> &RTCSessionDescription {
        &self.description
    }

    /// `{"type":"answer","sdp":"..."}`
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.description)?)
    }
}
