//! SDP description read by the transcoder
//!
//! Describes the two loopback RTP inputs with the same ports and payload
//! types the forwarders and the media engine use.

use crate::media::{
    AUDIO_DOWNSTREAM_PORT, LOOPBACK_HOST, OPUS_CHANNELS, OPUS_CLOCK_RATE, OPUS_PAYLOAD_TYPE,
    VIDEO_DOWNSTREAM_PORT, VP8_CLOCK_RATE, VP8_PAYLOAD_TYPE,
};
use crate::{Error, Result};
use std::path::Path;
use tracing::info;

/// Render the transcoder input description
pub fn render_sdp() -> String {
    format!(
        "v=0\n\
         o=- 0 0 IN IP4 {host}\n\
         s=WebRTC to RTMP forwarder\n\
         c=IN IP4 {host}\n\
         t=0 0\n\
         m=audio {audio_port} RTP/AVP {opus_pt}\n\
         a=rtpmap:{opus_pt} OPUS/{opus_rate}/{opus_channels}\n\
         m=video {video_port} RTP/AVP {vp8_pt}\n\
         a=rtpmap:{vp8_pt} VP8/{vp8_rate}\n",
        host = LOOPBACK_HOST,
        audio_port = AUDIO_DOWNSTREAM_PORT,
        opus_pt = OPUS_PAYLOAD_TYPE,
        opus_rate = OPUS_CLOCK_RATE,
        opus_channels = OPUS_CHANNELS,
        video_port = VIDEO_DOWNSTREAM_PORT,
        vp8_pt = VP8_PAYLOAD_TYPE,
        vp8_rate = VP8_CLOCK_RATE,
    )
}

/// Write the description to `path` unless a file already exists there
///
/// Returns `true` when the file was written. An existing file is left
/// untouched so operators can hand-tune it.
pub async fn ensure_sdp_file(path: &Path) -> Result<bool> {
    if tokio::fs::try_exists(path).await.map_err(|e| {
        Error::Supervision(format!("Failed to check {}: {}", path.display(), e))
    })? {
        return Ok(false);
    }

    tokio::fs::write(path, render_sdp()).await.map_err(|e| {
        Error::Supervision(format!("Failed to write {}: {}", path.display(), e))
    })?;

    info!(path = %path.display(), "Wrote transcoder SDP description");
    Ok(true)
}
