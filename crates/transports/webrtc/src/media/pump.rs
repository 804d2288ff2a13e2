//! RTP pump: remote track → loopback UDP forwarder
//!
//! Packets are written verbatim, one datagram per packet, in read order.

use crate::forwarder::UdpForwarder;
use crate::media::RTP_BUFFER_SIZE;
use crate::session::scope::SessionScope;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use webrtc::rtp::packet::Packet;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::{Marshal, MarshalSize};

/// Pause after a failed read before trying again
pub const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// A source of raw RTP packets
#[async_trait]
pub trait RtpSource: Send + Sync {
    /// SSRC of the stream
    fn ssrc(&self) -> u32;

    /// Read one packet into `buf`
    ///
    /// Returns `Ok(Some(n))` with the packet length, `Ok(None)` once the
    /// source has ended, and `Err` for a failed read. Errors for which
    /// [`Error::is_retryable`] is false stop the pump.
    async fn read_rtp(&self, buf: &mut [u8]) -> Result<Option<usize>>;
}

#[async_trait]
impl RtpSource for TrackRemote {
    fn ssrc(&self) -> u32 {
        TrackRemote::ssrc(self)
    }

    async fn read_rtp(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        // Zeroed so the end of the raw packet left behind can be found
        buf.fill(0);
        match self.read(buf).await {
            Ok((packet, _attributes)) => wire_bytes(&packet, buf).map(Some),
            // Receiver stopped, or dropped along with its peer connection
            Err(webrtc::Error::ErrClosedPipe)
            | Err(webrtc::Error::ErrConnectionClosed)
            | Err(webrtc::Error::ErrRTPReceiverNil) => Ok(None),
            Err(e) => Err(Error::Pipeline(format!("RTP read failed: {}", e))),
        }
    }
}

/// Put the wire form of `packet` at the front of `buf` and return its length
///
/// The SRTP reader decrypts into `buf`, so it usually still holds the
/// datagram `packet` was parsed from. A padded packet is forwarded from
/// those bytes when they check out, since serialising it again would
/// round the padding to a 4-byte boundary. Everything else is serialised.
pub(crate) fn wire_bytes(packet: &Packet, buf: &mut [u8]) -> Result<usize> {
    if packet.header.padding {
        if let Some(n) = raw_padded_len(packet, buf) {
            return Ok(n);
        }
        debug!(
            ssrc = packet.header.ssrc,
            "Raw padded packet unavailable, padding re-encoded"
        );
    }

    packet
        .marshal_to(buf)
        .map_err(|e| Error::Pipeline(format!("RTP marshal failed: {}", e)))
}

/// Length of the padded datagram behind `packet` if `buf` still holds it
fn raw_padded_len(packet: &Packet, buf: &[u8]) -> Option<usize> {
    let header = packet.header.marshal().ok()?;
    let body_len = packet.header.marshal_size() + packet.payload.len();

    // The final padding byte is the padding count, never zero
    let end = buf.iter().rposition(|&b| b != 0)? + 1;
    let padding_len = buf[end - 1] as usize;

    if end != body_len + padding_len
        || buf.get(..header.len())? != &header[..]
        || buf.get(header.len()..body_len)? != &packet.payload[..]
    {
        return None;
    }

    Some(end)
}

/// Counters reported when a pump finishes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    /// Packets written to the forwarder
    pub packets: u64,
    /// Bytes written to the forwarder
    pub bytes: u64,
    /// Failed reads
    pub read_errors: u64,
    /// Failed writes
    pub write_errors: u64,
}

/// Copy packets from `source` to `forwarder` until the source ends or the
/// scope is cancelled
///
/// Retryable errors are logged and tolerated while the scope is live, with
/// a short pause after each failed read. The socket is not closed here;
/// the session teardown owns it.
pub async fn run_rtp_pump(
    source: Arc<dyn RtpSource>,
    forwarder: Arc<UdpForwarder>,
    scope: SessionScope,
) -> PumpStats {
    let kind = forwarder.kind();
    let ssrc = source.ssrc();
    let mut buf = vec![0u8; RTP_BUFFER_SIZE];
    let mut stats = PumpStats::default();

    debug!(session_id = scope.session_id(), %kind, ssrc, "RTP pump started");

    loop {
        let read = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            read = source.read_rtp(&mut buf) => read,
        };

        let n = match read {
            Ok(Some(n)) => n,
            Ok(None) => {
                debug!(session_id = scope.session_id(), %kind, ssrc, "Track ended");
                break;
            }
            Err(e) => {
                stats.read_errors += 1;
                warn!(session_id = scope.session_id(), %kind, ssrc, "{}", e);
                if scope.is_cancelled() || !e.is_retryable() {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = scope.cancelled() => break,
                    _ = tokio::time::sleep(READ_ERROR_BACKOFF) => continue,
                }
            }
        };

        match forwarder.send(&buf[..n]).await {
            Ok(_) => {
                stats.packets += 1;
                stats.bytes += n as u64;
            }
            Err(e) => {
                stats.write_errors += 1;
                warn!(session_id = scope.session_id(), %kind, ssrc, "{}", e);
                if scope.is_cancelled() {
                    break;
                }
            }
        }
    }

    info!(
        session_id = scope.session_id(),
        %kind,
        ssrc,
        packets = stats.packets,
        bytes = stats.bytes,
        read_errors = stats.read_errors,
        write_errors = stats.write_errors,
        "RTP pump finished"
    );

    stats
}
