//! Shared helpers for forwarder integration tests
//!
//! - a publishing peer that produces real offers (sendonly audio + video)
//! - stub transcoder scripts that record their argument vector
//! - scripted RTP sources and loopback receivers

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use remotemedia_webrtc_rtmp::media::pump::RtpSource;
use remotemedia_webrtc_rtmp::{ForwarderConfig, ForwarderPair, MediaKind, UdpForwarder};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

/// File the stub transcoder appends its arguments to
pub const ARGS_FILE: &str = "transcoder-args.txt";

/// File the pid-recording stub writes its pid to
pub const PID_FILE: &str = "transcoder.pid";

/// Initialize tracing for tests (call once per test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,webrtc=warn")
        .try_init();
}

/// A publisher holding one sendonly audio and one sendonly video
/// transceiver, with its offer applied locally
pub struct Publisher {
    pub peer_connection: Arc<RTCPeerConnection>,
    /// `{"type":"offer","sdp":"..."}`
    pub offer_json: String,
}

/// API with the default codecs and interceptors
fn publisher_api() -> API {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let registry = register_default_interceptors(Registry::new(), &mut media_engine).unwrap();

    APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build()
}

impl Publisher {
    pub async fn new() -> Self {
        let peer_connection = Arc::new(
            publisher_api()
                .new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );

        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            peer_connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Sendonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .unwrap();
        }

        let offer = peer_connection.create_offer(None).await.unwrap();
        peer_connection.set_local_description(offer).await.unwrap();
        let local = peer_connection.local_description().await.unwrap();
        let offer_json = serde_json::to_string(&local).unwrap();

        Self {
            peer_connection,
            offer_json,
        }
    }

    pub async fn close(&self) {
        let _ = self.peer_connection.close().await;
    }
}

/// A publisher that actually sends media: one VP8 track written by the test
pub struct TrackPublisher {
    pub peer_connection: Arc<RTCPeerConnection>,
    pub video: Arc<TrackLocalStaticRTP>,
}

impl TrackPublisher {
    pub async fn new() -> Self {
        let peer_connection = Arc::new(
            publisher_api()
                .new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );

        let video = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_owned(),
            "publisher".to_owned(),
        ));

        let sender = peer_connection
            .add_track(Arc::clone(&video) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .unwrap();

        // Incoming RTCP must be read for the interceptors to process it
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        Self {
            peer_connection,
            video,
        }
    }

    /// Offer/answer with `answerer`, each side gathering before sending
    pub async fn connect(&self, answerer: &RTCPeerConnection) {
        let offer = self.peer_connection.create_offer(None).await.unwrap();
        let mut gathered = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection.set_local_description(offer).await.unwrap();
        let _ = gathered.recv().await;
        let offer = self.peer_connection.local_description().await.unwrap();

        answerer.set_remote_description(offer).await.unwrap();
        let answer = answerer.create_answer(None).await.unwrap();
        let mut gathered = answerer.gathering_complete_promise().await;
        answerer.set_local_description(answer).await.unwrap();
        let _ = gathered.recv().await;
        let answer = answerer.local_description().await.unwrap();

        self.peer_connection
            .set_remote_description(answer)
            .await
            .unwrap();
    }

    pub async fn close(&self) {
        let _ = self.peer_connection.close().await;
    }
}

/// Poll until `peer_connection` reports connected
pub async fn wait_connected(peer_connection: &RTCPeerConnection, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if peer_connection.connection_state() == RTCPeerConnectionState::Connected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Write an executable shell script named `name` into `dir`
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Transcoder stand-in: records its arguments, then idles until killed
#[cfg(unix)]
pub fn long_running_transcoder(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "fake-ffmpeg",
        &format!("printf '%s\\n' \"$@\" >> {}\nexec sleep 30", ARGS_FILE),
    )
}

/// Transcoder stand-in that records its pid, then idles until killed
#[cfg(unix)]
pub fn pid_recording_transcoder(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "fake-ffmpeg-pid",
        &format!("echo $$ > {}\nexec sleep 30", PID_FILE),
    )
}

/// Pid recorded by [`pid_recording_transcoder`]
pub async fn wait_for_pid(dir: &Path, timeout: Duration) -> Option<String> {
    let path = dir.join(PID_FILE);
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if let Ok(contents) = tokio::fs::read_to_string(&path).await {
            if !contents.trim().is_empty() {
                return Some(contents.trim().to_string());
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

/// Whether a process with this pid still exists
#[cfg(unix)]
pub fn process_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Transcoder stand-in that exits on its own after `secs`
#[cfg(unix)]
pub fn short_lived_transcoder(dir: &Path, secs: u32) -> PathBuf {
    write_script(
        dir,
        "fake-ffmpeg-exits",
        &format!("printf '%s\\n' \"$@\" >> {}\nsleep {}\nexit 3", ARGS_FILE, secs),
    )
}

/// Config that runs `program` inside `dir` with no STUN servers
pub fn local_config(program: &Path, dir: &Path) -> ForwarderConfig {
    ForwarderConfig::default()
        .with_stun_servers(vec![])
        .with_transcoder_program(program)
        .with_working_dir(dir)
}

/// Wait until the stub transcoder has recorded its arguments
pub async fn wait_for_args(dir: &Path, timeout: Duration) -> Option<Vec<String>> {
    let path = dir.join(ARGS_FILE);
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if let Ok(contents) = tokio::fs::read_to_string(&path).await {
            if !contents.is_empty() {
                return Some(contents.lines().map(str::to_string).collect());
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

/// Forwarder pair aimed at two ephemeral loopback receivers
pub async fn loopback_forwarders() -> (ForwarderPair, UdpSocket, UdpSocket) {
    let audio_rx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let video_rx = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let pair = ForwarderPair::new(
        UdpForwarder::dial(MediaKind::Audio, audio_rx.local_addr().unwrap())
            .await
            .unwrap(),
        UdpForwarder::dial(MediaKind::Video, video_rx.local_addr().unwrap())
            .await
            .unwrap(),
    );

    (pair, audio_rx, video_rx)
}

/// RTP source replaying canned packets, then ending the track
pub struct ScriptedTrack {
    ssrc: u32,
    packets: Mutex<VecDeque<Vec<u8>>>,
}

impl ScriptedTrack {
    pub fn new(ssrc: u32, packets: Vec<Vec<u8>>) -> Self {
        Self {
            ssrc,
            packets: Mutex::new(packets.into()),
        }
    }
}

#[async_trait]
impl RtpSource for ScriptedTrack {
    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    async fn read_rtp(&self, buf: &mut [u8]) -> remotemedia_webrtc_rtmp::Result<Option<usize>> {
        let Some(packet) = self.packets.lock().pop_front() else {
            return Ok(None);
        };
        buf[..packet.len()].copy_from_slice(&packet);
        Ok(Some(packet.len()))
    }
}

/// RTP source that never produces a packet
pub struct SilentTrack(pub u32);

#[async_trait]
impl RtpSource for SilentTrack {
    fn ssrc(&self) -> u32 {
        self.0
    }

    async fn read_rtp(&self, _buf: &mut [u8]) -> remotemedia_webrtc_rtmp::Result<Option<usize>> {
        std::future::pending().await
    }
}

/// Packet of `len` bytes with an RTP-like header and a recognisable body
pub fn fake_rtp_packet(seq: u16, len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; len];
    packet[0] = 0x80;
    packet[1] = 96;
    packet[2..4].copy_from_slice(&seq.to_be_bytes());
    for (i, byte) in packet.iter_mut().enumerate().skip(12) {
        *byte = (i as u8).wrapping_add(seq as u8);
    }
    packet
}
