//! Configuration types for the forwarder
//!
//! Only the operational knobs live here. Codec payload types and loopback
//! ports are wire-locked constants in [`crate::media`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default public STUN server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Main configuration for a forwarding session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// STUN server URLs handed to the peer connection
    pub stun_servers: Vec<String>,

    /// Interval between Picture Loss Indications per track (default: 2000ms)
    pub pli_interval_ms: u64,

    /// How long teardown waits for the transcoder to exit (default: 500ms)
    pub teardown_settle_ms: u64,

    /// Transcoder process settings
    pub transcoder: TranscoderConfig,
}

/// External transcoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Program to execute (default: `ffmpeg` from PATH)
    pub program: PathBuf,

    /// SDP description passed to `-i` (default: `rtp-forwarder.sdp`)
    pub sdp_path: PathBuf,

    /// Working directory for the child; inherits ours when `None`
    pub working_dir: Option<PathBuf>,

    /// Write the SDP description before spawning if it does not exist
    pub write_sdp_file: bool,

    /// Forward the transcoder's stderr lines to the log
    pub forward_diagnostics: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            pli_interval_ms: 2000,
            teardown_settle_ms: 500,
            transcoder: TranscoderConfig::default(),
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            sdp_path: PathBuf::from("rtp-forwarder.sdp"),
            working_dir: None,
            write_sdp_file: true,
            forward_diagnostics: true,
        }
    }
}

impl ForwarderConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a STUN server URL does not start with `stun:` or `stuns:`
    /// - `pli_interval_ms` is not in range 100-10000
    /// - `teardown_settle_ms` is greater than 10000
    /// - the transcoder program or SDP path is empty
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        if self.pli_interval_ms < 100 || self.pli_interval_ms > 10000 {
            return Err(Error::InvalidConfig(format!(
                "pli_interval_ms must be in range 100-10000, got {}",
                self.pli_interval_ms
            )));
        }

        if self.teardown_settle_ms > 10000 {
            return Err(Error::InvalidConfig(format!(
                "teardown_settle_ms must be at most 10000, got {}",
                self.teardown_settle_ms
            )));
        }

        if self.transcoder.program.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "transcoder program must not be empty".to_string(),
            ));
        }

        if self.transcoder.sdp_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "transcoder sdp_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// PLI interval as a [`Duration`]
    pub fn pli_interval(&self) -> Duration {
        Duration::from_millis(self.pli_interval_ms)
    }

    /// Teardown settle period as a [`Duration`]
    pub fn teardown_settle(&self) -> Duration {
        Duration::from_millis(self.teardown_settle_ms)
    }

    /// Replace the STUN server list
    ///
    /// Useful for chaining; an empty list disables server-reflexive
    /// candidates entirely.
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Set the transcoder program
    pub fn with_transcoder_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.transcoder.program = program.into();
        self
    }

    /// Set the transcoder working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transcoder.working_dir = Some(dir.into());
        self
    }

    /// Set the PLI interval in milliseconds
    pub fn with_pli_interval_ms(mut self, pli_interval_ms: u64) -> Self {
        self.pli_interval_ms = pli_interval_ms;
        self
    }
}
