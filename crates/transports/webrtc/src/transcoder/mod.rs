//! External transcoder supervision
//!
//! The transcoder reads the two loopback RTP inputs described by the SDP
//! file and pushes FLV to the RTMP ingestion URL. One child per session;
//! its lifetime is bound to the session scope in both directions:
//! cancelling the scope kills the child, and the child exiting cancels the
//! scope.

pub mod sdp;

use crate::config::TranscoderConfig;
use crate::session::scope::{SessionScope, TeardownReason};
use crate::{Error, Result};
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Build the transcoder argument vector
///
/// Order-sensitive: `-protocol_whitelist` must precede `-i` for ffmpeg to
/// accept the `rtp`/`udp` inputs listed in the SDP file.
pub fn transcoder_args(sdp_path: &std::path::Path, stream_url: &str) -> Vec<OsString> {
    vec![
        "-protocol_whitelist".into(),
        "file,udp,rtp".into(),
        "-i".into(),
        sdp_path.as_os_str().to_owned(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
        "-f".into(),
        "flv".into(),
        "-strict".into(),
        "-2".into(),
        stream_url.into(),
    ]
}

/// Launches transcoders for sessions
#[derive(Debug, Clone)]
pub struct TranscoderSupervisor {
    config: TranscoderConfig,
}

/// Handle to a running (or finished) transcoder
#[derive(Debug, Clone)]
pub struct TranscoderHandle {
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<TranscoderExit>>,
}

/// How the transcoder ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderExit {
    /// Exited on its own with this status
    Exited(ExitStatus),
    /// Killed because the session scope was cancelled
    Terminated,
    /// Waiting on the child failed
    Lost,
}

impl TranscoderSupervisor {
    /// Create a supervisor for the given transcoder settings
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Spawn the transcoder for `stream_url`, bound to `scope`
    ///
    /// Writes the SDP description first when configured to. Spawning
    /// fails with [`Error::Supervision`]; once spawned, the child's exit
    /// cancels `scope` with [`TeardownReason::TranscoderExited`].
    pub async fn spawn(&self, stream_url: &str, scope: &SessionScope) -> Result<TranscoderHandle> {
        if self.config.write_sdp_file {
            let sdp_path = match &self.config.working_dir {
                Some(dir) if self.config.sdp_path.is_relative() => dir.join(&self.config.sdp_path),
                _ => self.config.sdp_path.clone(),
            };
            sdp::ensure_sdp_file(&sdp_path).await?;
        }

        let args = transcoder_args(&self.config.sdp_path, stream_url);

        let mut command = Command::new(&self.config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(if self.config.forward_diagnostics {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::Supervision(format!(
                "Failed to spawn transcoder {}: {}",
                self.config.program.display(),
                e
            ))
        })?;

        let pid = child.id();
        info!(
            session_id = scope.session_id(),
            pid = ?pid,
            program = %self.config.program.display(),
            "Transcoder started"
        );

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_diagnostics(stderr, scope.clone()));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(watch_child(child, scope.clone(), exit_tx));

        Ok(TranscoderHandle { pid, exit_rx })
    }
}

impl TranscoderHandle {
    /// OS process id, if the child was still running when queried at spawn
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the child has been reaped
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Exit outcome, if reaped
    pub fn exit(&self) -> Option<TranscoderExit> {
        *self.exit_rx.borrow()
    }

    /// Wait until the child has been reaped
    pub async fn wait_exit(&mut self) -> TranscoderExit {
        loop {
            if let Some(exit) = *self.exit_rx.borrow_and_update() {
                return exit;
            }
            if self.exit_rx.changed().await.is_err() {
                // watcher task gone without reporting
                return self.exit().unwrap_or(TranscoderExit::Lost);
            }
        }
    }

    /// Wait at most `timeout` for the child to be reaped
    pub async fn wait_exit_timeout(&mut self, timeout: Duration) -> Option<TranscoderExit> {
        tokio::time::timeout(timeout, self.wait_exit()).await.ok()
    }
}

/// Reap the child, killing it on scope cancellation
async fn watch_child(
    mut child: Child,
    scope: SessionScope,
    exit_tx: watch::Sender<Option<TranscoderExit>>,
) {
    let exit = tokio::select! {
        status = child.wait() => {
            let exit = match status {
                Ok(status) => {
                    warn!(session_id = scope.session_id(), %status, "Transcoder exited");
                    TranscoderExit::Exited(status)
                }
                Err(e) => {
                    error!(session_id = scope.session_id(), "Failed to wait on transcoder: {}", e);
                    TranscoderExit::Lost
                }
            };
            scope.cancel(TeardownReason::TranscoderExited);
            exit
        }
        _ = scope.cancelled() => {
            debug!(session_id = scope.session_id(), "Scope cancelled, terminating transcoder");
            if let Err(e) = child.start_kill() {
                warn!(session_id = scope.session_id(), "Failed to kill transcoder: {}", e);
            }
            match child.wait().await {
                Ok(status) => {
                    info!(session_id = scope.session_id(), %status, "Transcoder terminated");
                    TranscoderExit::Terminated
                }
                Err(e) => {
                    error!(session_id = scope.session_id(), "Failed to reap transcoder: {}", e);
                    TranscoderExit::Lost
                }
            }
        }
    };

    let _ = exit_tx.send(Some(exit));
}

/// Forward stderr lines to the log until EOF or cancellation
async fn drain_diagnostics(stderr: ChildStderr, scope: SessionScope) {
    let mut lines = BufReader::new(stderr).lines();

    loop {
        let line = tokio::select! {
            _ = scope.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                debug!(target: "transcoder", session_id = scope.session_id(), "{}", line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(session_id = scope.session_id(), "Transcoder stderr read failed: {}", e);
                break;
            }
        }
    }

    debug!(session_id = scope.session_id(), "Transcoder diagnostic drain ended");
}
