//! External transcoder subprocess abstraction.
//!
//! The pipeline talks to the process through the [`TranscodeProcess`] /
//! [`TranscodeSpawner`] traits so it can be driven by a scripted fake in
//! tests instead of a real ffmpeg binary.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tracing::debug;

use crate::{Error, Result};

/// One running transcoder invocation.
#[async_trait]
pub trait TranscodeProcess: Send {
    /// Next control-plane line, or `None` at end of stream.
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Reap the process after the control stream ended. Returns whether it
    /// exited successfully.
    async fn wait(&mut self) -> Result<bool>;

    /// Forcibly terminate the process.
    async fn kill(&mut self);
}

/// Factory for transcoder invocations.
#[async_trait]
pub trait TranscodeSpawner: Send + Sync {
    /// Launch one invocation reading `url` (with `headers`) and writing a
    /// demuxed copy to `temp_output`.
    async fn spawn(
        &self,
        url: &str,
        headers: &[(String, String)],
        temp_output: &Path,
    ) -> Result<Box<dyn TranscodeProcess>>;
}

/// ffmpeg-backed spawner.
pub struct FfmpegSpawner {
    binary: String,
    user_agent: String,
}

impl FfmpegSpawner {
    pub fn new(binary: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Build the argument list for one invocation.
    ///
    /// The output container format is forced to mp4 regardless of the temp
    /// path's `.tmp` extension, and streams are copied without re-encoding.
    fn build_args(&self, url: &str, headers: &[(String, String)], temp_output: &Path) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-hide_banner".to_string()];

        let user_agent = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.user_agent.clone());
        args.extend(["-user_agent".to_string(), user_agent]);

        args.extend([
            "-analyzeduration".to_string(),
            "10000000".to_string(),
            "-probesize".to_string(),
            "10000000".to_string(),
        ]);

        let extra_headers: Vec<String> = headers
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("user-agent"))
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        if !extra_headers.is_empty() {
            args.extend([
                "-headers".to_string(),
                format!("{}\r\n", extra_headers.join("\r\n")),
            ]);
        }

        args.extend([
            "-protocol_whitelist".to_string(),
            "file,http,https,tcp,tls,crypto".to_string(),
            "-i".to_string(),
            url.to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-bsf:a".to_string(),
            "aac_adtstoasc".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "0:a:0".to_string(),
            "-map".to_string(),
            "0:s?".to_string(),
            "-c:s".to_string(),
            "mov_text".to_string(),
        ]);

        args.push(temp_output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl TranscodeSpawner for FfmpegSpawner {
    async fn spawn(
        &self,
        url: &str,
        headers: &[(String, String)],
        temp_output: &Path,
    ) -> Result<Box<dyn TranscodeProcess>> {
        let args = self.build_args(url, headers, temp_output);
        debug!(binary = %self.binary, ?args, "Spawning transcoder");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ProcessFailure(format!("failed to spawn {}: {e}", self.binary)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::ProcessFailure("failed to capture transcoder stderr".into()))?;

        Ok(Box::new(FfmpegProcess {
            child,
            lines: BufReader::new(stderr).lines(),
        }))
    }
}

struct FfmpegProcess {
    child: Child,
    lines: Lines<BufReader<ChildStderr>>,
}

#[async_trait]
impl TranscodeProcess for FfmpegProcess {
    async fn next_line(&mut self) -> Result<Option<String>> {
        self.lines
            .next_line()
            .await
            .map_err(|e| Error::ProcessFailure(format!("error reading transcoder output: {e}")))
    }

    async fn wait(&mut self) -> Result<bool> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::ProcessFailure(format!("error waiting for transcoder: {e}")))?;
        Ok(status.success())
    }

    async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}
