//! Acquisition pipeline: drives a transcoder subprocess to a temp file and
//! commits the result atomically into the collection directory.
//!
//! The stall window restarts on every control-plane line, so a source that
//! goes silent mid-transfer is killed the same way as one that never sends
//! anything after launch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acquire::parse::{parse_duration_line, parse_time_position};
use crate::acquire::process::TranscodeSpawner;
use crate::config::StashConfig;
use crate::events::{ProgressSample, StashEvent};
use crate::utils::format::{format_bytes, format_duration, format_speed};
use crate::utils::fs;
use crate::{Error, Result};

/// Suffix appended to the final output path while the transcoder is writing.
pub const TEMP_SUFFIX: &str = ".tmp";

/// One acquisition to perform.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub episode_id: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Final output path. The pipeline writes to `output + ".tmp"` and
    /// renames on success.
    pub output: PathBuf,
}

impl AcquireRequest {
    pub fn temp_path(&self) -> PathBuf {
        let mut s = self.output.as_os_str().to_owned();
        s.push(TEMP_SUFFIX);
        PathBuf::from(s)
    }
}

/// Derives throttled progress samples from transcoder output lines.
///
/// Percentages are monotonic non-decreasing and clamped to 99; only a
/// committed output reports 100. When the source does not announce a
/// duration, speed and ETA fall back to configured assumptions.
pub struct ProgressTracker {
    duration_secs: Option<u64>,
    assumed_duration_secs: u64,
    assumed_total_bytes: u64,
    interval: Duration,
    last_percent: u8,
    last_emit: Option<Duration>,
}

impl ProgressTracker {
    pub fn new(config: &StashConfig) -> Self {
        Self {
            duration_secs: None,
            assumed_duration_secs: config.assumed_duration_secs,
            assumed_total_bytes: config.assumed_total_bytes,
            interval: config.progress_interval,
            last_percent: 0,
            last_emit: None,
        }
    }

    /// Feed one output line. Returns a sample when progress moved or the
    /// emit interval elapsed.
    pub fn observe(&mut self, line: &str, elapsed: Duration) -> Option<ProgressSample> {
        if let Some(secs) = parse_duration_line(line) {
            if secs > 0 {
                self.duration_secs = Some(secs);
            }
            return None;
        }

        let position = parse_time_position(line)?;
        let duration = self.duration_secs.unwrap_or(self.assumed_duration_secs) as f64;
        let raw = ((position / duration) * 100.0).floor() as i64;
        let percent = raw.clamp(0, 99) as u8;
        let percent = percent.max(self.last_percent);

        let moved = percent != self.last_percent;
        let due = match self.last_emit {
            Some(at) => elapsed.saturating_sub(at) >= self.interval,
            None => true,
        };
        if !moved && !due {
            return None;
        }

        self.last_percent = percent;
        self.last_emit = Some(elapsed);
        Some(self.sample(percent, elapsed))
    }

    fn sample(&self, percent: u8, elapsed: Duration) -> ProgressSample {
        let downloaded = (self.assumed_total_bytes as f64 * percent as f64 / 100.0) as u64;
        let secs = elapsed.as_secs_f64().max(0.001);
        let speed = downloaded as f64 / secs;
        let eta_secs = if percent > 0 && speed > 0.0 {
            self.assumed_total_bytes.saturating_sub(downloaded) as f64 / speed
        } else {
            0.0
        };
        ProgressSample {
            percent,
            speed: format_speed(speed),
            eta: format_duration(eta_secs),
            downloaded: format_bytes(downloaded),
            elapsed: format_duration(elapsed.as_secs_f64()),
        }
    }
}

/// Runs acquisitions end to end. Cheap to clone via the shared spawner.
pub struct AcquisitionPipeline {
    spawner: Arc<dyn TranscodeSpawner>,
    config: StashConfig,
    events: broadcast::Sender<StashEvent>,
}

impl AcquisitionPipeline {
    pub fn new(
        spawner: Arc<dyn TranscodeSpawner>,
        config: StashConfig,
        events: broadcast::Sender<StashEvent>,
    ) -> Self {
        Self {
            spawner,
            config,
            events,
        }
    }

    /// Acquire one episode. Idempotent: a valid existing output short
    /// circuits to success without spawning anything.
    pub async fn run(&self, req: &AcquireRequest, cancel: CancellationToken) -> Result<u64> {
        let temp = req.temp_path();

        // A leftover temp file from an interrupted run is never trusted.
        fs::remove_file_if_exists(&temp).await?;

        if let Some(size) = fs::file_size(&req.output).await {
            if size >= self.config.min_valid_media_bytes {
                debug!(episode_id = %req.episode_id, size, "Output already present, skipping");
                self.emit_progress(&req.episode_id, self.final_sample(size, Duration::ZERO));
                return Ok(size);
            }
            // Undersized remnant, redo from scratch.
            fs::remove_file_if_exists(&req.output).await?;
        }

        fs::ensure_parent_dir(&req.output).await?;

        let mut process = self.spawner.spawn(&req.url, &req.headers, &temp).await?;
        let mut tracker = ProgressTracker::new(&self.config);
        let started = Instant::now();
        let mut deadline = started + self.config.stall_timeout;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(episode_id = %req.episode_id, "Acquisition cancelled");
                    process.kill().await;
                    fs::remove_file_if_exists(&temp).await?;
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    warn!(episode_id = %req.episode_id, "Transcoder stalled, killing");
                    process.kill().await;
                    fs::remove_file_if_exists(&temp).await?;
                    return Err(Error::StallTimeout(self.config.stall_timeout));
                }
                line = process.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            deadline = Instant::now() + self.config.stall_timeout;
                            if let Some(sample) = tracker.observe(&line, started.elapsed()) {
                                self.emit_progress(&req.episode_id, sample);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            process.kill().await;
                            fs::remove_file_if_exists(&temp).await?;
                            return Err(e);
                        }
                    }
                }
            }
        }

        let ok = process.wait().await?;
        if !ok {
            fs::remove_file_if_exists(&temp).await?;
            return Err(Error::ProcessFailure(
                "transcoder exited with a failure status".into(),
            ));
        }

        let size = fs::file_size(&temp).await.unwrap_or(0);
        if size < self.config.min_valid_media_bytes {
            fs::remove_file_if_exists(&temp).await?;
            return Err(Error::OutputInvalid(format!(
                "output too small ({size} bytes), treating as failed"
            )));
        }

        tokio::fs::rename(&temp, &req.output)
            .await
            .map_err(|e| fs::io_error("rename", &req.output, e))?;

        info!(episode_id = %req.episode_id, size, path = %req.output.display(), "Acquisition complete");
        self.emit_progress(&req.episode_id, self.final_sample(size, started.elapsed()));
        Ok(size)
    }

    fn final_sample(&self, size: u64, elapsed: Duration) -> ProgressSample {
        ProgressSample {
            percent: 100,
            speed: format_speed(0.0),
            eta: format_duration(0.0),
            downloaded: format_bytes(size),
            elapsed: format_duration(elapsed.as_secs_f64()),
        }
    }

    fn emit_progress(&self, episode_id: &str, sample: ProgressSample) {
        let _ = self.events.send(StashEvent::Progress {
            episode_id: episode_id.to_string(),
            sample,
        });
    }
}
