//! Runtime configuration for the download and library core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default User-Agent presented to remote sources when the caller supplies none.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Configuration for the stash: queue limits, subprocess supervision windows,
/// and the placeholder estimates used for progress UX when the source does not
/// report real totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// Maximum concurrently running acquisitions; the rest wait FIFO.
    pub max_concurrent_downloads: usize,
    /// Path to the external transcoder binary.
    pub ffmpeg_path: String,
    /// Files at or below this size are treated as corrupt/incomplete media.
    pub min_valid_media_bytes: u64,
    /// Reconciliation skips on-disk files smaller than this.
    pub reconcile_min_bytes: u64,
    /// Kill the transcoder when no control-plane output arrives within this
    /// window after launch.
    pub stall_timeout: Duration,
    /// Minimum interval between outward progress events when the percent
    /// value has not changed.
    pub progress_interval: Duration,
    /// Assumed media duration in seconds when the control stream never
    /// reports one; keeps percent monotonic and bounded.
    pub assumed_duration_secs: u64,
    /// Assumed total byte size used for the speed/ETA estimates.
    pub assumed_total_bytes: u64,
    /// User-Agent for the transcoder and asset fetches.
    pub user_agent: String,
    /// Per-request timeout for poster/subtitle fetches.
    pub fetch_timeout: Duration,
    /// Redirect cap for asset fetches.
    pub max_redirects: usize,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            ffmpeg_path: "ffmpeg".to_string(),
            min_valid_media_bytes: 1024,
            reconcile_min_bytes: 1024 * 1024,
            stall_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_secs(2),
            assumed_duration_secs: 1440,
            assumed_total_bytes: 300 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout: Duration::from_secs(30),
            max_redirects: 5,
        }
    }
}
