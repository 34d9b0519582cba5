//! Outbound event stream for download lifecycle and progress.
//!
//! A single multiplexed broadcast channel carries events for every job,
//! tagged by episode id, so multiple consumers (UI, logging) can subscribe
//! without coupling to the pipeline internals.

use serde::Serialize;
use std::path::PathBuf;

/// Pre-formatted progress sample for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSample {
    /// Integer percent, in [0, 99] while running and exactly 100 on
    /// verified completion. Never regresses.
    pub percent: u8,
    /// Human-readable throughput label, e.g. "2.1 MB/s".
    pub speed: String,
    /// Human-readable remaining-time label, e.g. "3m 20s".
    pub eta: String,
    /// Human-readable downloaded-bytes label, e.g. "120.5 MB".
    pub downloaded: String,
    /// Human-readable elapsed wall-clock label.
    pub elapsed: String,
}

/// Events pushed to subscribers of [`Library::subscribe`](crate::Library::subscribe).
#[derive(Debug, Clone, Serialize)]
pub enum StashEvent {
    /// The job acquired a concurrency slot and its process is starting.
    Started { episode_id: String },
    /// Throttled progress update.
    Progress {
        episode_id: String,
        sample: ProgressSample,
    },
    /// The destination file is fully written and verified.
    Completed {
        episode_id: String,
        path: PathBuf,
        size: u64,
    },
    /// The job failed; the concurrency slot has already been freed.
    Failed { episode_id: String, error: String },
    /// The job was stopped by the caller. Not a failure.
    Cancelled { episode_id: String },
}

impl StashEvent {
    /// Episode id the event belongs to.
    pub fn episode_id(&self) -> &str {
        match self {
            Self::Started { episode_id }
            | Self::Progress { episode_id, .. }
            | Self::Completed { episode_id, .. }
            | Self::Failed { episode_id, .. }
            | Self::Cancelled { episode_id } => episode_id,
        }
    }

    /// True for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}
