//! Bounded FIFO download queue.
//!
//! At most `max_concurrent_downloads` acquisitions run at once; further
//! submissions wait in arrival order. An episode id is tracked from
//! submission until its terminal event, and a second submission of a
//! tracked id is rejected.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::acquire::{AcquireRequest, AcquisitionPipeline};
use crate::events::StashEvent;
use crate::manifest::{self, CollectionLocks, Episode, Subtitle};
use crate::{Error, Result};

/// One unit of work for the queue.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub episode_id: String,
    pub collection_dir: PathBuf,
    pub episode_number: u32,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Final media path inside `collection_dir`.
    pub output: PathBuf,
    /// Subtitle records to attach to the manifest entry on completion.
    pub subtitles: Vec<Subtitle>,
}

/// Outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A worker slot was free; the download started immediately.
    Started,
    /// All slots busy; the job waits in FIFO order.
    Queued,
}

struct QueueState {
    running: HashMap<String, CancellationToken>,
    waiting: VecDeque<DownloadJob>,
}

struct QueueInner {
    limit: usize,
    state: Mutex<QueueState>,
    pipeline: AcquisitionPipeline,
    events: broadcast::Sender<StashEvent>,
    manifest_locks: CollectionLocks,
}

/// Handle to the queue. Clones share the same state.
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

impl DownloadQueue {
    pub fn new(
        limit: usize,
        pipeline: AcquisitionPipeline,
        events: broadcast::Sender<StashEvent>,
        manifest_locks: CollectionLocks,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                limit: limit.max(1),
                state: Mutex::new(QueueState {
                    running: HashMap::new(),
                    waiting: VecDeque::new(),
                }),
                pipeline,
                events,
                manifest_locks,
            }),
        }
    }

    /// Submit a job. Rejects ids that are already running or waiting.
    pub fn submit(&self, job: DownloadJob) -> Result<Admission> {
        let start_now = {
            let mut state = self.inner.state.lock();
            if state.running.contains_key(&job.episode_id)
                || state.waiting.iter().any(|j| j.episode_id == job.episode_id)
            {
                return Err(Error::DuplicateJob(job.episode_id.clone()));
            }
            if state.running.len() < self.inner.limit {
                state
                    .running
                    .insert(job.episode_id.clone(), CancellationToken::new());
                true
            } else {
                state.waiting.push_back(job.clone());
                false
            }
        };

        if start_now {
            self.spawn_worker(job);
            Ok(Admission::Started)
        } else {
            debug!(queued = self.queued_count(), "Download queued");
            Ok(Admission::Queued)
        }
    }

    /// Cancel a running or waiting download. Returns false for unknown ids.
    pub fn cancel(&self, episode_id: &str) -> bool {
        let mut state = self.inner.state.lock();
        if let Some(token) = state.running.get(episode_id) {
            token.cancel();
            return true;
        }
        if let Some(pos) = state
            .waiting
            .iter()
            .position(|j| j.episode_id == episode_id)
        {
            state.waiting.remove(pos);
            drop(state);
            let _ = self.inner.events.send(StashEvent::Cancelled {
                episode_id: episode_id.to_string(),
            });
            return true;
        }
        false
    }

    /// True while the id is running or waiting.
    pub fn is_tracked(&self, episode_id: &str) -> bool {
        let state = self.inner.state.lock();
        state.running.contains_key(episode_id)
            || state.waiting.iter().any(|j| j.episode_id == episode_id)
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StashEvent> {
        self.inner.events.subscribe()
    }

    fn spawn_worker(&self, job: DownloadJob) {
        let queue = self.clone();
        tokio::spawn(async move {
            let token = {
                let state = queue.inner.state.lock();
                match state.running.get(&job.episode_id) {
                    Some(t) => t.clone(),
                    None => return,
                }
            };

            let episode_id = job.episode_id.clone();
            let _ = queue.inner.events.send(StashEvent::Started {
                episode_id: episode_id.clone(),
            });

            let event = match queue.run_job(&job, token).await {
                Ok(size) => StashEvent::Completed {
                    episode_id: episode_id.clone(),
                    path: job.output.clone(),
                    size,
                },
                Err(e) if e.is_cancelled() => StashEvent::Cancelled {
                    episode_id: episode_id.clone(),
                },
                Err(e) => {
                    error!(episode_id = %episode_id, error = %e, "Download failed");
                    StashEvent::Failed {
                        episode_id: episode_id.clone(),
                        error: e.to_string(),
                    }
                }
            };

            queue.finish(&episode_id);
            let _ = queue.inner.events.send(event);
        });
    }

    async fn run_job(&self, job: &DownloadJob, token: CancellationToken) -> Result<u64> {
        let req = AcquireRequest {
            episode_id: job.episode_id.clone(),
            url: job.url.clone(),
            headers: job.headers.clone(),
            output: job.output.clone(),
        };
        let size = self.inner.pipeline.run(&req, token).await?;

        // Only a committed output earns a manifest record. The per-collection
        // lock keeps concurrent completions from overwriting each other's
        // load-upsert-store cycle.
        let lock = self.inner.manifest_locks.for_dir(&job.collection_dir);
        let _guard = lock.lock().await;
        let mut m = manifest::load(&job.collection_dir).await?;
        let file = job
            .output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        m.upsert_episode(Episode {
            id: job.episode_id.clone(),
            number: job.episode_number,
            file,
            subtitles: job.subtitles.clone(),
            added_at: Utc::now(),
            size: Some(size),
            discovered: false,
        });
        m.sort_episodes();
        manifest::store(&job.collection_dir, &m).await?;
        Ok(size)
    }

    /// Release the slot held by `episode_id` and admit waiting jobs in
    /// arrival order.
    fn finish(&self, episode_id: &str) {
        let mut to_start = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.running.remove(episode_id);
            while state.running.len() < self.inner.limit {
                let Some(next) = state.waiting.pop_front() else {
                    break;
                };
                state
                    .running
                    .insert(next.episode_id.clone(), CancellationToken::new());
                to_start.push(next);
            }
        }
        for job in to_start {
            info!(episode_id = %job.episode_id, "Admitting queued download");
            self.spawn_worker(job);
        }
    }
}
