//! Library facade tying fetcher, queue, reconciler and repair together
//! under one root directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::acquire::{AcquisitionPipeline, FfmpegSpawner, TranscodeSpawner, TEMP_SUFFIX};
use crate::config::StashConfig;
use crate::events::StashEvent;
use crate::fetch::{AssetFetcher, FetchOptions};
use crate::manifest::{self, CollectionLocks, Subtitle, MANIFEST_FILE, MEDIA_EXTENSIONS, POSTER_FILE};
use crate::queue::{Admission, DownloadJob, DownloadQueue};
use crate::reconcile::{self, ReconcileReport};
use crate::repair::{self, RepairReport, RepairRequest, SubtitleSource};
use crate::utils::filename::sanitize_collection_name;
use crate::utils::fs;
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One download order for the library.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Caller-supplied identity; duplicates are rejected while tracked.
    pub episode_id: String,
    /// Collection display name. Sanitized to form the directory name.
    pub collection: String,
    pub episode_number: u32,
    /// Media stream URL handed to the transcoder.
    pub url: String,
    /// Extra HTTP headers for both the stream and collateral fetches.
    pub headers: Vec<(String, String)>,
    pub poster_url: Option<String>,
    /// Subtitle sources fetched before the media download starts.
    pub subtitles: Vec<SubtitleSource>,
}

/// Snapshot of one collection on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSummary {
    pub name: String,
    pub dir: PathBuf,
    /// Manifest episode records.
    pub episodes: usize,
    /// Episodes whose media file is present and large enough to play.
    pub playable_episodes: usize,
    pub has_poster: bool,
}

/// The offline media library.
pub struct Library {
    root: PathBuf,
    config: StashConfig,
    fetcher: AssetFetcher,
    queue: DownloadQueue,
    events: broadcast::Sender<StashEvent>,
    manifest_locks: CollectionLocks,
}

impl Library {
    /// Open a library rooted at `root`, downloading via the configured
    /// ffmpeg binary.
    pub fn new(root: impl Into<PathBuf>, config: StashConfig) -> Result<Self> {
        let spawner = Arc::new(FfmpegSpawner::new(
            config.ffmpeg_path.clone(),
            config.user_agent.clone(),
        ));
        Self::with_spawner(root, config, spawner)
    }

    /// Open a library with a caller-supplied transcoder spawner.
    pub fn with_spawner(
        root: impl Into<PathBuf>,
        config: StashConfig,
        spawner: Arc<dyn TranscodeSpawner>,
    ) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let fetcher = AssetFetcher::new(&config)?;
        let manifest_locks = CollectionLocks::new();
        let pipeline = AcquisitionPipeline::new(spawner, config.clone(), events.clone());
        let queue = DownloadQueue::new(
            config.max_concurrent_downloads,
            pipeline,
            events.clone(),
            manifest_locks.clone(),
        );
        Ok(Self {
            root: root.into(),
            config,
            fetcher,
            queue,
            events,
            manifest_locks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a collection name maps to.
    pub fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(sanitize_collection_name(collection))
    }

    /// Subscribe to download lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<StashEvent> {
        self.events.subscribe()
    }

    /// Order an episode download. Collateral (poster, subtitles) is fetched
    /// up front, best effort; the media itself goes through the queue.
    pub async fn download(&self, req: DownloadRequest) -> Result<Admission> {
        if self.queue.is_tracked(&req.episode_id) {
            return Err(Error::DuplicateJob(req.episode_id));
        }

        let dir = self.collection_dir(&req.collection);
        fs::ensure_dir_all(&dir).await?;

        let options = FetchOptions {
            headers: req.headers.clone(),
            ..Default::default()
        };

        if let Some(url) = &req.poster_url {
            if let Err(e) = self
                .fetcher
                .fetch(url, &dir.join(POSTER_FILE), &options)
                .await
            {
                warn!(url, error = %e, "Poster fetch failed, continuing without it");
            }
        }

        let mut subtitle_records = Vec::new();
        for source in &req.subtitles {
            let file = format!("Episode_{}_{}.vtt", req.episode_number, source.lang);
            match self.fetcher.fetch(&source.url, &dir.join(&file), &options).await {
                Ok(_) => subtitle_records.push(Subtitle {
                    lang: source.lang.clone(),
                    label: source.label.clone().unwrap_or_else(|| source.lang.clone()),
                    file,
                }),
                Err(e) => {
                    warn!(lang = %source.lang, error = %e, "Subtitle fetch failed, continuing without it");
                }
            }
        }

        // First download of a collection persists the caller's display name
        // (loading a missing manifest only seeds the directory name, which
        // has the invalid characters stripped) and the poster source so a
        // later repair pass can re-fetch it.
        {
            let lock = self.manifest_locks.for_dir(&dir);
            let _guard = lock.lock().await;
            let manifest_existed = manifest::manifest_path(&dir).is_file();
            let mut m = manifest::load(&dir).await?;
            let mut manifest_dirty = false;
            if !manifest_existed {
                m.collection_name = req.collection.clone();
                manifest_dirty = true;
            }
            if m.poster_url.is_none() && req.poster_url.is_some() {
                m.poster_url = req.poster_url.clone();
                manifest_dirty = true;
            }
            if manifest_dirty {
                manifest::store(&dir, &m).await?;
            }
        }

        let job = DownloadJob {
            episode_id: req.episode_id,
            collection_dir: dir.clone(),
            episode_number: req.episode_number,
            url: req.url,
            headers: req.headers,
            output: dir.join(format!("Episode_{}.mp4", req.episode_number)),
            subtitles: subtitle_records,
        };
        info!(episode_id = %job.episode_id, dir = %dir.display(), "Download submitted");
        self.queue.submit(job)
    }

    /// Cancel a tracked download. When a collection is supplied its
    /// directory is swept: temp debris removed, and the directory (manifest
    /// first) deleted when nothing playable remains. Returns whether the id
    /// was actually tracked; an unknown id is not an error.
    pub async fn cancel(&self, episode_id: &str, collection: Option<&str>) -> Result<bool> {
        let was_tracked = self.queue.cancel(episode_id);
        if let Some(collection) = collection {
            // The worker removes its own temp file; this sweeps anything an
            // earlier interrupted run left behind.
            self.cleanup_collection(&self.collection_dir(collection))
                .await?;
        }
        Ok(was_tracked)
    }

    /// List collections under the root with their manifest state.
    pub async fn list(&self) -> Result<Vec<CollectionSummary>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(fs::io_error("read_dir", &self.root, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| fs::io_error("read_dir", &self.root, e))?
        {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let m = manifest::load(&dir).await?;
            let mut playable = 0usize;
            for episode in &m.episodes {
                if let Some(size) = fs::file_size(&dir.join(&episode.file)).await {
                    if size >= self.config.min_valid_media_bytes {
                        playable += 1;
                    }
                }
            }
            out.push(CollectionSummary {
                name: m.collection_name,
                has_poster: dir.join(POSTER_FILE).is_file(),
                episodes: m.episodes.len(),
                playable_episodes: playable,
                dir,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Remove a collection and everything in it.
    pub async fn delete_collection(&self, collection: &str) -> Result<()> {
        let dir = self.collection_dir(collection);
        if !dir.is_dir() {
            return Err(Error::not_found("collection", collection));
        }
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| fs::io_error("remove_dir_all", &dir, e))?;
        info!(dir = %dir.display(), "Collection deleted");
        Ok(())
    }

    /// Register on-disk media missing from manifests.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        reconcile::reconcile_root(&self.root, &self.config).await
    }

    /// Fill poster and subtitle gaps in one collection.
    pub async fn repair(&self, req: &RepairRequest) -> Result<RepairReport> {
        let lock = self.manifest_locks.for_dir(&req.collection_dir);
        let _guard = lock.lock().await;
        repair::repair_collection(&self.fetcher, req).await
    }

    pub fn running_downloads(&self) -> usize {
        self.queue.running_count()
    }

    pub fn queued_downloads(&self) -> usize {
        self.queue.queued_count()
    }

    /// Sweep temp debris from a collection. When no playable media remains
    /// the whole directory goes, manifest first so a crash mid-cleanup
    /// never leaves a manifest pointing at deleted files.
    ///
    /// Holds the collection's manifest lock so the sweep cannot interleave
    /// with a worker that is between committing its output and writing the
    /// manifest record.
    async fn cleanup_collection(&self, dir: &Path) -> Result<()> {
        let lock = self.manifest_locks.for_dir(dir);
        let _guard = lock.lock().await;

        if !dir.is_dir() {
            return Ok(());
        }

        let mut playable = 0usize;
        let mut temp_files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| fs::io_error("read_dir", dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| fs::io_error("read_dir", dir, e))?
        {
            let path = entry.path();
            if path.to_string_lossy().ends_with(TEMP_SUFFIX) {
                temp_files.push(path);
                continue;
            }
            let is_media = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_media {
                if let Some(size) = fs::file_size(&path).await {
                    if size >= self.config.min_valid_media_bytes {
                        playable += 1;
                    }
                }
            }
        }

        if playable == 0 {
            fs::remove_file_if_exists(&dir.join(MANIFEST_FILE)).await?;
            tokio::fs::remove_dir_all(dir)
                .await
                .map_err(|e| fs::io_error("remove_dir_all", dir, e))?;
            info!(dir = %dir.display(), "Removed empty collection directory");
            return Ok(());
        }

        for path in temp_files {
            debug!(path = %path.display(), "Removing temp debris");
            fs::remove_file_if_exists(&path).await?;
        }
        Ok(())
    }
}
