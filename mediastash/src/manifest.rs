//! Durable per-collection manifest of downloaded media.
//!
//! One `manifest.json` per collection directory is the source of truth for
//! what the application considers downloaded. It may lag behind the
//! filesystem (extra files are picked up by reconciliation) but must never
//! claim an episode that has no record.
//!
//! In-process writers serialize per collection through [`CollectionLocks`];
//! concurrent external edits to the file are not supported. Writes go through
//! a uniquely named temp file and a rename so an external reader never
//! observes a torn document.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::utils::fs;
use crate::{Error, Result};

/// Manifest filename inside each collection directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// File extensions treated as playable media.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm"];

/// Poster filename inside each collection directory.
pub const POSTER_FILE: &str = "poster.jpg";

fn is_false(v: &bool) -> bool {
    !*v
}

/// One subtitle track of an episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtitle {
    /// Language code, e.g. "en".
    pub lang: String,
    /// Display label, e.g. "English".
    pub label: String,
    /// Filename relative to the collection directory.
    pub file: String,
}

/// One downloaded (or discovered) episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Caller-supplied episode identity.
    pub id: String,
    /// Episode number used for ordering and collateral filenames.
    pub number: u32,
    /// Media filename relative to the collection directory.
    pub file: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtitles: Vec<Subtitle>,
    /// When the record was created.
    pub added_at: DateTime<Utc>,
    /// Observed byte size, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Set when the record was created by reconciliation rather than a
    /// download.
    #[serde(default, skip_serializing_if = "is_false")]
    pub discovered: bool,
}

/// The per-collection manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Collection display name.
    pub collection_name: String,
    /// Source URL of the poster, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

impl Manifest {
    /// An empty manifest seeded with a display name.
    pub fn new(collection_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            poster_url: None,
            episodes: Vec::new(),
        }
    }

    pub fn episode_by_id(&self, id: &str) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.id == id)
    }

    pub fn episode_by_id_mut(&mut self, id: &str) -> Option<&mut Episode> {
        self.episodes.iter_mut().find(|e| e.id == id)
    }

    /// True when any record references `file` as its media filename.
    pub fn references_file(&self, file: &str) -> bool {
        self.episodes.iter().any(|e| e.file == file)
    }

    /// True when any record carries this episode number.
    pub fn has_episode_number(&self, number: u32) -> bool {
        self.episodes.iter().any(|e| e.number == number)
    }

    /// Insert or merge an episode record.
    ///
    /// When a record with the same id exists, its fields are preserved except
    /// that a non-empty incoming subtitle list replaces the prior one.
    /// Otherwise the record is appended. At most one record per id, always.
    pub fn upsert_episode(&mut self, episode: Episode) {
        match self.episode_by_id_mut(&episode.id) {
            Some(existing) => {
                if !episode.subtitles.is_empty() {
                    existing.subtitles = episode.subtitles;
                }
                if existing.size.is_none() {
                    existing.size = episode.size;
                }
            }
            None => self.episodes.push(episode),
        }
    }

    /// Normalize ordering: episodes sorted by episode number.
    pub fn sort_episodes(&mut self) {
        self.episodes.sort_by_key(|e| e.number);
    }
}

/// Absolute path of a collection's manifest file.
pub fn manifest_path(collection_dir: &Path) -> PathBuf {
    collection_dir.join(MANIFEST_FILE)
}

/// Per-collection write locks handed out by directory path.
///
/// A load-mutate-store cycle is not atomic on its own; two workers finishing
/// into the same collection would each read the same document and the second
/// store would drop the first one's record. Every such cycle (and the
/// cancellation sweep that may delete the document) must run while holding
/// the directory's lock.
#[derive(Clone, Default)]
pub struct CollectionLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `collection_dir`.
    pub fn for_dir(&self, collection_dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(collection_dir.to_path_buf())
            .or_default()
            .clone()
    }
}

static STORE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Load a collection's manifest.
///
/// A missing file yields an empty manifest seeded with the directory name as
/// display name.
pub async fn load(collection_dir: &Path) -> Result<Manifest> {
    let path = manifest_path(collection_dir);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let name = collection_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(Manifest::new(name));
        }
        Err(e) => return Err(Error::io_path("reading manifest", &path, e)),
    };

    Ok(serde_json::from_slice(&raw)?)
}

/// Persist a manifest, replacing the previous document in one atomic step.
///
/// The temp filename carries a process-wide sequence number so two writers
/// can never rename each other's half-written temp file into place.
pub async fn store(collection_dir: &Path, manifest: &Manifest) -> Result<()> {
    fs::ensure_dir_all(collection_dir).await?;
    let path = manifest_path(collection_dir);
    let seq = STORE_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("json.{seq}.tmp"));

    let raw = serde_json::to_vec_pretty(manifest)?;
    tokio::fs::write(&tmp, &raw)
        .await
        .map_err(|e| Error::io_path("writing manifest", &tmp, e))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| Error::io_path("committing manifest", &path, e))?;

    Ok(())
}
