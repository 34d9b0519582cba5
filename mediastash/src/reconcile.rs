//! Library reconciliation: register media files present on disk but absent
//! from their collection manifest.

use std::path::Path;

use chrono::Utc;
use tokio::fs as tokio_fs;
use tracing::{debug, info, warn};

use crate::acquire::parse_episode_number;
use crate::config::StashConfig;
use crate::manifest::{self, Episode, MEDIA_EXTENSIONS};
use crate::utils::filename::collection_slug;
use crate::utils::fs;
use crate::Result;

/// Per-collection reconciliation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    pub name: String,
    /// Valid media files seen in the collection directory.
    pub episodes: usize,
    /// Records created by this run.
    pub newly_added: usize,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub newly_registered: usize,
    pub total_media_files: usize,
    pub collections: Vec<CollectionReport>,
}

/// Scan the immediate subdirectories of `root` and register every
/// unreferenced media file. Idempotent: a second pass adds nothing.
pub async fn reconcile_root(root: &Path, config: &StashConfig) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let mut entries = match tokio_fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(fs::io_error("read_dir", root, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| fs::io_error("read_dir", root, e))?
    {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match reconcile_collection(&path, config).await {
            Ok(Some(c)) => {
                report.total_media_files += c.episodes;
                report.newly_registered += c.newly_added;
                report.collections.push(c);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(dir = %path.display(), error = %e, "Skipping collection during reconciliation");
            }
        }
    }

    report.collections.sort_by(|a, b| a.name.cmp(&b.name));
    info!(
        newly_registered = report.newly_registered,
        collections = report.collections.len(),
        "Reconciliation pass complete"
    );
    Ok(report)
}

async fn reconcile_collection(
    dir: &Path,
    config: &StashConfig,
) -> Result<Option<CollectionReport>> {
    let media = list_media_files(dir, config.reconcile_min_bytes).await?;
    if media.is_empty() {
        return Ok(None);
    }

    let mut m = manifest::load(dir).await?;
    let slug = collection_slug(&m.collection_name);
    let mut added = 0usize;

    for (position, (file, size)) in media.iter().enumerate() {
        if m.references_file(file) {
            continue;
        }
        let number = parse_episode_number(file).unwrap_or(position as u32 + 1);
        if m.has_episode_number(number) {
            debug!(file, number, "Episode number already registered, skipping");
            continue;
        }
        m.upsert_episode(Episode {
            id: format!("{slug}-ep-{number}"),
            number,
            file: file.clone(),
            subtitles: Vec::new(),
            added_at: Utc::now(),
            size: Some(*size),
            discovered: true,
        });
        added += 1;
    }

    if added > 0 {
        m.sort_episodes();
        manifest::store(dir, &m).await?;
        info!(dir = %dir.display(), added, "Registered orphan media");
    }

    Ok(Some(CollectionReport {
        name: m.collection_name,
        episodes: media.len(),
        newly_added: added,
    }))
}

/// Media filenames (with sizes) in `dir`, sorted by name. Files below
/// `min_bytes` are treated as debris and ignored.
async fn list_media_files(dir: &Path, min_bytes: u64) -> Result<Vec<(String, u64)>> {
    let mut out = Vec::new();
    let mut entries = tokio_fs::read_dir(dir)
        .await
        .map_err(|e| fs::io_error("read_dir", dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| fs::io_error("read_dir", dir, e))?
    {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            continue;
        }
        let Some(size) = fs::file_size(&path).await else {
            continue;
        };
        if size < min_bytes {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            out.push((name.to_string(), size));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}
