//! Collection repair: fill poster and subtitle gaps for an already
//! downloaded collection.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::fetch::{AssetFetcher, FetchOptions, Fetched};
use crate::manifest::{self, Subtitle, POSTER_FILE};
use crate::{Error, Result};

/// One subtitle source to apply to every episode of the collection.
#[derive(Debug, Clone)]
pub struct SubtitleSource {
    /// URL yielding the subtitle document for a given episode. Fetched
    /// once per episode that lacks this language.
    pub url: String,
    /// Language code, e.g. "en".
    pub lang: String,
    /// Display label; defaults to the language code.
    pub label: Option<String>,
}

/// What to repair in one collection.
#[derive(Debug, Clone, Default)]
pub struct RepairRequest {
    pub collection_dir: PathBuf,
    /// Fetch a poster from here when `poster.jpg` is absent.
    pub poster_url: Option<String>,
    pub subtitles: Vec<SubtitleSource>,
    /// Back-fill the manifest display name when it is empty.
    pub display_name: Option<String>,
}

/// What a repair pass actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub poster_fixed: bool,
    pub subtitles_added: usize,
    pub manifest_updated: bool,
}

/// Repair one collection. Idempotent: already-present collateral is left
/// untouched and a second pass reports no changes.
pub async fn repair_collection(
    fetcher: &AssetFetcher,
    req: &RepairRequest,
) -> Result<RepairReport> {
    if !req.collection_dir.is_dir() {
        return Err(Error::not_found(
            "collection",
            req.collection_dir.display().to_string(),
        ));
    }

    let mut report = RepairReport::default();
    let mut m = manifest::load(&req.collection_dir).await?;
    let mut changed = false;

    // Poster is best effort; a dead URL never fails the whole repair.
    if let Some(url) = &req.poster_url {
        let poster = req.collection_dir.join(POSTER_FILE);
        match fetcher.fetch(url, &poster, &FetchOptions::default()).await {
            Ok(Fetched::Downloaded(_)) => report.poster_fixed = true,
            Ok(Fetched::AlreadyPresent) => {}
            Err(e) => warn!(url, error = %e, "Poster repair failed"),
        }
        if m.poster_url.is_none() {
            m.poster_url = Some(url.clone());
            changed = true;
        }
    }

    if let Some(name) = &req.display_name {
        if m.collection_name.is_empty() {
            m.collection_name = name.clone();
            changed = true;
        }
    }

    for source in &req.subtitles {
        let label = source.label.clone().unwrap_or_else(|| source.lang.clone());
        let numbers: Vec<u32> = m.episodes.iter().map(|e| e.number).collect();
        for number in numbers {
            let file = format!("Episode_{number}_{}.vtt", source.lang);
            let dest = req.collection_dir.join(&file);

            match fetcher.fetch(&source.url, &dest, &FetchOptions::default()).await {
                Ok(Fetched::Downloaded(_)) => report.subtitles_added += 1,
                Ok(Fetched::AlreadyPresent) => {}
                Err(e) => {
                    warn!(lang = %source.lang, number, error = %e, "Subtitle repair failed");
                    continue;
                }
            }

            // Self-heal the record even when the file already existed.
            if dest.is_file() {
                if let Some(episode) = m.episodes.iter_mut().find(|e| e.number == number) {
                    if !episode.subtitles.iter().any(|s| s.lang == source.lang) {
                        episode.subtitles.push(Subtitle {
                            lang: source.lang.clone(),
                            label: label.clone(),
                            file,
                        });
                        changed = true;
                    }
                }
            }
        }
    }

    if changed {
        manifest::store(&req.collection_dir, &m).await?;
        report.manifest_updated = true;
        info!(dir = %req.collection_dir.display(), "Collection manifest repaired");
    }
    Ok(report)
}
