//! Offline media library core.
//!
//! `mediastash` downloads streamed media into a local library through a
//! supervised ffmpeg pipeline, keeps a per-collection `manifest.json`
//! catalog, and can reconcile and repair the library after crashes or
//! manual file moves.
//!
//! The entry point is [`Library`]:
//!
//! ```no_run
//! use mediastash::{Library, StashConfig};
//!
//! # async fn run() -> mediastash::Result<()> {
//! let library = Library::new("/data/media", StashConfig::default())?;
//! let report = library.reconcile().await?;
//! println!("registered {} files", report.newly_registered);
//! # Ok(())
//! # }
//! ```

pub mod acquire;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod library;
pub mod manifest;
pub mod queue;
pub mod reconcile;
pub mod repair;
pub mod utils;

pub use config::StashConfig;
pub use error::{Error, Result};
pub use events::{ProgressSample, StashEvent};
pub use fetch::{AssetFetcher, FetchOptions, Fetched};
pub use library::{CollectionSummary, DownloadRequest, Library};
pub use manifest::{Episode, Manifest, Subtitle};
pub use queue::{Admission, DownloadJob, DownloadQueue};
pub use reconcile::ReconcileReport;
pub use repair::{RepairReport, RepairRequest, SubtitleSource};
