//! Stream acquisition: ffmpeg supervision, progress parsing and atomic
//! commit of downloaded media.

mod parse;
mod pipeline;
mod process;

pub use parse::parse_episode_number;
pub use pipeline::{AcquireRequest, AcquisitionPipeline, ProgressTracker, TEMP_SUFFIX};
pub use process::{FfmpegSpawner, TranscodeProcess, TranscodeSpawner};
