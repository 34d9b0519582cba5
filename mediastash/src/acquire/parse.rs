//! Heuristic parsers for the transcoder's textual control-plane output and
//! for episode numbers embedded in filenames.
//!
//! The string matching here is deliberately narrow and covered by unit tests
//! so the pipeline's I/O code never has to care about formats.

use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})").unwrap());

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d{2,}):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());

static EPISODE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Episode[_\s]?(\d+)").unwrap());

static ANY_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());

/// Total duration in seconds from a line like `Duration: 00:24:15.03, ...`.
///
/// Emitted once near the start of the control stream; used as the percent
/// denominator.
pub fn parse_duration_line(line: &str) -> Option<u64> {
    let caps = DURATION_RE.captures(line)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Current position in seconds from a progress line containing
/// `time=HH:MM:SS.ms`.
pub fn parse_time_position(line: &str) -> Option<f64> {
    let caps = TIME_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Infer an episode number from a media filename.
///
/// Inference runs on the file stem only, so the digit in extensions like
/// `mp4` never masquerades as an episode number. Prefers a number following
/// a literal "Episode" marker (case-insensitive, optional separator), then
/// any embedded number. Returns `None` when the stem carries no digits at
/// all; callers fall back to list position.
pub fn parse_episode_number(filename: &str) -> Option<u32> {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    if let Some(caps) = EPISODE_MARKER_RE.captures(stem) {
        return caps[1].parse().ok();
    }
    ANY_NUMBER_RE
        .captures(stem)
        .and_then(|caps| caps[1].parse().ok())
}
