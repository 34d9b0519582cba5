//! Shared test doubles: a scripted transcoder that emits canned control
//! lines and writes a payload file instead of running ffmpeg.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use mediastash::acquire::{TranscodeProcess, TranscodeSpawner};
use mediastash::{Result, StashConfig};

/// Spawner whose processes replay `lines`, then (optionally after a
/// per-url gate is released) write `payload_bytes` to the temp path and
/// exit with `succeed`.
pub struct ScriptedSpawner {
    pub lines: Vec<String>,
    pub payload_bytes: usize,
    pub succeed: bool,
    /// When true, each process blocks before finishing until
    /// [`release`](Self::release) is called with its url.
    pub gated: bool,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ScriptedSpawner {
    pub fn completing(payload_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            lines: vec![
                "  Duration: 00:10:00.00, start: 0.000000".to_string(),
                "frame=1 time=00:02:30.00 bitrate=1k".to_string(),
                "frame=2 time=00:07:30.00 bitrate=1k".to_string(),
            ],
            payload_bytes,
            succeed: true,
            gated: false,
            gates: Mutex::new(HashMap::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            lines: vec!["  Duration: 00:10:00.00".to_string()],
            payload_bytes: 0,
            succeed: false,
            gated: false,
            gates: Mutex::new(HashMap::new()),
        })
    }

    pub fn gated(payload_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            lines: vec!["  Duration: 00:10:00.00".to_string()],
            payload_bytes,
            succeed: true,
            gated: true,
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Let the process spawned for `url` run to completion.
    pub fn release(&self, url: &str) {
        self.gates
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .notify_one();
    }

    /// True once a process has been spawned for `url`.
    pub fn spawned(&self, url: &str) -> bool {
        self.gates.lock().contains_key(url)
    }
}

#[async_trait]
impl TranscodeSpawner for ScriptedSpawner {
    async fn spawn(
        &self,
        url: &str,
        _headers: &[(String, String)],
        temp_output: &Path,
    ) -> Result<Box<dyn TranscodeProcess>> {
        let gate = {
            let mut gates = self.gates.lock();
            let gate = gates
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone();
            self.gated.then_some(gate)
        };
        Ok(Box::new(ScriptedProcess {
            lines: self.lines.iter().cloned().collect(),
            gate,
            temp: temp_output.to_path_buf(),
            payload_bytes: self.payload_bytes,
            succeed: self.succeed,
        }))
    }
}

struct ScriptedProcess {
    lines: VecDeque<String>,
    gate: Option<Arc<Notify>>,
    temp: PathBuf,
    payload_bytes: usize,
    succeed: bool,
}

#[async_trait]
impl TranscodeProcess for ScriptedProcess {
    async fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.lines.pop_front() {
            return Ok(Some(line));
        }
        if let Some(gate) = self.gate.take() {
            gate.notified().await;
        }
        if self.payload_bytes > 0 {
            tokio::fs::write(&self.temp, vec![0u8; self.payload_bytes])
                .await
                .expect("scripted transcoder failed to write payload");
        }
        Ok(None)
    }

    async fn wait(&mut self) -> Result<bool> {
        Ok(self.succeed)
    }

    async fn kill(&mut self) {}
}

/// Config with small thresholds so tests can use tiny payload files.
pub fn test_config() -> StashConfig {
    StashConfig {
        min_valid_media_bytes: 64,
        reconcile_min_bytes: 64,
        ..StashConfig::default()
    }
}

/// Poll `cond` until it holds, panicking after two seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Receive events until a terminal event for `episode_id` arrives.
///
/// Terminal events for other ids are dropped; when several jobs finish
/// around the same time use [`wait_terminals`] instead.
pub async fn wait_terminal(
    events: &mut tokio::sync::broadcast::Receiver<mediastash::StashEvent>,
    episode_id: &str,
) -> mediastash::StashEvent {
    loop {
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for terminal event")
            .expect("event stream closed");
        if event.episode_id() == episode_id && event.is_terminal() {
            return event;
        }
    }
}

/// Collect the terminal event of every id in `ids` from a single receiver
/// pass, in whatever order they finish.
pub async fn wait_terminals(
    events: &mut tokio::sync::broadcast::Receiver<mediastash::StashEvent>,
    ids: &[&str],
) -> std::collections::HashMap<String, mediastash::StashEvent> {
    let mut out = std::collections::HashMap::new();
    while out.len() < ids.len() {
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for terminal events")
            .expect("event stream closed");
        if event.is_terminal() && ids.contains(&event.episode_id()) {
            out.insert(event.episode_id().to_string(), event);
        }
    }
    out
}
