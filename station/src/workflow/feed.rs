use anyhow::Context;
use pnpcore::geometry::Rect;
use pnpcore::vision::Detection;
use pnpcore::Rig;
use serde::Deserialize;
use std::io::BufRead;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Deserialize)]
struct FeedEntry {
    text: String,
    rect: Rect,
}

/// One JSON-lines frame: `[{"text": "TEST", "rect": [x, y, w, h]}, ...]`.
/// Blank lines carry no frame.
pub fn parse_frame(line: &str) -> anyhow::Result<Option<Vec<Detection>>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let entries: Vec<FeedEntry> = serde_json::from_str(line).context("parsing detection frame")?;
    Ok(Some(
        entries
            .into_iter()
            .map(|entry| Detection::new(entry.text, entry.rect))
            .collect(),
    ))
}

/// Pushes every frame read from `input` into the tracker. Malformed
/// frames are logged and skipped; the loop ends at end of input.
pub fn pump_frames<R: BufRead>(rig: &Rig, input: R) -> anyhow::Result<usize> {
    let mut frames = 0;
    for line in input.lines() {
        let line = line.context("reading detection feed")?;
        match parse_frame(&line) {
            Ok(Some(detections)) => {
                rig.observe(&detections);
                frames += 1;
            }
            Ok(None) => {}
            Err(err) => log::warn!("skipping detection frame: {:#}", err),
        }
    }
    Ok(frames)
}

/// Reads frames from stdin on a detached worker.
pub fn spawn_stdin_feed(rig: Arc<Rig>) -> JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        match pump_frames(&rig, stdin.lock()) {
            Ok(frames) => log::info!("detection feed closed after {} frames", frames),
            Err(err) => log::error!("detection feed failed: {:#}", err),
        }
    })
}
