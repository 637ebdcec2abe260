//! GRBL-class line protocol: command text, response classification and
//! real-time status reports.

use serde::{Deserialize, Serialize};

pub const UNLOCK: &str = "$X";
pub const HOME: &str = "$H";
pub const ZERO_ORIGIN: &str = "G92 X0 Y0 Z0";
pub const MILLIMETERS: &str = "G21";
pub const ABSOLUTE_MODE: &str = "G90";
pub const RELATIVE_MODE: &str = "G91";
pub const FEED_PER_MINUTE: &str = "G94";
pub const SYNC: &str = "G4 P0";
pub const PUMP_ON: &str = "M8";
pub const PUMP_OFF: &str = "M9";

pub const STATUS_QUERY: u8 = b'?';
pub const FEED_HOLD: u8 = b'!';
pub const SOFT_RESET: u8 = 0x18;

/// Start-up sequence sent right after a session opens.
pub const STARTUP_SEQUENCE: [&str; 4] = [UNLOCK, MILLIMETERS, ABSOLUTE_MODE, FEED_PER_MINUTE];

/// Machine coordinates in millimeters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Error(String),
    Alarm(String),
    Other(String),
}

impl Response {
    pub fn classify(line: &str) -> Response {
        let line = line.trim();
        let lower = line.to_ascii_lowercase();
        if line == "ok" {
            Response::Ok
        } else if lower.starts_with("error") {
            Response::Error(line.to_string())
        } else if lower.starts_with("alarm") {
            Response::Alarm(line.to_string())
        } else {
            Response::Other(line.to_string())
        }
    }
}

/// Accumulates raw bytes and hands out complete, trimmed, non-empty lines.
///
/// Lines that arrive after the one a caller was waiting for stay queued
/// for the next read.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
    }

    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: String,
    pub position: Option<Position>,
}

impl StatusReport {
    pub fn is_alarm(&self) -> bool {
        self.state.to_ascii_lowercase().contains("alarm")
    }
}

/// Parses `<State|MPos:x,y,z|...>`; `WPos` is accepted as well.
pub fn parse_status_report(text: &str) -> Option<StatusReport> {
    let start = text.find('<')?;
    let end = start + text[start..].find('>')?;
    let inner = &text[start + 1..end];
    let mut fields = inner.split('|');
    let state = fields.next()?.trim().to_string();
    if state.is_empty() {
        return None;
    }

    let mut position = None;
    for field in fields {
        let coords = field
            .strip_prefix("MPos:")
            .or_else(|| field.strip_prefix("WPos:"));
        if let Some(coords) = coords {
            let values: Vec<f64> = coords
                .split(',')
                .filter_map(|value| value.trim().parse().ok())
                .collect();
            if values.len() >= 3 {
                position = Some(Position::new(values[0], values[1], values[2]));
            }
        }
    }

    Some(StatusReport { state, position })
}

/// `G1 F<feed> [X..] [Y..] [Z..]` with zero components left out.
pub fn relative_move(feed: f64, dx: f64, dy: f64, dz: f64) -> String {
    let mut command = format!("G1 F{}", feed);
    for (axis, value) in [('X', dx), ('Y', dy), ('Z', dz)] {
        if value != 0.0 {
            command.push_str(&format!(" {}{:.3}", axis, value));
        }
    }
    command
}

/// `G1 F<feed>` with only the supplied axes.
pub fn absolute_move(feed: f64, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> String {
    let mut command = format!("G1 F{}", feed);
    for (axis, value) in [('X', x), ('Y', y), ('Z', z)] {
        if let Some(value) = value {
            command.push_str(&format!(" {}{:.2}", axis, value));
        }
    }
    command
}

pub fn absolute_z_move(feed: f64, z: f64) -> String {
    format!("G1 Z{:.3} F{}", z, feed)
}
