//! In-process stand-in for a GRBL-class controller.

use crate::machine::protocol::{self, Position};
use crate::machine::transport::Transport;
use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

const BANNER: &str = "Grbl 1.1h ['$' for help]";

#[derive(Debug)]
struct ControllerState {
    label: String,
    relative: bool,
    position: Position,
    pump_on: bool,
    pending_line: String,
    outbound: Vec<u8>,
    commands: Vec<String>,
    realtime: Vec<u8>,
    rejected: HashSet<String>,
    alarming: HashSet<String>,
    silent: bool,
}

impl ControllerState {
    fn reply(&mut self, text: &str) {
        self.outbound.extend_from_slice(text.as_bytes());
        self.outbound.extend_from_slice(b"\r\n");
    }

    fn status_report(&self) -> String {
        format!(
            "<{}|MPos:{:.3},{:.3},{:.3}|FS:0,0>",
            self.label, self.position.x, self.position.y, self.position.z
        )
    }

    fn realtime_byte(&mut self, byte: u8) {
        self.realtime.push(byte);
        if self.silent {
            return;
        }
        match byte {
            protocol::STATUS_QUERY => {
                let report = self.status_report();
                self.reply(&report);
            }
            protocol::FEED_HOLD => self.label = "Hold".into(),
            _ => {
                self.label = "Idle".into();
                self.relative = false;
                self.pending_line.clear();
                self.reply("");
                self.reply(BANNER);
            }
        }
    }

    fn line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.commands.push(line.to_string());
        if self.silent {
            return;
        }
        if self.rejected.contains(line) {
            self.reply("error:20");
            return;
        }
        if self.alarming.contains(line) {
            self.label = "Alarm".into();
            self.reply("ALARM:1");
            self.reply("error:9");
            return;
        }
        self.execute(line);
        self.reply("ok");
    }

    fn execute(&mut self, line: &str) {
        let mut words = line.split_whitespace();
        match words.next().unwrap_or_default() {
            "G90" => self.relative = false,
            "G91" => self.relative = true,
            "G0" | "G1" => {
                for word in words {
                    let mut chars = word.chars();
                    let axis = chars.next();
                    let Ok(value) = chars.as_str().parse::<f64>() else {
                        continue;
                    };
                    let target = match axis {
                        Some('X') => &mut self.position.x,
                        Some('Y') => &mut self.position.y,
                        Some('Z') => &mut self.position.z,
                        _ => continue,
                    };
                    if self.relative {
                        *target += value;
                    } else {
                        *target = value;
                    }
                }
            }
            "$H" | "G92" => self.position = Position::default(),
            "$X" => self.label = "Idle".into(),
            "M8" => self.pump_on = true,
            "M9" => self.pump_on = false,
            _ => {}
        }
    }
}

/// [`Transport`] backed by an in-memory controller model.
pub struct SimulatedController {
    shared: Arc<Mutex<ControllerState>>,
}

/// Test and offline-mode view into a [`SimulatedController`].
#[derive(Clone)]
pub struct SimulatedHandle {
    shared: Arc<Mutex<ControllerState>>,
}

impl SimulatedController {
    pub fn new() -> (Self, SimulatedHandle) {
        let shared = Arc::new(Mutex::new(ControllerState {
            label: "Idle".into(),
            relative: false,
            position: Position::default(),
            pump_on: false,
            pending_line: String::new(),
            outbound: Vec::new(),
            commands: Vec::new(),
            realtime: Vec::new(),
            rejected: HashSet::new(),
            alarming: HashSet::new(),
            silent: false,
        }));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            SimulatedHandle { shared },
        )
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for SimulatedController {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        for &byte in bytes {
            match byte {
                protocol::STATUS_QUERY | protocol::FEED_HOLD | protocol::SOFT_RESET => {
                    state.realtime_byte(byte)
                }
                b'\n' => {
                    let line = std::mem::take(&mut state.pending_line);
                    state.line(&line);
                }
                _ => state.pending_line.push(byte as char),
            }
        }
        Ok(())
    }

    fn read_available(&mut self, wait: Duration) -> io::Result<Vec<u8>> {
        {
            let mut state = self.lock();
            if !state.outbound.is_empty() {
                return Ok(std::mem::take(&mut state.outbound));
            }
        }
        thread::sleep(wait);
        Ok(std::mem::take(&mut self.lock().outbound))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.lock().outbound.clear();
        Ok(())
    }
}

impl SimulatedHandle {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Line commands received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn realtime(&self) -> Vec<u8> {
        self.lock().realtime.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.commands.clear();
        state.realtime.clear();
    }

    pub fn position(&self) -> Position {
        self.lock().position
    }

    pub fn set_position(&self, position: Position) {
        self.lock().position = position;
    }

    pub fn pump_on(&self) -> bool {
        self.lock().pump_on
    }

    pub fn label(&self) -> String {
        self.lock().label.clone()
    }

    /// Answer `error:20` to this exact line.
    pub fn reject(&self, command: &str) {
        self.lock().rejected.insert(command.to_string());
    }

    /// Answer `ALARM:1` then `error:9` to this exact line.
    pub fn alarm_on(&self, command: &str) {
        self.lock().alarming.insert(command.to_string());
    }

    /// Queues an unsolicited line, such as a late `ok` or an alarm.
    pub fn push_line(&self, text: &str) {
        self.lock().reply(text);
    }

    /// Stop answering anything.
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(controller: &mut SimulatedController) -> String {
        let bytes = controller.read_available(Duration::ZERO).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn tracks_relative_and_absolute_moves() {
        let (mut controller, handle) = SimulatedController::new();
        controller
            .write_bytes(b"G1 X10 Y5\r\nG91\r\nG1 X-2.5\r\n")
            .unwrap();
        assert_eq!(drain(&mut controller), "ok\r\nok\r\nok\r\n");
        assert_eq!(handle.position(), Position::new(7.5, 5.0, 0.0));
    }

    #[test]
    fn status_byte_reports_state_and_position() {
        let (mut controller, handle) = SimulatedController::new();
        handle.set_position(Position::new(1.0, 2.0, -3.0));
        controller.write_bytes(b"?").unwrap();
        assert_eq!(
            drain(&mut controller),
            "<Idle|MPos:1.000,2.000,-3.000|FS:0,0>\r\n"
        );
        assert_eq!(handle.realtime(), vec![b'?']);
        assert!(handle.commands().is_empty());
    }

    #[test]
    fn soft_reset_prints_banner() {
        let (mut controller, handle) = SimulatedController::new();
        controller.write_bytes(b"!").unwrap();
        assert_eq!(handle.label(), "Hold");
        controller.write_bytes(&[protocol::SOFT_RESET]).unwrap();
        assert!(drain(&mut controller).contains("Grbl"));
        assert_eq!(handle.label(), "Idle");
    }

    #[test]
    fn alarm_trigger_locks_until_unlock() {
        let (mut controller, handle) = SimulatedController::new();
        handle.alarm_on("G1 Z-500");
        controller.write_bytes(b"G1 Z-500\r\n").unwrap();
        assert_eq!(drain(&mut controller), "ALARM:1\r\nerror:9\r\n");
        assert_eq!(handle.label(), "Alarm");
        controller.write_bytes(b"$X\r\n").unwrap();
        assert_eq!(handle.label(), "Idle");
    }
}
