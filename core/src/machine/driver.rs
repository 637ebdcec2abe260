use crate::config::{DiscoveryConfig, MotionConfig};
use crate::geometry::AxisMapping;
use crate::machine::discovery;
use crate::machine::protocol::{self, LineBuffer, Position, Response};
use crate::machine::transport::{SerialTransport, Transport};
use crate::prelude::{DriverError, DriverResult};
use crate::telemetry::{Event, Reporter, Severity};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::{Duration, Instant};

const READ_SLICE: Duration = Duration::from_millis(10);
const EMERGENCY_PAUSE: Duration = Duration::from_millis(100);

/// Coarse driver state; `Moving` is tracked optimistically around commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Disconnected,
    Connecting,
    Idle,
    Moving,
    Alarm,
    Unknown,
}

impl Activity {
    fn from_label(label: &str) -> Self {
        let lower = label.to_ascii_lowercase();
        if lower.starts_with("idle") {
            Activity::Idle
        } else if lower.starts_with("run") || lower.starts_with("jog") || lower.starts_with("home")
        {
            Activity::Moving
        } else if lower.contains("alarm") {
            Activity::Alarm
        } else {
            Activity::Unknown
        }
    }
}

/// Machine view shared with every reader.
///
/// `position` accumulates locally between status queries; only
/// [`MachineDriver::query_status`] reads it back from the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineState {
    pub connected: bool,
    pub port: Option<String>,
    pub position: Position,
    pub state: String,
    pub alarm: bool,
    pub activity: Activity,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            connected: false,
            port: None,
            position: Position::default(),
            state: "Unknown".into(),
            alarm: false,
            activity: Activity::Disconnected,
        }
    }
}

/// Order in which a Z-safe goto issued its two moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOrder {
    XyThenZ,
    ZThenXy,
}

struct Session {
    transport: Option<Box<dyn Transport>>,
    lines: LineBuffer,
}

/// Serial session owner. All controller I/O goes through `session`, so
/// commands and status polls never interleave on the wire.
///
/// Lock order: `session` before `state`.
pub struct MachineDriver {
    session: Mutex<Session>,
    state: RwLock<MachineState>,
    motion: RwLock<MotionConfig>,
    reporter: Reporter,
}

impl MachineDriver {
    pub fn new(motion: MotionConfig, reporter: Reporter) -> Self {
        Self {
            session: Mutex::new(Session {
                transport: None,
                lines: LineBuffer::default(),
            }),
            state: RwLock::new(MachineState::default()),
            motion: RwLock::new(motion),
            reporter,
        }
    }

    pub fn configure(&self, motion: MotionConfig) {
        *self
            .motion
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = motion;
    }

    pub fn state(&self) -> MachineState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn motion(&self) -> MotionConfig {
        match self.motion.read() {
            Ok(motion) => motion.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_state<R>(&self, edit: impl FnOnce(&mut MachineState) -> R) -> R {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        edit(&mut state)
    }

    fn publish(&self) {
        self.reporter.sink().emit(Event::MotorUpdate(self.state()));
    }

    /// Discovers and opens the controller. Returns `false` and stays in
    /// simulation mode when no device can be opened.
    pub fn connect(&self, discovery: &DiscoveryConfig) -> bool {
        self.with_state(|state| state.activity = Activity::Connecting);
        let Some(path) = discovery::discover(discovery) else {
            warn!("no controller port found, continuing in simulation mode");
            self.with_state(|state| state.activity = Activity::Disconnected);
            self.publish();
            return false;
        };

        let opened = SerialTransport::open(&path, discovery.baud_rate).and_then(|mut transport| {
            transport.pulse_reset(
                Duration::from_millis(discovery.reset_low_ms),
                Duration::from_millis(discovery.boot_wait_ms),
            )?;
            Ok(transport)
        });
        match opened {
            Ok(transport) => {
                info!("controller opened on {}", path);
                self.attach(Box::new(transport), &path);
                true
            }
            Err(err) => {
                self.reporter.report(
                    Severity::Error,
                    &format!("controller connection failed on {}: {}", path, err),
                );
                self.with_state(|state| state.activity = Activity::Disconnected);
                self.publish();
                false
            }
        }
    }

    /// Installs an open transport and runs the start-up sequence.
    pub fn attach(&self, mut transport: Box<dyn Transport>, label: &str) {
        if let Err(err) = transport.clear_input() {
            debug!("input flush on attach failed: {}", err);
        }
        let timeout = self.motion().command_timeout();
        {
            let mut session = self.session();
            session.transport = Some(transport);
            session.lines.clear();
            for command in protocol::STARTUP_SEQUENCE {
                // start-up failures are reported but do not block the session
                let _ = self.exchange(&mut session, command, timeout);
            }
            self.with_state(|state| {
                state.connected = true;
                state.port = Some(label.to_string());
                state.activity = if state.alarm {
                    Activity::Alarm
                } else {
                    Activity::Idle
                };
            });
        }
        self.publish();
    }

    pub fn send(&self, command: &str) -> DriverResult<()> {
        self.send_with_timeout(command, self.motion().command_timeout())
    }

    /// Writes one line and waits for `ok`, `error` or the timeout.
    /// Alarms seen on the way are recorded without ending the wait.
    pub fn send_with_timeout(&self, command: &str, timeout: Duration) -> DriverResult<()> {
        let mut session = self.session();
        self.exchange(&mut session, command, timeout)
    }

    fn exchange(&self, session: &mut Session, command: &str, timeout: Duration) -> DriverResult<()> {
        let result = self.exchange_inner(session, command, timeout);
        if let Err(err) = &result {
            self.reporter.report(Severity::Error, &err.to_string());
        }
        result
    }

    fn exchange_inner(
        &self,
        session: &mut Session,
        command: &str,
        timeout: Duration,
    ) -> DriverResult<()> {
        let Session { transport, lines } = session;
        let command = command.trim();
        let Some(transport) = transport.as_mut() else {
            debug!("[sim] {}", command);
            return Ok(());
        };

        // anything still queued answers an earlier command that timed out
        lines.extend(&transport.read_available(Duration::ZERO)?);
        while let Some(line) = lines.next_line() {
            match Response::classify(&line) {
                Response::Alarm(response) => self.raise_alarm(&response),
                stale => debug!("dropping stale reply {:?}", stale),
            }
        }

        debug!("> {}", command);
        transport.write_bytes(format!("{}\r\n", command).as_bytes())?;

        let deadline = Instant::now() + timeout;
        loop {
            while let Some(line) = lines.next_line() {
                match Response::classify(&line) {
                    Response::Ok => return Ok(()),
                    Response::Error(response) => {
                        return Err(DriverError::Rejected {
                            command: command.to_string(),
                            response,
                        })
                    }
                    Response::Alarm(response) => self.raise_alarm(&response),
                    Response::Other(text) => debug!("< {}", text),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }
            let chunk = transport.read_available((deadline - now).min(READ_SLICE))?;
            lines.extend(&chunk);
        }
    }

    fn raise_alarm(&self, response: &str) {
        self.with_state(|state| {
            state.alarm = true;
            state.state = "Alarm".into();
            state.activity = Activity::Alarm;
        });
        self.reporter
            .report(Severity::Warning, &format!("ALARM: {}", response));
    }

    /// Single-byte real-time command; no terminator, no acknowledgement.
    pub fn send_realtime(&self, byte: u8) -> DriverResult<()> {
        let mut session = self.session();
        match session.transport.as_mut() {
            Some(transport) => transport.write_bytes(&[byte]).map_err(|err| {
                let err = DriverError::from(err);
                self.reporter.report(Severity::Error, &err.to_string());
                err
            }),
            None => {
                debug!("[sim] realtime 0x{:02x}", byte);
                Ok(())
            }
        }
    }

    /// Relative move in motor space. The configured axis inversion is
    /// applied here; the session is held for the whole mode switch.
    pub fn move_relative(&self, dx: f64, dy: f64, dz: f64, feed: Option<f64>) -> DriverResult<()> {
        let motion = self.motion();
        let (dx, dy) = AxisMapping::inversion(motion.invert_x, motion.invert_y).screen_to_motor(dx, dy);
        let feed = feed.unwrap_or(motion.feed_rate);
        let timeout = motion.command_timeout();
        info!("relative move dx={:.3} dy={:.3} dz={:.3}", dx, dy, dz);

        let outcome = {
            let mut session = self.session();
            self.with_state(|state| state.activity = Activity::Moving);
            let mode = self.exchange(&mut session, protocol::RELATIVE_MODE, timeout);
            let moved = self.exchange(&mut session, &protocol::relative_move(feed, dx, dy, dz), timeout);
            let synced = self.exchange(&mut session, protocol::SYNC, timeout);
            let restored = self.exchange(&mut session, protocol::ABSOLUTE_MODE, timeout);
            self.with_state(|state| {
                if moved.is_ok() {
                    state.position.x += dx;
                    state.position.y += dy;
                    state.position.z += dz;
                }
                state.activity = settled_activity(state);
            });
            mode.and(moved).and(synced).and(restored)
        };
        self.publish();
        outcome
    }

    /// Absolute move of the supplied axes only, followed by a sync wait.
    pub fn move_absolute(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feed: Option<f64>,
    ) -> DriverResult<()> {
        let motion = self.motion();
        let command = protocol::absolute_move(feed.unwrap_or(motion.feed_rate), x, y, z);
        let timeout = motion.command_timeout();
        info!("absolute move: {}", command);

        let outcome = {
            let mut session = self.session();
            self.with_state(|state| state.activity = Activity::Moving);
            let moved = self.exchange(&mut session, &command, timeout);
            let synced = self.exchange(&mut session, protocol::SYNC, timeout);
            self.with_state(|state| {
                if moved.is_ok() {
                    if let Some(x) = x {
                        state.position.x = x;
                    }
                    if let Some(y) = y {
                        state.position.y = y;
                    }
                    if let Some(z) = z {
                        state.position.z = z;
                    }
                }
                state.activity = settled_activity(state);
            });
            moved.and(synced)
        };
        self.publish();
        outcome
    }

    pub fn move_absolute_z(&self, z: f64, feed: Option<f64>) -> DriverResult<()> {
        let motion = self.motion();
        let timeout = motion.command_timeout();
        let command = protocol::absolute_z_move(feed.unwrap_or(motion.feed_rate), z);
        info!("absolute Z: {}", command);

        let outcome = {
            let mut session = self.session();
            let mode = self.exchange(&mut session, protocol::ABSOLUTE_MODE, timeout);
            let moved = self.exchange(&mut session, &command, timeout);
            if moved.is_ok() {
                self.with_state(|state| state.position.z = z);
            }
            mode.and(moved)
        };
        self.publish();
        outcome
    }

    /// Goes to `(x, y, z)` without dragging the head sideways while low:
    /// descending moves XY first, anything else moves Z first.
    pub fn goto_z_safe(&self, x: f64, y: f64, z: f64) -> DriverResult<MoveOrder> {
        let current_z = self.state().position.z;
        if z < current_z {
            info!("goto: Z down ({:.2} -> {:.2}), XY then Z", current_z, z);
            self.move_absolute(Some(x), Some(y), None, None)?;
            self.move_absolute(None, None, Some(z), None)?;
            Ok(MoveOrder::XyThenZ)
        } else {
            info!("goto: Z up ({:.2} -> {:.2}), Z then XY", current_z, z);
            self.move_absolute(None, None, Some(z), None)?;
            self.move_absolute(Some(x), Some(y), None, None)?;
            Ok(MoveOrder::ZThenXy)
        }
    }

    /// Homing cycle; on success the local bookkeeping and the controller
    /// origin are both zeroed.
    pub fn home(&self) -> DriverResult<()> {
        let motion = self.motion();
        info!("homing");
        let outcome = {
            let mut session = self.session();
            self.with_state(|state| state.activity = Activity::Moving);
            let homed = self.exchange(&mut session, protocol::HOME, motion.homing_timeout());
            match homed {
                Ok(()) => {
                    let zeroed =
                        self.exchange(&mut session, protocol::ZERO_ORIGIN, motion.command_timeout());
                    self.with_state(|state| {
                        state.position = Position::default();
                        state.activity = settled_activity(state);
                    });
                    zeroed
                }
                Err(err) => {
                    self.with_state(|state| {
                        if !state.alarm {
                            state.activity = Activity::Unknown;
                        }
                    });
                    Err(err)
                }
            }
        };
        match &outcome {
            Ok(()) => info!("homing complete"),
            Err(_) => warn!("homing failed"),
        }
        self.publish();
        outcome
    }

    /// Vacuum actuator. Switching off repeats the off command after a short
    /// delay.
    pub fn pump(&self, on: bool) -> DriverResult<()> {
        let motion = self.motion();
        let command = if on {
            protocol::PUMP_ON
        } else {
            protocol::PUMP_OFF
        };
        info!("pump {}", if on { "on" } else { "off" });
        let first = self.send(command).and(self.send(protocol::SYNC));
        if on {
            return first;
        }
        thread::sleep(motion.pump_off_repeat_delay());
        let repeat = self
            .send(protocol::PUMP_OFF)
            .and(self.send(protocol::SYNC));
        first.and(repeat)
    }

    /// Real-time `?` query. A parsed report overwrites label, alarm flag and
    /// position; a missing or malformed one leaves the state alone.
    pub fn query_status(&self) -> DriverResult<MachineState> {
        let timeout = self.motion().status_timeout();
        {
            let mut session = self.session();
            let Session { transport, lines } = &mut *session;
            let Some(transport) = transport.as_deref_mut() else {
                return Ok(self.state());
            };

            let response = match poll_status(transport, lines, timeout) {
                Ok(response) => response,
                Err(err) => {
                    self.reporter
                        .report(Severity::Error, &format!("status query failed: {}", err));
                    return Err(err);
                }
            };

            match protocol::parse_status_report(&response) {
                Some(report) => self.with_state(|state| {
                    state.alarm = report.is_alarm();
                    state.activity = Activity::from_label(&report.state);
                    state.state = report.state;
                    if let Some(position) = report.position {
                        state.position = position;
                    }
                }),
                None => debug!("no status report in {:?}", response),
            }
        }
        self.publish();
        Ok(self.state())
    }

    /// Ctrl-X. Clears the alarm flag locally without waiting for a reply.
    pub fn soft_reset(&self) -> DriverResult<()> {
        {
            let mut session = self.session();
            let Session { transport, lines } = &mut *session;
            match transport.as_mut() {
                Some(transport) => {
                    let written = transport
                        .write_bytes(&[protocol::SOFT_RESET])
                        .map_err(DriverError::from);
                    if let Err(err) = written {
                        self.reporter
                            .report(Severity::Error, &format!("soft reset failed: {}", err));
                        return Err(err);
                    }
                    lines.clear();
                }
                None => debug!("[sim] soft reset"),
            }
            self.with_state(|state| {
                state.alarm = false;
                state.state = "Reset".into();
                state.activity = Activity::Unknown;
            });
        }
        info!("soft reset sent");
        self.publish();
        Ok(())
    }

    pub fn unlock(&self) -> DriverResult<()> {
        info!("unlocking");
        self.send(protocol::UNLOCK)?;
        self.with_state(|state| {
            state.alarm = false;
            state.state = "Idle".into();
            state.activity = Activity::Idle;
        });
        self.publish();
        Ok(())
    }

    /// Feed hold, then actuator off and alarm clear.
    pub fn emergency_stop(&self) -> DriverResult<()> {
        warn!("emergency stop");
        let held = self.send_realtime(protocol::FEED_HOLD);
        thread::sleep(EMERGENCY_PAUSE);
        let pump_off = self.send(protocol::PUMP_OFF);
        let unlocked = self.send(protocol::UNLOCK);
        if unlocked.is_ok() {
            self.with_state(|state| {
                state.alarm = false;
                state.activity = Activity::Idle;
            });
        }
        self.publish();
        held.and(pump_off).and(unlocked)
    }

    /// Best-effort actuator off, then drops the port.
    pub fn close(&self) {
        {
            let mut session = self.session();
            if session.transport.is_some() {
                let timeout = self.motion().command_timeout();
                let _ = self.exchange(&mut session, protocol::PUMP_OFF, timeout);
                session.transport = None;
                session.lines.clear();
                info!("controller session closed");
            }
            self.with_state(|state| {
                state.connected = false;
                state.activity = Activity::Disconnected;
            });
        }
        self.publish();
    }
}

fn poll_status(
    transport: &mut dyn Transport,
    lines: &mut LineBuffer,
    timeout: Duration,
) -> DriverResult<String> {
    transport.clear_input()?;
    lines.clear();
    transport.write_bytes(&[protocol::STATUS_QUERY])?;
    let deadline = Instant::now() + timeout;
    let mut response = String::new();
    while Instant::now() < deadline && !response.contains('>') {
        let chunk = transport.read_available(READ_SLICE)?;
        response.push_str(&String::from_utf8_lossy(&chunk));
    }
    Ok(response)
}

fn settled_activity(state: &MachineState) -> Activity {
    if state.alarm {
        Activity::Alarm
    } else if state.connected {
        Activity::Idle
    } else {
        Activity::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::sim::SimulatedController;
    use crate::telemetry::{ErrorLog, MemorySink};
    use std::sync::Arc;

    fn fast_motion() -> MotionConfig {
        MotionConfig {
            command_timeout_ms: 200,
            homing_timeout_ms: 200,
            status_timeout_ms: 100,
            pump_off_repeat_delay_ms: 0,
            ..MotionConfig::default()
        }
    }

    fn driver() -> (MachineDriver, Arc<MemorySink>, Arc<ErrorLog>) {
        let sink = Arc::new(MemorySink::new());
        let errors = Arc::new(ErrorLog::new());
        let reporter = Reporter::new(errors.clone(), sink.clone());
        (MachineDriver::new(fast_motion(), reporter), sink, errors)
    }

    fn attached() -> (MachineDriver, crate::machine::sim::SimulatedHandle, Arc<ErrorLog>) {
        let (driver, _sink, errors) = driver();
        let (controller, handle) = SimulatedController::new();
        driver.attach(Box::new(controller), "sim");
        handle.clear_log();
        (driver, handle, errors)
    }

    #[test]
    fn simulation_mode_accepts_every_command() {
        let (driver, _sink, errors) = driver();
        assert!(driver.send("G0 X1").is_ok());
        assert!(driver.move_relative(1.0, 1.0, 0.0, None).is_ok());
        assert!(!driver.is_connected());
        assert!(errors.recent(10).is_empty());
    }

    #[test]
    fn attach_runs_startup_sequence() {
        let (driver, _sink, _errors) = driver();
        let (controller, handle) = SimulatedController::new();
        driver.attach(Box::new(controller), "sim");
        assert_eq!(handle.commands(), vec!["$X", "G21", "G90", "G94"]);
        let state = driver.state();
        assert!(state.connected);
        assert_eq!(state.port.as_deref(), Some("sim"));
        assert_eq!(state.activity, Activity::Idle);
    }

    #[test]
    fn relative_move_switches_modes_and_applies_inversion() {
        let (driver, handle, _errors) = attached();
        driver.move_relative(1.0, 2.0, 0.0, None).unwrap();
        assert_eq!(
            handle.commands(),
            vec!["G91", "G1 F1000 X-1.000 Y2.000", "G4 P0", "G90"]
        );
        let position = driver.state().position;
        assert_eq!((position.x, position.y), (-1.0, 2.0));
        assert_eq!(handle.position(), Position::new(-1.0, 2.0, 0.0));
    }

    #[test]
    fn late_acknowledgement_is_not_taken_for_the_next_reply() {
        let (driver, handle, _errors) = attached();
        handle.set_silent(true);
        assert!(matches!(driver.send("G4 P1"), Err(DriverError::Timeout { .. })));
        handle.set_silent(false);
        handle.push_line("ok");
        handle.reject("M8");
        assert!(matches!(driver.send("M8"), Err(DriverError::Rejected { .. })));
        assert!(driver.send("M9").is_ok());
    }

    #[test]
    fn queued_alarm_is_recorded_before_the_next_command() {
        let (driver, handle, errors) = attached();
        handle.push_line("ALARM:2");
        driver.send("G0 X1").unwrap();
        assert!(driver.state().alarm);
        assert_eq!(errors.recent(1)[0].level, Severity::Warning);
    }

    #[test]
    fn rejected_command_is_reported() {
        let (driver, handle, errors) = attached();
        handle.reject("G1 X999");
        let err = driver.send("G1 X999").unwrap_err();
        assert!(matches!(err, DriverError::Rejected { .. }));
        assert_eq!(errors.recent(1)[0].level, Severity::Error);
    }

    #[test]
    fn silent_controller_times_out() {
        let (driver, handle, _errors) = attached();
        handle.set_silent(true);
        let started = Instant::now();
        let err = driver.send_with_timeout("G4 P0", Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, DriverError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn alarm_marks_state_without_aborting_wait() {
        let (driver, handle, errors) = attached();
        handle.alarm_on("G1 Z-500");
        let err = driver.send("G1 Z-500").unwrap_err();
        assert!(matches!(err, DriverError::Rejected { .. }));
        let state = driver.state();
        assert!(state.alarm);
        assert_eq!(state.activity, Activity::Alarm);
        let levels: Vec<Severity> = errors.recent(10).iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![Severity::Warning, Severity::Error]);

        driver.unlock().unwrap();
        assert!(!driver.state().alarm);
        assert_eq!(driver.state().state, "Idle");
    }

    #[test]
    fn status_query_overrides_local_bookkeeping() {
        let (driver, handle, _errors) = attached();
        driver.move_relative(0.0, 5.0, 0.0, None).unwrap();
        handle.set_position(Position::new(1.5, 4.5, -2.0));
        let state = driver.query_status().unwrap();
        assert_eq!(state.position, Position::new(1.5, 4.5, -2.0));
        assert_eq!(state.state, "Idle");
        assert!(!state.alarm);
    }

    #[test]
    fn silent_status_query_keeps_prior_state() {
        let (driver, handle, _errors) = attached();
        driver.move_absolute(Some(3.0), None, None, None).unwrap();
        handle.set_silent(true);
        let state = driver.query_status().unwrap();
        assert_eq!(state.position.x, 3.0);
    }

    #[test]
    fn home_zeroes_position_and_origin() {
        let (driver, handle, _errors) = attached();
        driver.move_absolute(Some(10.0), Some(10.0), Some(-5.0), None).unwrap();
        handle.clear_log();
        driver.home().unwrap();
        assert_eq!(handle.commands(), vec!["$H", "G92 X0 Y0 Z0"]);
        assert_eq!(driver.state().position, Position::default());
    }

    #[test]
    fn pump_off_is_sent_twice() {
        let (driver, handle, _errors) = attached();
        driver.pump(false).unwrap();
        assert_eq!(handle.commands(), vec!["M9", "G4 P0", "M9", "G4 P0"]);
        assert!(!handle.pump_on());
        driver.pump(true).unwrap();
        assert!(handle.pump_on());
    }

    #[test]
    fn soft_reset_clears_alarm_without_reply() {
        let (driver, handle, _errors) = attached();
        handle.alarm_on("G1 Z-500");
        let _ = driver.send("G1 Z-500");
        driver.soft_reset().unwrap();
        let state = driver.state();
        assert!(!state.alarm);
        assert_eq!(state.state, "Reset");
    }

    #[test]
    fn z_safe_goto_orders_moves_by_direction() {
        let (driver, handle, _errors) = attached();
        driver.move_absolute(None, None, Some(-100.0), None).unwrap();
        handle.clear_log();

        let order = driver.goto_z_safe(5.0, 6.0, -150.0).unwrap();
        assert_eq!(order, MoveOrder::XyThenZ);
        assert_eq!(
            handle.commands(),
            vec!["G1 F1000 X5.00 Y6.00", "G4 P0", "G1 F1000 Z-150.00", "G4 P0"]
        );

        handle.clear_log();
        let order = driver.goto_z_safe(0.0, 0.0, -50.0).unwrap();
        assert_eq!(order, MoveOrder::ZThenXy);
        assert_eq!(handle.commands()[0], "G1 F1000 Z-50.00");
    }

    #[test]
    fn emergency_stop_holds_then_clears() {
        let (driver, handle, _errors) = attached();
        driver.emergency_stop().unwrap();
        assert_eq!(handle.realtime(), vec![protocol::FEED_HOLD]);
        assert_eq!(handle.commands(), vec!["M9", "$X"]);
    }

    #[test]
    fn close_turns_pump_off_and_disconnects() {
        let (driver, handle, _errors) = attached();
        driver.close();
        assert_eq!(handle.commands(), vec!["M9"]);
        assert!(!driver.is_connected());
        assert_eq!(driver.state().activity, Activity::Disconnected);
    }
}
