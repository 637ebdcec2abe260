use std::time::Duration;

/// Failures raised while talking to the motion controller.
#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("serial i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port failure: {0}")]
    Port(#[from] serialport::Error),
    #[error("command `{command}` rejected: {response}")]
    Rejected { command: String, response: String },
    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Failures surfaced by the rig command surface.
#[derive(thiserror::Error, Debug)]
pub enum RigError {
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
    #[error("{0} is not running")]
    NotRunning(&'static str),
    #[error("{kind} `{name}` not found")]
    NotFound { kind: &'static str, name: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub type RigResult<T> = Result<T, RigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rig_error_wraps_driver_error_message() {
        let err: RigError = DriverError::Rejected {
            command: "G1 X1".into(),
            response: "error:20".into(),
        }
        .into();
        assert_eq!(err.to_string(), "command `G1 X1` rejected: error:20");
    }

    #[test]
    fn already_running_names_the_activity() {
        let err = RigError::AlreadyRunning("scenario");
        assert_eq!(err.to_string(), "scenario is already running");
    }
}
