use crate::config::DiscoveryConfig;
use crate::machine::transport::{SerialTransport, Transport};
use log::{debug, info};
use std::time::{Duration, Instant};

/// Enumerated devices whose name starts with one of the configured patterns.
pub fn candidate_ports(config: &DiscoveryConfig) -> Vec<String> {
    let mut ports: Vec<String> = match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|port| port.port_name).collect(),
        Err(err) => {
            debug!("serial enumeration failed: {}", err);
            Vec::new()
        }
    };
    ports.retain(|name| {
        config
            .port_patterns
            .iter()
            .any(|pattern| name.starts_with(pattern.as_str()))
    });
    ports.sort();
    ports
}

pub fn contains_banner(text: &str, banner: &str) -> bool {
    text.to_ascii_lowercase()
        .contains(&banner.to_ascii_lowercase())
}

/// First candidate accepted by `probe`, else the first candidate.
pub fn select_port<F>(candidates: &[String], mut probe: F) -> Option<String>
where
    F: FnMut(&str) -> bool,
{
    candidates
        .iter()
        .find(|candidate| probe(candidate))
        .or_else(|| candidates.first())
        .cloned()
}

/// Resets the device and listens for the protocol banner.
pub fn probe_port(path: &str, config: &DiscoveryConfig) -> bool {
    let mut transport = match SerialTransport::open(path, config.baud_rate) {
        Ok(transport) => transport,
        Err(err) => {
            debug!("probe {}: {}", path, err);
            return false;
        }
    };
    if let Err(err) = transport.pulse_reset(
        Duration::from_millis(config.probe_reset_ms),
        Duration::from_millis(config.probe_boot_ms),
    ) {
        debug!("probe {}: reset failed: {}", path, err);
        return false;
    }

    let window = Duration::from_millis(config.probe_window_ms);
    let started = Instant::now();
    let mut received = String::new();
    while started.elapsed() < window {
        match transport.read_available(Duration::from_millis(100)) {
            Ok(bytes) => received.push_str(&String::from_utf8_lossy(&bytes)),
            Err(_) => break,
        }
        if contains_banner(&received, &config.banner) {
            return true;
        }
    }
    false
}

/// Resolves the device to open: explicit override, probed match, or first candidate.
pub fn discover(config: &DiscoveryConfig) -> Option<String> {
    if let Some(port) = config.port.as_ref().filter(|port| !port.is_empty()) {
        return Some(port.clone());
    }
    let candidates = candidate_ports(config);
    if candidates.is_empty() {
        return None;
    }
    info!("scanning {}", candidates.join(", "));
    select_port(&candidates, |path| probe_port(path, config))
}
