use crate::telemetry::events::{Event, EventSink};
use log::{debug, info};
use std::sync::Mutex;

/// Sink that writes every event to the `log` facade.
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        match event {
            // once per second; keep it out of the info stream
            Event::StatusUpdate(_) => debug!("{} {}", event.name(), event.payload()),
            _ => info!("{} {}", event.name(), event.payload()),
        }
    }
}

/// Sink that keeps events in memory, for inspection after a run.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::name).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
