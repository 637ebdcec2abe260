use crate::cancel::CancelToken;
use crate::telemetry::events::{Event, EventSink, StatusSnapshot};
use log::info;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Emits a `status_update` every `interval` until `cancel` fires.
///
/// `snapshot` must only take read locks so the broadcaster never stalls
/// actuation.
pub fn spawn_status_broadcaster<F>(
    interval: Duration,
    cancel: CancelToken,
    sink: Arc<dyn EventSink>,
    snapshot: F,
) -> JoinHandle<()>
where
    F: Fn() -> StatusSnapshot + Send + 'static,
{
    thread::spawn(move || {
        info!("status broadcaster started ({:?})", interval);
        loop {
            sink.emit(Event::StatusUpdate(snapshot()));
            if cancel.sleep(interval) {
                break;
            }
        }
        info!("status broadcaster stopped");
    })
}
