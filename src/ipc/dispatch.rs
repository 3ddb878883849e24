use anyhow::Result;
use log::{debug, info};

use crate::session::SessionEvent;
use crate::sink::OutputSink;

/// Log one pass worth of events and forward them to the sink.
pub fn dispatch_events(events: &[SessionEvent], timestamp_ms: u64, sink: &mut OutputSink) -> Result<()> {
    for ev in events {
        match ev {
            SessionEvent::FaceFound => info!("face found"),
            SessionEvent::FaceLost => info!("face lost"),
            SessionEvent::BlinkStarted => debug!("eyes closed"),
            SessionEvent::BlinkConfirmed { duration_s } => debug!("wink {duration_s:.2}s"),
            SessionEvent::BlinkRejected { duration_s } => debug!("flicker {duration_s:.2}s ignored"),
            SessionEvent::CalibrationCaptured { .. }
            | SessionEvent::CalibrationComplete { .. }
            | SessionEvent::CalibrationReset
            | SessionEvent::StageChanged { .. } => {}
        }
        sink.event(timestamp_ms, ev)?;
    }
    Ok(())
}
