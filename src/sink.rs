use anyhow::{Context, Result};
use log::warn;
use serde::Serialize;
use std::{
    fs::OpenOptions,
    io::{self, Write},
};

use crate::session::{SessionEvent, Snapshot};

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Snapshot(&'a Snapshot),
    Event {
        timestamp_ms: u64,
        event: &'a SessionEvent,
    },
}

/// JSON-lines writer for downstream stage content.
pub struct OutputSink {
    enabled: bool,
    out: Option<Box<dyn Write + Send>>,
}

impl OutputSink {
    /// `-` writes to stdout; anything else is appended to as a file.
    pub fn open(spec: &str) -> Result<Self> {
        let out: Box<dyn Write + Send> = if spec == "-" {
            Box::new(io::stdout())
        } else {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(spec)
                .with_context(|| format!("failed to open output {spec}"))?;
            Box::new(io::LineWriter::new(f))
        };
        Ok(Self::from_writer(out))
    }

    pub fn from_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            enabled: true,
            out: Some(out),
        }
    }

    pub fn noop() -> Self {
        Self {
            enabled: true,
            out: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn snapshot(&mut self, snap: &Snapshot) -> Result<()> {
        self.write(&Record::Snapshot(snap))
    }

    pub fn event(&mut self, timestamp_ms: u64, event: &SessionEvent) -> Result<()> {
        self.write(&Record::Event {
            timestamp_ms,
            event,
        })
    }

    fn write(&mut self, rec: &Record<'_>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let Some(out) = self.out.as_mut() else {
            return Ok(());
        };
        let line = serde_json::to_string(rec)?;
        if let Err(e) = writeln!(out, "{line}") {
            // a closed reader should not take the pipeline down with it
            warn!("output closed ({e}); disabling sink");
            self.enabled = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_tagged_lines() {
        let buf = Shared::default();
        let mut sink = OutputSink::from_writer(Box::new(buf.clone()));
        sink.event(12, &SessionEvent::BlinkStarted).unwrap();
        sink.event(
            40,
            &SessionEvent::StageChanged {
                from: crate::stage::Stage::Intro,
                to: crate::stage::Stage::Calibration,
            },
        )
        .unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0]["kind"], "event");
        assert_eq!(lines[0]["event"]["event"], "blink_started");
        assert_eq!(lines[1]["event"]["to"], "calibration");
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn broken_pipe_disables_sink() {
        let mut sink = OutputSink::from_writer(Box::new(Closed));
        assert!(sink.is_enabled());
        sink.event(0, &SessionEvent::FaceFound).unwrap();
        assert!(!sink.is_enabled());
        sink.event(1, &SessionEvent::FaceLost).unwrap();
        assert!(OutputSink::noop().event(0, &SessionEvent::FaceLost).is_ok());
    }
}
