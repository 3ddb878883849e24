use anyhow::Result;
use log::{error, info, warn};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
        mpsc::{Receiver, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use super::dispatch::dispatch_events;
use crate::config::Profile;
use crate::input::{DetectorResult, FrameError, LandmarkSource};
use crate::session::{Command, Session, Snapshot};
use crate::sink::OutputSink;

/// Frame spacing assumed for recordings without timestamps (~30 fps).
const REPLAY_FRAME_MS: u64 = 33;

pub enum PipelineMsg {
    Frame(DetectorResult),
    InputClosed,
    Tick,
    Command(Command),
    Reconfigure(Profile),
    Shutdown,
}

/// Milliseconds since the pipeline started. Every frame, tick and command is
/// stamped from here so stage timers and blink durations share one clock.
struct Clock {
    start: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Owns the session. Nothing else mutates it; readers get `shared`.
pub fn run_pipeline(
    profile: Profile,
    rx: Receiver<PipelineMsg>,
    shared: Arc<Mutex<Snapshot>>,
    tick_ms: Arc<AtomicU64>,
    sink: OutputSink,
) -> Result<()> {
    let clock = Clock::new();
    pump(profile, rx, shared, tick_ms, sink, || clock.now_ms())
}

fn pump(
    profile: Profile,
    rx: Receiver<PipelineMsg>,
    shared: Arc<Mutex<Snapshot>>,
    tick_ms: Arc<AtomicU64>,
    mut sink: OutputSink,
    mut now_ms: impl FnMut() -> u64,
) -> Result<()> {
    let mut session = Session::new(&profile, now_ms());

    while let Ok(msg) = rx.recv() {
        let now = now_ms();
        let (events, is_frame) = match msg {
            PipelineMsg::Frame(res) => (session.process_frame(res.first_face(), now), true),
            PipelineMsg::Tick => (session.tick(now), false),
            PipelineMsg::Command(cmd) => (session.command(cmd, now), false),
            PipelineMsg::Reconfigure(p) => {
                session.reconfigure(&p);
                tick_ms.store(p.stages.tick_ms, Ordering::Relaxed);
                info!("pipeline: profile applied");
                (Vec::new(), false)
            }
            PipelineMsg::InputClosed => {
                warn!("landmark input closed; stage timers and commands still run");
                (Vec::new(), false)
            }
            PipelineMsg::Shutdown => break,
        };

        if let Err(e) = dispatch_events(&events, now, &mut sink) {
            error!("dispatch failed: {e}");
        }
        // timed stages keep counting down with no frames arriving
        if !is_frame && events.is_empty() && !session.stage_is_timed() {
            continue;
        }

        let snap = session.snapshot();
        if is_frame {
            if let Err(e) = sink.snapshot(&snap) {
                error!("snapshot write failed: {e}");
            }
        }
        if let Ok(mut s) = shared.lock() {
            *s = snap;
        }
    }

    info!("pipeline: stopped");
    Ok(())
}

/// Feed detector results from `input` until it ends. Opening happens on the
/// reader thread since a FIFO blocks until its writer shows up.
pub fn spawn_reader(input: String, tx: Sender<PipelineMsg>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let source = match LandmarkSource::open(&input) {
            Ok(s) => s,
            Err(e) => {
                error!("landmark input unavailable: {e:#}");
                let _ = tx.send(PipelineMsg::InputClosed);
                return;
            }
        };
        info!("reading detector results from {input}");
        for item in source {
            match item {
                Ok(res) => {
                    if tx.send(PipelineMsg::Frame(res)).is_err() {
                        return;
                    }
                }
                Err(FrameError::Io(e)) => {
                    error!("landmark input failed: {e}");
                    break;
                }
                Err(e) => warn!("skipping detector result: {e}"),
            }
        }
        let _ = tx.send(PipelineMsg::InputClosed);
    })
}

/// Fixed-interval stage timer, independent of the frame rate.
pub fn spawn_ticker(tick_ms: Arc<AtomicU64>, tx: Sender<PipelineMsg>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            thread::sleep(Duration::from_millis(tick_ms.load(Ordering::Relaxed).max(1)));
            if tx.send(PipelineMsg::Tick).is_err() {
                return;
            }
        }
    })
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplayStats {
    pub frames: usize,
    pub skipped: usize,
    pub final_snapshot: Option<Snapshot>,
}

/// Run a recording through a fresh session on its own timestamps, writing
/// events and per-frame snapshots to `sink`.
pub fn replay(profile: &Profile, source: LandmarkSource, sink: &mut OutputSink) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    let mut session: Option<Session> = None;
    let mut last_ms: Option<u64> = None;

    for item in source {
        let res = match item {
            Ok(res) => res,
            Err(FrameError::Io(e)) => return Err(e.into()),
            Err(e) => {
                warn!("skipping detector result: {e}");
                stats.skipped += 1;
                continue;
            }
        };

        let now = res
            .timestamp_ms
            .or(last_ms.map(|t| t + REPLAY_FRAME_MS))
            .unwrap_or(0);
        last_ms = Some(now);

        let s = session.get_or_insert_with(|| Session::new(profile, now));
        let mut events = s.process_frame(res.first_face(), now);
        events.extend(s.tick(now));
        dispatch_events(&events, now, sink)?;
        sink.snapshot(&s.snapshot())?;
        stats.frames += 1;
    }

    stats.final_snapshot = session.map(|s| s.snapshot());
    Ok(stats)
}
