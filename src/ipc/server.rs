use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use notify::{EventKind, RecursiveMode, Watcher};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::AtomicU64,
        mpsc::{self, Receiver, Sender},
    },
    thread,
    time::Duration,
};

use super::pipeline::{PipelineMsg, run_pipeline, spawn_reader, spawn_ticker};
use super::runtime::socket_path;
use crate::config::{DaemonConfigState, Profile};
use crate::input::describe_source;
use crate::session::{Command, Session, Snapshot};
use crate::sink::OutputSink;
use crate::stage::Stage;

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Detector results: a path, FIFO, or `-` for stdin.
    pub input: String,
    /// Where snapshots and events go, if anywhere.
    pub output: Option<String>,
}

pub fn run_daemon(opts: DaemonOptions) -> Result<()> {
    // socket
    let sock = socket_path()?;
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)
        .with_context(|| format!("failed to bind {}", sock.display()))?;
    info!("daemon: listening on {}", sock.display());

    // state
    let mut state = DaemonState::new(&opts)?;
    info!("daemon: active profile '{}'", state.cfg.active_name);

    // channels
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();

    // pipeline
    let sink = match &opts.output {
        Some(spec) => OutputSink::open(spec)?,
        None => OutputSink::noop(),
    };
    let pipeline = PipelineThread::start(
        state.cfg.profile.clone(),
        opts.input.clone(),
        sink,
        state.snapshot.clone(),
    );

    // profile hot reload
    let (tx_fs, rx_fs) = mpsc::channel::<notify::Result<notify::Event>>();
    let mut watcher = notify::recommended_watcher(tx_fs)?;
    watcher.watch(&state.cfg.profiles_dir, RecursiveMode::NonRecursive)?;

    // signals
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let tx_sig = tx_req.clone();
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("daemon: caught signal {sig}");
            let _ = tx_sig.send(IpcMsg::Shutdown);
        }
    });

    // accept loop
    listener.set_nonblocking(true)?;
    loop {
        if let Ok((stream, _)) = listener.accept() {
            let tx = tx_req.clone();
            let st_snapshot = state.clone_shallow();
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, st_snapshot, tx) {
                    error!("ipc client error: {e}");
                }
            });
        }

        if profile_touched(&rx_fs, &state.cfg.active_path()) {
            let _ = tx_req.send(IpcMsg::Reload);
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => {
                    if let Err(e) = state.cfg.reload() {
                        error!("reload failed, keeping last good profile: {e:#}");
                    } else {
                        pipeline.send(PipelineMsg::Reconfigure(state.cfg.profile.clone()));
                        info!("profile reloaded");
                    }
                }
                IpcMsg::UseProfile(name) => {
                    if let Err(e) = state.cfg.set_active(&name) {
                        error!("use profile failed: {e:#}");
                    } else {
                        pipeline.send(PipelineMsg::Reconfigure(state.cfg.profile.clone()));
                        info!("switched active profile to {}", state.cfg.active_name);
                    }
                }
                IpcMsg::Command(cmd) => pipeline.send(PipelineMsg::Command(cmd)),
                IpcMsg::Shutdown => {
                    pipeline.send(PipelineMsg::Shutdown);
                    let _ = std::fs::remove_file(&sock);
                    info!("daemon: shut down");
                    return Ok(());
                }
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

fn profile_touched(rx_fs: &Receiver<notify::Result<notify::Event>>, active: &Path) -> bool {
    let mut touched = false;
    while let Ok(ev) = rx_fs.try_recv() {
        match ev {
            Ok(ev) => {
                let relevant = matches!(ev.kind, EventKind::Create(_) | EventKind::Modify(_));
                if relevant && ev.paths.iter().any(|p| p.file_name() == active.file_name()) {
                    touched = true;
                }
            }
            Err(e) => warn!("profile watch error: {e}"),
        }
    }
    touched
}

fn handle_client(mut stream: UnixStream, st: DaemonState, tx_req: Sender<IpcMsg>) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let resp = respond(&req, &st, &tx_req);
    writeln!(stream, "{resp}")?;
    Ok(())
}

fn respond(req: &serde_json::Value, st: &DaemonState, tx_req: &Sender<IpcMsg>) -> serde_json::Value {
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");
    match op {
        "status" => {
            let snap = st.snapshot.lock().map(|s| s.clone()).ok();
            serde_json::json!({"ok": true, "data": {
                "active_profile": st.cfg.active_name,
                "input": st.input,
                "session": snap,
            }})
        }
        "complete" => {
            let name = req.get("stage").and_then(|v| v.as_str()).unwrap_or("");
            match name.parse::<Stage>() {
                // queued only; the pipeline drops it if `stage` is no longer current
                Ok(stage) => {
                    let _ = tx_req.send(IpcMsg::Command(Command::StageComplete(stage)));
                    serde_json::json!({"ok": true, "data": {"requested": stage}})
                }
                Err(e) => serde_json::json!({"ok": false, "error": e}),
            }
        }
        "reset" => {
            let _ = tx_req.send(IpcMsg::Command(Command::ResetCalibration));
            serde_json::json!({"ok": true, "data": {"stage": Stage::Calibration}})
        }
        "reload" => {
            let _ = tx_req.send(IpcMsg::Reload);
            serde_json::json!({"ok": true, "data": {"active_profile": st.cfg.active_name}})
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            if name.is_empty() {
                return serde_json::json!({"ok": false, "error": "missing profile name"});
            }
            let _ = tx_req.send(IpcMsg::UseProfile(name.to_string()));
            serde_json::json!({"ok": true, "data": {"active_profile": name}})
        }
        "list" => {
            let list = st.cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": st.cfg.active_name}})
        }
        "doctor" => {
            let mut report = match socket_path() {
                Ok(sock) => st.cfg.doctor_report(&sock),
                Err(e) => return serde_json::json!({"ok": false, "error": e.to_string()}),
            };
            let src = describe_source(&st.input);
            report["input"] = serde_json::json!({"path": src.path, "kind": src.kind});
            serde_json::json!({"ok": true, "data": report})
        }
        "shutdown" => {
            let _ = tx_req.send(IpcMsg::Shutdown);
            serde_json::json!({"ok": true, "data": "shutting down"})
        }
        _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
    }
}

struct DaemonState {
    cfg: DaemonConfigState,
    input: String,
    snapshot: Arc<Mutex<Snapshot>>,
}

impl DaemonState {
    fn new(opts: &DaemonOptions) -> Result<Self> {
        let cfg = DaemonConfigState::load_or_install_default()?;
        let snapshot = Arc::new(Mutex::new(Session::new(&cfg.profile, 0).snapshot()));
        Ok(Self {
            cfg,
            input: opts.input.clone(),
            snapshot,
        })
    }

    fn clone_shallow(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
            input: self.input.clone(),
            snapshot: Arc::clone(&self.snapshot),
        }
    }
}

enum IpcMsg {
    Reload,
    UseProfile(String),
    Command(Command),
    Shutdown,
}

struct PipelineThread {
    tx: Sender<PipelineMsg>,
    _threads: Vec<thread::JoinHandle<()>>,
}

impl PipelineThread {
    fn start(
        profile: Profile,
        input: String,
        sink: OutputSink,
        shared: Arc<Mutex<Snapshot>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<PipelineMsg>();
        let tick_ms = Arc::new(AtomicU64::new(profile.stages.tick_ms));

        let reader = spawn_reader(input, tx.clone());
        let ticker = spawn_ticker(tick_ms.clone(), tx.clone());
        let worker = thread::spawn(move || {
            if let Err(e) = run_pipeline(profile, rx, shared, tick_ms, sink) {
                error!("gaze pipeline failed: {e}");
            }
        });

        Self {
            tx,
            _threads: vec![reader, ticker, worker],
        }
    }

    fn send(&self, msg: PipelineMsg) {
        if self.tx.send(msg).is_err() {
            warn!("pipeline is not running");
        }
    }
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "winkctl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (DaemonState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DaemonConfigState::load_or_install_in(dir.path()).unwrap();
        let snapshot = Arc::new(Mutex::new(Session::new(&cfg.profile, 0).snapshot()));
        (
            DaemonState {
                cfg,
                input: "-".into(),
                snapshot,
            },
            dir,
        )
    }

    #[test]
    fn complete_parses_stage_and_forwards_command() {
        let (st, _dir) = state();
        let (tx, rx) = mpsc::channel();
        let r = respond(&serde_json::json!({"op": "complete", "stage": "maze"}), &st, &tx);
        assert_eq!(r["ok"], true);
        assert_eq!(r["data"]["requested"], "maze");
        assert!(r["data"].get("completed").is_none());
        assert!(matches!(
            rx.try_recv(),
            Ok(IpcMsg::Command(Command::StageComplete(Stage::Maze)))
        ));

        let bad = respond(&serde_json::json!({"op": "complete", "stage": "lobby"}), &st, &tx);
        assert_eq!(bad["ok"], false);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn status_reports_session_snapshot() {
        let (st, _dir) = state();
        let (tx, _rx) = mpsc::channel();
        let r = respond(&serde_json::json!({"op": "status"}), &st, &tx);
        assert_eq!(r["data"]["session"]["current_stage"], "intro");
        assert_eq!(r["data"]["session"]["calibration_progress"]["total"], 4);
        assert_eq!(r["data"]["active_profile"], "default");
    }

    #[test]
    fn reset_and_unknown_ops() {
        let (st, _dir) = state();
        let (tx, rx) = mpsc::channel();
        respond(&serde_json::json!({"op": "reset"}), &st, &tx);
        assert!(matches!(
            rx.try_recv(),
            Ok(IpcMsg::Command(Command::ResetCalibration))
        ));
        let r = respond(&serde_json::json!({"op": "dance"}), &st, &tx);
        assert_eq!(r["error"], "unknown op: dance");
    }
}
