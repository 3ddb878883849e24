use anyhow::{Result, anyhow};
use log::info;
use pico_args::Arguments;
use std::{env, process::Command};

use crate::config::DaemonConfigState;
use crate::input::LandmarkSource;
use crate::ipc::{self, DaemonOptions};
use crate::sink::OutputSink;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        let opts = daemon_options(&mut pargs)?;
        return ipc::run_daemon(opts);
    }

    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let opts = daemon_options(&mut pargs)?;
            let exe = std::env::current_exe()?;
            let mut cmd = Command::new(exe);
            cmd.arg("--daemon").arg("--input").arg(&opts.input);
            if let Some(out) = &opts.output {
                cmd.arg("--output").arg(out);
            }
            let child = cmd.spawn()?;
            println!("winkctl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request(serde_json::json!({"op": "shutdown"})),
        Some("status") => request(serde_json::json!({"op": "status"})),
        Some("reload") => request(serde_json::json!({"op": "reload"})),
        Some("list") => request(serde_json::json!({"op": "list"})),
        Some("doctor") => request(serde_json::json!({"op": "doctor"})),
        Some("reset") => request(serde_json::json!({"op": "reset"})),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: winkctl use <profile_name>"))?;
            request(serde_json::json!({"op": "use", "profile": name}))
        }

        Some("complete") => {
            let stage: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: winkctl complete <stage>"))?;
            request(serde_json::json!({"op": "complete", "stage": stage}))
        }

        Some("replay") => {
            let output: Option<String> = pargs.opt_value_from_str("--output")?;
            let file: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: winkctl replay <file> [--output <path>]"))?;
            let cfg = DaemonConfigState::load_or_install_default()?;
            let source = LandmarkSource::open(&file)?;
            let mut sink = OutputSink::open(output.as_deref().unwrap_or("-"))?;
            let stats = ipc::replay(&cfg.profile, source, &mut sink)?;
            let stage = stats
                .final_snapshot
                .as_ref()
                .map(|s| s.current_stage.as_str())
                .unwrap_or("none");
            info!(
                "replay: {} frames, {} skipped, ended in {stage} (profile '{}')",
                stats.frames, stats.skipped, cfg.active_name
            );
            if !sink.is_enabled() {
                return Err(anyhow!("output closed before replay finished"));
            }
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn daemon_options(pargs: &mut Arguments) -> Result<DaemonOptions> {
    let input: Option<String> = pargs.opt_value_from_str("--input")?;
    let output: Option<String> = pargs.opt_value_from_str("--output")?;
    Ok(DaemonOptions {
        input: input.unwrap_or_else(|| "-".to_string()),
        output,
    })
}

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

fn print_help() {
    println!(
        r#"winkctl - gaze and blink driver for the installation stages

USAGE:
  winkctl help [command]                  Show general or command-specific help
  winkctl start [--input P] [--output P]  Start the daemon
  winkctl stop                            Stop the daemon
  winkctl status                          Show the live session snapshot
  winkctl complete <stage>                Request that a stage finish
  winkctl reset                           Restart calibration
  winkctl reload                          Reload active profile
  winkctl use <name>                      Switch active profile
  winkctl list                            List profiles
  winkctl doctor                          Check config, socket and input
  winkctl replay <file> [--output P]      Run a recording through a fresh session

STAGES:
  intro calibration morning maze test nighttime outro

TIPS:
  - Input is JSON lines of detector results; `-` reads stdin
  - Profiles: ~/.config/winkctl/profiles
  - Active profile pointer: ~/.config/winkctl/active
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!(
            "usage: winkctl start [--input <path|->] [--output <path|->]\nStarts the background daemon reading detector results from <input>."
        ),
        "stop" => println!("usage: winkctl stop\nStops the running daemon."),
        "status" => println!(
            "usage: winkctl status\nShows stage, gaze, blink and calibration state of the live session."
        ),
        "complete" => println!(
            "usage: winkctl complete <stage>\nRequests that <stage> finish. The reply only confirms the request was queued;\nthe daemon ignores it unless <stage> is still current (check with `winkctl status`)."
        ),
        "reset" => println!(
            "usage: winkctl reset\nDiscards calibration samples and returns to the calibration stage."
        ),
        "reload" => println!(
            "usage: winkctl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: winkctl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: winkctl list\nLists available profiles."),
        "doctor" => println!(
            "usage: winkctl doctor\nChecks the config directory, active profile, socket and input source."
        ),
        "replay" => println!(
            "usage: winkctl replay <file> [--output <path>]\nRuns a recorded JSONL file through a fresh session using its own timestamps\nand writes snapshots and events as JSON lines (stdout by default)."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
