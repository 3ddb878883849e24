mod blink;
mod calibration;
mod cli;
mod config;
mod geometry;
mod input;
mod ipc;
mod logging;
mod mapper;
mod session;
mod sink;
mod smoothing;
mod stage;
mod tracker;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
