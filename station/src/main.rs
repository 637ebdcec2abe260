use anyhow::Context;
use clap::Parser;
use generator::scene::spawn_scene;
use pnpcore::cancel::CancelToken;
use pnpcore::machine::SimulatedController;
use pnpcore::telemetry::LogSink;
use pnpcore::vision::TargetRequest;
use pnpcore::Rig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::RigFile;
use workflow::feed::spawn_stdin_feed;
use workflow::runner::{Action, Runner};

mod generator;
mod workflow;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(author, version, about = "Pick-and-place rig station driver")]
struct Args {
    /// Load the rig file from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// Serial device, skipping discovery
    #[arg(long)]
    port: Option<String>,
    /// Run against the simulated controller and synthetic scene
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Home before any other action
    #[arg(long, default_value_t = false)]
    home: bool,
    /// Raw command to send after connecting
    #[arg(long)]
    gcode: Option<String>,
    /// Center on this word
    #[arg(long)]
    center: Option<String>,
    /// Center on any word of this OCR group
    #[arg(long, conflicts_with = "center")]
    group: Option<String>,
    #[arg(long)]
    scenario: Option<String>,
    #[arg(long)]
    master: Option<String>,
    /// Run the configured fill-ratio verification
    #[arg(long, default_value_t = false)]
    verify: bool,
    /// Read JSON-lines detection frames from stdin
    #[arg(long, default_value_t = false)]
    detections_stdin: bool,
    /// Keep running with status broadcasts until Ctrl+C
    #[arg(long, default_value_t = false)]
    serve: bool,
}

impl Args {
    fn actions(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.home {
            actions.push(Action::Home);
        }
        if let Some(command) = &self.gcode {
            actions.push(Action::Gcode(command.clone()));
        }
        if let Some(word) = &self.center {
            actions.push(Action::Center(TargetRequest::Word(word.clone())));
        }
        if let Some(group) = &self.group {
            actions.push(Action::Center(TargetRequest::Group(group.clone())));
        }
        if let Some(name) = &self.scenario {
            actions.push(Action::Scenario(name.clone()));
        }
        if let Some(name) = &self.master {
            actions.push(Action::MasterScenario(name.clone()));
        }
        if self.verify {
            actions.push(Action::Verify);
        }
        actions
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => RigFile::load(path)?,
        None => RigFile::default(),
    }
    .with_port(args.port.clone());

    let rig = Arc::new(Rig::new(file.rig.clone(), Arc::new(LogSink::new())));
    let cancel = CancelToken::new();
    let mut workers = Vec::new();

    if args.offline {
        let (controller, handle) = SimulatedController::new();
        rig.attach(Box::new(controller), "simulated");
        workers.push(spawn_scene(rig.clone(), handle, file.scene.clone(), cancel.clone()));
    } else if !rig.connect() {
        log::warn!("no controller connected, commands run in simulation mode");
    }
    if args.detections_stdin {
        // blocks on stdin, so it is left detached
        spawn_stdin_feed(rig.clone());
    }
    workers.push(rig.spawn_broadcaster(STATUS_INTERVAL, cancel.clone()));

    let runner = Runner::new(rig.clone());
    let mut outcome = Ok(());
    for action in args.actions() {
        match runner.execute(&action) {
            Ok(summary) => println!("{}", summary),
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }

    if args.serve && outcome.is_ok() {
        log::info!("station running (Ctrl+C to stop)");
        let runtime = TokioBuilder::new_current_thread()
            .enable_all()
            .build()
            .context("creating runtime for signal handling")?;
        runtime.block_on(async {
            signal::ctrl_c().await.context("awaiting Ctrl+C to exit")?;
            Ok::<(), anyhow::Error>(())
        })?;
    }

    cancel.cancel();
    rig.shutdown();
    for worker in workers {
        if worker.join().is_err() {
            log::warn!("worker thread panicked during shutdown");
        }
    }
    outcome
}
