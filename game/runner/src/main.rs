use cinder::logging::{self, Logger};
use cinder::settings::Settings;
use clap::{App, Arg, ErrorKind};
use mudcore::config::ServerConfig;
use mudcore::game::GameEngine;
use nix::sys::signal::{self, SigHandler, Signal};
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const SETTINGS_FILE: &str = "settings.ini";

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let args = App::new("mudrunner")
        .version("0.1.0")
        .about("Runs the mud game server.")
        .arg(
            Arg::with_name("run")
                .short("r")
                .long("run")
                .help("Runs the game server (the default)"),
        )
        .get_matches_safe();

    if let Err(err) = args {
        return match err.kind {
            ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => {
                println!("{}", err.message);
                0
            }
            _ => {
                eprintln!("{}", err.message);
                -1
            }
        };
    }

    let log = logging::init();

    let settings = match Settings::load(SETTINGS_FILE, &log) {
        Ok(settings) => settings,
        Err(err) => {
            logging::warn!(log, "settings file not available, using defaults";
                           "file" => SETTINGS_FILE,
                           "error" => %err);
            Settings::new(&log)
        }
    };

    let config = ServerConfig::from_settings(&settings);

    let mut game = GameEngine::new(config, &log);

    install_signal_handlers(game.stop_handle(), &log);

    if !game.initialize() {
        logging::error!(log, "fatal error during initialization"; "context" => "run");
        return -1;
    }

    logging::info!(log, "running the game"; "context" => "run");
    game.run()
}

/// SIGPIPE is ignored (broken pipes surface as socket write errors where
/// they can be handled); SIGINT requests an orderly shutdown through the
/// game loop's stop flag.
fn install_signal_handlers(stop: Arc<AtomicBool>, log: &Logger) {
    logging::info!(log, "registering signal handlers"; "context" => "install_signal_handlers");

    unsafe {
        if let Err(err) = signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) {
            logging::warn!(log, "failed to ignore SIGPIPE";
                           "context" => "install_signal_handlers",
                           "error" => %err);
        }
    }

    let mut signals = match Signals::new(&[SIGINT]) {
        Ok(signals) => signals,
        Err(err) => {
            logging::warn!(log, "failed to register the interrupt handler";
                           "context" => "install_signal_handlers",
                           "error" => %err);
            return;
        }
    };

    let signal_log = log.new(logging::o!("worker" => "signals"));

    let spawned = thread::Builder::new().name("signals".to_owned()).spawn(move || {
        if let Some(signal) = signals.forever().next() {
            logging::info!(signal_log, "interrupt received, requesting shutdown";
                           "context" => "signals",
                           "signal" => signal);
            stop.store(true, Ordering::Relaxed);
        }
    });

    if let Err(err) = spawned {
        logging::warn!(log, "failed to start the signal thread";
                       "context" => "install_signal_handlers",
                       "error" => %err);
    }
}
