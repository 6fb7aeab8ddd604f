pub mod data;

pub use self::data::{DataEngine, ObjectId, Player};

use crate::config::ServerConfig;
use crate::net::{MessageKind, MessageQueue, NetworkEngine};
use crate::world::WorldEngine;
use cinder::logging::{self, Logger};
use cinder::time::timestamp_secs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Target length of one game cycle.
pub const CYCLE_LENGTH: Duration = Duration::from_millis(250);

/// The single-threaded game loop. Owns the data and world engines and the
/// network facade; consumes the inbound queue the network workers feed.
pub struct GameEngine {
    booted: bool,
    running: bool,
    run_status: bool,

    cycle_count: u64,
    cycle_time: Instant,
    cycle_limit: Option<u64>,
    time_boot: u64,

    stop: Arc<AtomicBool>,

    config: ServerConfig,
    inbound: Arc<MessageQueue>,
    network: NetworkEngine,
    data: DataEngine,
    world: WorldEngine,

    log: Logger,
}

impl GameEngine {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(config: ServerConfig, log: L) -> GameEngine {
        let log = logging::child_or_discard(log);

        let inbound = Arc::new(MessageQueue::new());
        let network = NetworkEngine::new(Arc::clone(&inbound), &log);
        let data = DataEngine::new(&log);
        let world = WorldEngine::new(&log);

        GameEngine {
            booted: false,
            running: false,
            run_status: false,
            cycle_count: 0,
            cycle_time: Instant::now(),
            cycle_limit: config.cycle_limit,
            time_boot: 0,
            stop: Arc::new(AtomicBool::new(false)),
            config,
            inbound,
            network,
            data,
            world,
            log,
        }
    }

    /// Flag observed by the game loop each cycle; raising it requests an
    /// orderly shutdown (this is what the interrupt handler flips).
    #[inline]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    #[inline]
    pub fn network(&self) -> &NetworkEngine {
        &self.network
    }

    #[inline]
    pub fn num_players(&self) -> usize {
        self.data.num_players()
    }

    #[inline]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    #[inline]
    pub fn is_booted(&self) -> bool {
        self.booted
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Boots the world and the network pipeline.
    pub fn initialize(&mut self) -> bool {
        if self.booted {
            logging::error!(self.log, "game is already booted"; "context" => "initialize");
            return false;
        }

        let boot_start = Instant::now();

        self.world.initialize(self.config.world_path.as_deref());

        if !self.network.initialize(&self.config) {
            logging::error!(self.log, "fatal error starting the network engine";
                            "context" => "initialize");
            return false;
        }

        self.run_status = true;
        self.time_boot = timestamp_secs();
        self.booted = true;

        logging::info!(self.log, "booted";
                       "context" => "initialize",
                       "elapsed_ms" => boot_start.elapsed().as_millis() as u64,
                       "rooms" => self.world.num_rooms(),
                       "port" => self.config.port);

        true
    }

    /// Runs the fixed-cadence game loop until stopped, the run status
    /// clears, or the configured cycle limit is reached. Returns the exit
    /// code handed to `shutdown`.
    pub fn run(&mut self) -> i32 {
        if !self.booted || self.running {
            return 0;
        }
        self.running = true;

        logging::info!(self.log, "entering game loop";
                       "context" => "run",
                       "cycle_ms" => CYCLE_LENGTH.as_millis() as u64);

        if let Some(limit) = self.cycle_limit {
            let duration = CYCLE_LENGTH * limit as u32;
            logging::info!(self.log, "game loop will exit on its own";
                           "context" => "run",
                           "cycles" => limit,
                           "duration_secs" => duration.as_secs());
        }

        loop {
            self.update_cycle();
            self.update();

            if !self.run_status || self.stop.load(Ordering::Relaxed) {
                break;
            }

            if let Some(limit) = self.cycle_limit {
                if self.cycle_count >= limit {
                    break;
                }
            }

            // Sleep out the remainder of the cycle; a long update eats its
            // own slack instead of delaying the next cycle further.
            let elapsed = self.cycle_time.elapsed();
            if elapsed < CYCLE_LENGTH {
                thread::sleep(CYCLE_LENGTH - elapsed);
            }
        }

        logging::info!(self.log, "exiting game loop";
                       "context" => "run",
                       "cycles" => self.cycle_count);

        self.shutdown(0)
    }

    #[inline]
    fn update_cycle(&mut self) {
        self.cycle_count += 1;
        self.cycle_time = Instant::now();
    }

    /// Drains the inbound queue and applies each event to the data engine.
    fn update(&mut self) {
        if self.inbound.is_empty() {
            return;
        }

        let mut added = 0u32;
        let mut removed = 0u32;
        let mut incoming = 0u32;
        let mut errors = 0u32;

        let mut queue = self.inbound.lock();

        logging::debug!(self.log, "processing input messages";
                        "context" => "update",
                        "players" => self.data.num_players(),
                        "messages" => queue.len());

        while let Some(message) = queue.pop() {
            match message.kind {
                MessageKind::NewConnection => {
                    logging::info!(self.log, "adding player connection";
                                   "context" => "update",
                                   "cid" => message.cid);
                    self.data.add_player(message.cid);
                    added += 1;
                }
                MessageKind::Disconnection => {
                    logging::info!(self.log, "removing player connection";
                                   "context" => "update",
                                   "cid" => message.cid);
                    self.data.remove_player(message.cid);
                    removed += 1;
                }
                MessageKind::DataIncoming => {
                    if message.len() == 0 {
                        logging::error!(self.log, "incoming data message with an empty payload";
                                        "context" => "update",
                                        "cid" => message.cid);
                        errors += 1;
                    } else {
                        // Command interpretation hangs off this arm once it
                        // exists; for now the payload is acknowledged only.
                        incoming += 1;
                    }
                }
                MessageKind::DataOutgoing => {
                    logging::error!(self.log, "outgoing data message on the inbound queue";
                                    "context" => "update",
                                    "cid" => message.cid);
                    errors += 1;
                }
                MessageKind::DnsLookup => {
                    // Lookup results are informational; nothing consumes
                    // them yet.
                }
            }
        }

        drop(queue);

        logging::debug!(self.log, "input messages processed";
                        "context" => "update",
                        "added" => added,
                        "removed" => removed,
                        "incoming" => incoming,
                        "errors" => errors);
    }

    /// Stops the simulation and closes the network engine. Returns the
    /// exit code for the process.
    pub fn shutdown(&mut self, err: i32) -> i32 {
        if err != 0 {
            logging::warn!(self.log, "shutting down because of an error";
                           "context" => "shutdown",
                           "error" => err);
        }

        self.run_status = false;
        self.network.close();

        logging::info!(self.log, "shutdown complete";
                       "context" => "shutdown",
                       "players" => self.data.num_players(),
                       "cycles" => self.cycle_count,
                       "uptime_secs" => timestamp_secs().saturating_sub(self.time_boot));

        self.booted = false;
        self.running = false;

        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetworkMessage;

    fn test_engine() -> GameEngine {
        let config = ServerConfig {
            ipv6: None,
            ..ServerConfig::default()
        };
        GameEngine::new(config, None)
    }

    fn booted_engine(cycle_limit: Option<u64>) -> GameEngine {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let config = ServerConfig {
            port,
            ipv6: None,
            cycle_limit,
            ..ServerConfig::default()
        };

        let mut engine = GameEngine::new(config, None);
        assert!(engine.initialize());
        engine
    }

    #[test]
    fn test_update_add_and_remove_players() {
        let mut engine = test_engine();

        {
            let mut queue = engine.inbound.lock();
            queue.push(NetworkMessage::connection(1, MessageKind::NewConnection));
            queue.push(NetworkMessage::connection(2, MessageKind::NewConnection));
            queue.push(NetworkMessage::data(1, MessageKind::DataIncoming, b"look\n".to_vec()));
            queue.push(NetworkMessage::connection(2, MessageKind::Disconnection));
        }

        engine.update();

        assert_eq!(engine.num_players(), 1);
        assert!(engine.data.player_by_cid(1).is_some());
        assert!(engine.data.player_by_cid(2).is_none());
        assert!(engine.inbound.is_empty());
    }

    #[test]
    fn test_update_rejects_duplicate_connection() {
        let mut engine = test_engine();

        engine
            .inbound
            .push(NetworkMessage::connection(1, MessageKind::NewConnection));
        engine
            .inbound
            .push(NetworkMessage::connection(1, MessageKind::NewConnection));

        engine.update();

        assert_eq!(engine.num_players(), 1);
    }

    #[test]
    fn test_update_consumes_invariant_violations() {
        let mut engine = test_engine();

        engine
            .inbound
            .push(NetworkMessage::data(1, MessageKind::DataOutgoing, b"x".to_vec()));
        engine
            .inbound
            .push(NetworkMessage::data(1, MessageKind::DnsLookup, b"127.0.0.1".to_vec()));

        engine.update();

        assert_eq!(engine.num_players(), 0);
        assert!(engine.inbound.is_empty());
    }

    #[test]
    fn test_run_requires_boot() {
        let mut engine = test_engine();

        assert_eq!(engine.run(), 0);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_run_executes_limited_cycles() {
        let mut engine = booted_engine(Some(2));

        let started = Instant::now();
        assert_eq!(engine.run(), 0);

        assert_eq!(engine.cycle_count(), 2);
        assert!(started.elapsed() >= CYCLE_LENGTH);
        assert!(!engine.is_booted());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_stop_flag_breaks_run() {
        let mut engine = booted_engine(None);

        let stop = engine.stop_handle();
        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            stop.store(true, Ordering::Relaxed);
        });

        assert_eq!(engine.run(), 0);
        trigger.join().unwrap();

        assert!(engine.cycle_count() < 100);
        assert_eq!(engine.network().num_connections(), 0);
        assert!(!engine.is_booted());
    }
}
