use crate::config::ServerConfig;
use crate::net::accept::AcceptWorker;
use crate::net::message::{MessageKind, NetworkMessage};
use crate::net::recv::RecvWorker;
use crate::net::send::SendWorker;
use crate::net::shared::{CidAllocator, ConnectionId, NetStats, SOCKETS_PER_WORKER_HIGH};
use crate::net::socket::{SocketFamily, SocketRecord};
use crate::net::{MessageQueue, SocketQueue};
use cinder::logging::{self, Logger};
use mio::net::TcpStream;
use nix::sys::resource::{getrlimit, Resource};
use std::cmp;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

const FD_SETSIZE: usize = 1024;
/// Descriptors held back for everything that is not a player connection.
const FD_RESERVE: usize = 32;
const FD_FLOOR: usize = FD_SETSIZE - 8;

/// True when the receive fleet is close enough to capacity that another
/// worker should be spawned before connections start queueing.
#[inline]
pub(crate) fn recv_fleet_saturated(users_current: usize, recv_workers: usize) -> bool {
    users_current > recv_workers * SOCKETS_PER_WORKER_HIGH
}

/// Connection ceiling supported by the host, from the open-files limit.
fn derived_connection_limit(log: &Logger) -> usize {
    let system_max = match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, _hard)) => soft as usize,
        Err(err) => {
            logging::warn!(log, "open-files limit unavailable, assuming the select set size";
                           "context" => "derived_connection_limit",
                           "error" => %err);
            FD_SETSIZE
        }
    };

    cmp::max(system_max.saturating_sub(FD_RESERVE), FD_FLOOR)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum WorkerKind {
    Accept,
    Recv,
    Send,
}

/// State shared by the facade and every network worker: queues, counters,
/// the id source and the two-phase shutdown flags.
pub struct NetworkShared {
    shutdown: AtomicBool,
    terminate: AtomicBool,
    strict_bind: AtomicBool,
    use_dns_lookup: AtomicBool,

    cids: CidAllocator,

    users_total: AtomicU32,
    users_current: AtomicU32,
    users_peak: AtomicU32,
    max_connections_total: AtomicUsize,

    stats: NetStats,

    inbound: Arc<MessageQueue>,
    outbound: MessageQueue,
    new_sockets: SocketQueue,
    remove_sockets: SocketQueue,

    accept_workers: AtomicU32,
    recv_workers: AtomicU32,
    send_workers: AtomicU32,
    handles: Mutex<Vec<(WorkerKind, JoinHandle<()>)>>,

    log: Logger,
}

impl NetworkShared {
    fn new(inbound: Arc<MessageQueue>, log: Logger) -> NetworkShared {
        NetworkShared {
            shutdown: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            strict_bind: AtomicBool::new(false),
            use_dns_lookup: AtomicBool::new(false),
            cids: CidAllocator::new(),
            users_total: AtomicU32::new(0),
            users_current: AtomicU32::new(0),
            users_peak: AtomicU32::new(0),
            max_connections_total: AtomicUsize::new(0),
            stats: NetStats::new(),
            inbound,
            outbound: MessageQueue::new(),
            new_sockets: SocketQueue::new(),
            remove_sockets: SocketQueue::new(),
            accept_workers: AtomicU32::new(0),
            recv_workers: AtomicU32::new(0),
            send_workers: AtomicU32::new(0),
            handles: Mutex::new(Vec::new()),
            log,
        }
    }

    #[inline]
    pub fn log(&self) -> &Logger {
        &self.log
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_terminate(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn strict_bind(&self) -> bool {
        self.strict_bind.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn use_dns_lookup(&self) -> bool {
        self.use_dns_lookup.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    #[inline]
    pub fn users_current(&self) -> usize {
        self.users_current.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn max_connections_total(&self) -> usize {
        self.max_connections_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn new_sockets(&self) -> &SocketQueue {
        &self.new_sockets
    }

    #[inline]
    pub fn remove_sockets(&self) -> &SocketQueue {
        &self.remove_sockets
    }

    #[inline]
    pub fn outbound(&self) -> &MessageQueue {
        &self.outbound
    }

    #[inline]
    pub fn push_inbound(&self, message: NetworkMessage) {
        self.inbound.push(message);
    }

    /// Registers a freshly accepted stream: allocates a connection id,
    /// emits the `NewConnection` event, parks the record for a receive
    /// worker and updates the user counters. Returns `None` (dropping and
    /// thereby closing the stream) when the id space is exhausted.
    pub fn add_new_connection(&self, stream: TcpStream, peer: SocketAddr) -> Option<ConnectionId> {
        let cid = match self.cids.allocate() {
            Some(cid) => cid,
            None => {
                logging::error!(self.log, "connection id space exhausted, dropping connection";
                                "context" => "add_new_connection",
                                "peer" => %peer);
                return None;
            }
        };

        // The event precedes the record hand-off so the game loop learns
        // about the connection before any of its data.
        self.push_inbound(NetworkMessage::connection(cid, MessageKind::NewConnection));
        self.new_sockets.push(SocketRecord::new(cid, stream));

        self.users_total.fetch_add(1, Ordering::Relaxed);
        let current = self.users_current.fetch_add(1, Ordering::Relaxed) + 1;
        self.users_peak.fetch_max(current, Ordering::Relaxed);

        logging::debug!(self.log, "socket connected";
                        "context" => "add_new_connection",
                        "cid" => cid,
                        "peer" => %peer,
                        "users_current" => current);

        Some(cid)
    }

    /// Takes a record out of circulation: emits the `Disconnection` event
    /// and parks the record for the cleanup worker, which owns the actual
    /// close.
    pub fn disconnect_connection(&self, record: SocketRecord) {
        logging::info!(self.log, "socket disconnected";
                       "context" => "disconnect_connection",
                       "cid" => record.cid,
                       "rx_bytes" => record.rx,
                       "tx_bytes" => record.tx);

        self.push_inbound(NetworkMessage::connection(record.cid, MessageKind::Disconnection));
        self.users_current.fetch_sub(1, Ordering::Relaxed);
        self.remove_sockets.push(record);
    }

    #[inline]
    pub fn needs_recv_worker(&self) -> bool {
        recv_fleet_saturated(
            self.users_current(),
            self.recv_workers.load(Ordering::Relaxed) as usize,
        )
    }

    /// Spawns another receive worker. Called at initialization and by
    /// receive workers observing fleet saturation.
    pub fn spawn_recv_worker(shared: &Arc<NetworkShared>) -> bool {
        if shared.is_shutdown() {
            return false;
        }

        let name = format!("Recv{}", shared.recv_workers.load(Ordering::Relaxed) + 1);

        let worker = match RecvWorker::new(&name, Arc::clone(shared)) {
            Ok(worker) => worker,
            Err(err) => {
                logging::error!(shared.log, "failed to create receive worker";
                                "context" => "spawn_recv_worker",
                                "name" => &name,
                                "error" => ?err);
                return false;
            }
        };

        match worker.run() {
            Ok(handle) => {
                shared.recv_workers.fetch_add(1, Ordering::Relaxed);
                shared.register_worker(WorkerKind::Recv, handle);
                logging::info!(shared.log, "spawned receive worker";
                               "context" => "spawn_recv_worker",
                               "name" => &name);
                true
            }
            Err(err) => {
                logging::error!(shared.log, "failed to run receive worker";
                                "context" => "spawn_recv_worker",
                                "name" => &name,
                                "error" => %err);
                false
            }
        }
    }

    fn spawn_accept_worker(
        shared: &Arc<NetworkShared>,
        name: &str,
        family: SocketFamily,
        host: Option<&str>,
        port: u16,
    ) -> bool {
        let worker = match AcceptWorker::new(name, family, host, port, Arc::clone(shared)) {
            Ok(worker) => worker,
            Err(err) => {
                logging::error!(shared.log, "failed to create accept worker";
                                "context" => "spawn_accept_worker",
                                "name" => name,
                                "error" => ?err);
                return false;
            }
        };

        match worker.run() {
            Ok(handle) => {
                shared.accept_workers.fetch_add(1, Ordering::Relaxed);
                shared.register_worker(WorkerKind::Accept, handle);
                logging::info!(shared.log, "spawned accept worker";
                               "context" => "spawn_accept_worker",
                               "name" => name,
                               "host" => host.unwrap_or("<unspecified>"),
                               "port" => port);
                true
            }
            Err(err) => {
                logging::error!(shared.log, "failed to run accept worker";
                                "context" => "spawn_accept_worker",
                                "name" => name,
                                "error" => %err);
                false
            }
        }
    }

    fn spawn_send_worker(shared: &Arc<NetworkShared>, name: &str) -> bool {
        let worker = SendWorker::new(name, Arc::clone(shared));

        match worker.run() {
            Ok(handle) => {
                shared.send_workers.fetch_add(1, Ordering::Relaxed);
                shared.register_worker(WorkerKind::Send, handle);
                logging::info!(shared.log, "spawned send worker";
                               "context" => "spawn_send_worker",
                               "name" => name);
                true
            }
            Err(err) => {
                logging::error!(shared.log, "failed to run send worker";
                                "context" => "spawn_send_worker",
                                "name" => name,
                                "error" => %err);
                false
            }
        }
    }

    fn register_worker(&self, kind: WorkerKind, handle: JoinHandle<()>) {
        let mut handles = match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        handles.push((kind, handle));
    }

    /// Joins every worker of the given kinds, leaving the rest registered.
    fn join_workers(&self, kinds: &[WorkerKind]) {
        let joinable = {
            let mut handles = match self.handles.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            let mut joinable = Vec::new();
            let mut keep = Vec::new();

            for entry in mem::replace(&mut *handles, Vec::new()) {
                if kinds.contains(&entry.0) {
                    joinable.push(entry);
                } else {
                    keep.push(entry);
                }
            }

            *handles = keep;
            joinable
        };

        for (kind, handle) in joinable {
            if handle.join().is_err() {
                logging::error!(self.log, "worker thread panicked";
                                "context" => "join_workers",
                                "kind" => ?kind);
            }
        }
    }
}

/// Facade over the network pipeline: owns the shared state, spawns and
/// joins the workers, and exposes the counters.
pub struct NetworkEngine {
    shared: Arc<NetworkShared>,
}

impl NetworkEngine {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(inbound: Arc<MessageQueue>, log: L) -> NetworkEngine {
        let log = logging::child_or_discard(log);

        NetworkEngine {
            shared: Arc::new(NetworkShared::new(inbound, log)),
        }
    }

    /// Brings the pipeline up: derives the connection ceiling and spawns
    /// the accept, receive and send workers. Failure to start any category
    /// tears everything down again.
    pub fn initialize(&self, config: &ServerConfig) -> bool {
        let shared = &self.shared;
        let log = &shared.log;

        logging::debug!(log, "initializing network engine";
                        "context" => "initialize",
                        "port" => config.port,
                        "ipv4" => config.ipv4.as_deref().unwrap_or("<none>"),
                        "ipv6" => config.ipv6.as_deref().unwrap_or("<none>"));

        if config.port == 0 {
            logging::error!(log, "refusing to listen on a random port"; "context" => "initialize");
            return false;
        }

        if config.port < 1024 {
            logging::warn!(log, "using a reserved port";
                           "context" => "initialize",
                           "port" => config.port);
        }

        let max_total = cmp::min(config.max_connections, derived_connection_limit(log));
        shared.max_connections_total.store(max_total, Ordering::Relaxed);
        shared
            .strict_bind
            .store(config.strict_bind, Ordering::Relaxed);
        shared
            .use_dns_lookup
            .store(config.use_dns_lookup, Ordering::Relaxed);

        logging::info!(log, "connection ceiling decided";
                       "context" => "initialize",
                       "max_connections" => max_total);

        if let Some(host) = config.ipv4.as_deref() {
            NetworkShared::spawn_accept_worker(shared, "IPv4", SocketFamily::Ipv4, Some(host), config.port);
        }
        if let Some(host) = config.ipv6.as_deref() {
            NetworkShared::spawn_accept_worker(shared, "IPv6", SocketFamily::Ipv6, Some(host), config.port);
        }
        if shared.accept_workers.load(Ordering::Relaxed) == 0 {
            logging::error!(log, "failed to start any accept workers, aborting"; "context" => "initialize");
            self.close();
            return false;
        }

        NetworkShared::spawn_recv_worker(shared);
        if shared.recv_workers.load(Ordering::Relaxed) == 0 {
            logging::error!(log, "failed to start any receive workers, aborting"; "context" => "initialize");
            self.close();
            return false;
        }

        NetworkShared::spawn_send_worker(shared, "Send1");
        if shared.send_workers.load(Ordering::Relaxed) == 0 {
            logging::error!(log, "failed to start any send workers, aborting"; "context" => "initialize");
            self.close();
            return false;
        }

        self.log_status();
        true
    }

    /// Two-phase shutdown. Phase one stops the accept and receive workers,
    /// whose exit pushes any still-open connections onto the remove queue;
    /// phase two lets the send workers finish that cleanup and exit.
    pub fn close(&self) -> bool {
        let shared = &self.shared;

        logging::info!(shared.log, "closing network engine"; "context" => "close");

        shared.shutdown.store(true, Ordering::Relaxed);
        shared.join_workers(&[WorkerKind::Accept, WorkerKind::Recv]);

        // Anything admitted after the receive workers drained their last
        // batch still owes its disconnection.
        loop {
            let record = shared.new_sockets.lock().pop();

            match record {
                Some(record) => shared.disconnect_connection(record),
                None => break,
            }
        }

        shared.terminate.store(true, Ordering::Relaxed);
        shared.join_workers(&[WorkerKind::Send]);

        self.log_status();
        true
    }

    /// Queues an outbound message for the send worker.
    #[inline]
    pub fn queue_send_message(&self, message: NetworkMessage) {
        self.shared.outbound.push(message);
    }

    #[inline]
    pub fn num_connections(&self) -> usize {
        self.shared.users_current()
    }

    #[inline]
    pub fn peak_connections(&self) -> usize {
        self.shared.users_peak.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn total_connections(&self) -> usize {
        self.shared.users_total.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn max_connections_total(&self) -> usize {
        self.shared.max_connections_total()
    }

    #[inline]
    pub fn bytes_recv(&self) -> u64 {
        self.shared.stats.rx_bytes()
    }

    #[inline]
    pub fn bytes_send(&self) -> u64 {
        self.shared.stats.tx_bytes()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_connections() == 0
    }

    pub fn log_status(&self) {
        let shared = &self.shared;

        logging::info!(shared.log, "network status";
                       "users_current" => shared.users_current.load(Ordering::Relaxed),
                       "users_peak" => shared.users_peak.load(Ordering::Relaxed),
                       "users_total" => shared.users_total.load(Ordering::Relaxed),
                       "new_queue" => shared.new_sockets.len(),
                       "remove_queue" => shared.remove_sockets.len(),
                       "rx_bytes" => shared.stats.rx_bytes(),
                       "tx_bytes" => shared.stats.tx_bytes(),
                       "workers_accept" => shared.accept_workers.load(Ordering::Relaxed),
                       "workers_recv" => shared.recv_workers.load(Ordering::Relaxed),
                       "workers_send" => shared.send_workers.load(Ordering::Relaxed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdTcpStream;
    use std::thread;
    use std::time::{Duration, Instant};

    const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

    fn test_logger() -> Logger {
        Logger::root(logging::Discard, logging::o!())
    }

    /// Grabs an ephemeral port that is free at the time of the call.
    fn reserve_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn test_config(port: u16, max_connections: usize, ipv6: bool) -> ServerConfig {
        ServerConfig {
            port,
            ipv4: Some("127.0.0.1".to_owned()),
            ipv6: if ipv6 { Some("::1".to_owned()) } else { None },
            max_connections,
            ..ServerConfig::default()
        }
    }

    fn start_engine(max_connections: usize, ipv6: bool) -> (NetworkEngine, Arc<MessageQueue>, u16) {
        let log = test_logger();
        let inbound = Arc::new(MessageQueue::new());
        let engine = NetworkEngine::new(Arc::clone(&inbound), &log);

        let port = reserve_port();
        assert!(engine.initialize(&test_config(port, max_connections, ipv6)));

        (engine, inbound, port)
    }

    /// Moves inbound messages into `seen` until the predicate holds or the
    /// timeout passes. Returns whether the predicate was satisfied.
    fn drain_until<F>(inbound: &MessageQueue, seen: &mut Vec<NetworkMessage>, pred: F) -> bool
    where
        F: Fn(&[NetworkMessage]) -> bool,
    {
        let deadline = Instant::now() + WAIT_TIMEOUT;

        loop {
            {
                let mut guard = inbound.lock();
                while let Some(message) = guard.pop() {
                    seen.push(message);
                }
            }

            if pred(seen) {
                return true;
            }

            if Instant::now() >= deadline {
                return false;
            }

            thread::sleep(Duration::from_millis(25));
        }
    }

    fn count_kind(seen: &[NetworkMessage], kind: MessageKind) -> usize {
        seen.iter().filter(|message| message.kind == kind).count()
    }

    fn connect(port: u16) -> StdTcpStream {
        StdTcpStream::connect(("127.0.0.1", port)).unwrap()
    }

    #[test]
    fn test_recv_fleet_saturated() {
        assert!(!recv_fleet_saturated(0, 1));
        assert!(!recv_fleet_saturated(SOCKETS_PER_WORKER_HIGH, 1));
        assert!(recv_fleet_saturated(SOCKETS_PER_WORKER_HIGH + 1, 1));
        assert!(!recv_fleet_saturated(SOCKETS_PER_WORKER_HIGH + 1, 2));
        assert!(recv_fleet_saturated(2 * SOCKETS_PER_WORKER_HIGH + 1, 2));
    }

    #[test]
    fn test_derived_connection_limit_floor() {
        assert!(derived_connection_limit(&test_logger()) >= FD_FLOOR);
    }

    #[test]
    fn test_initialize_rejects_port_zero() {
        let log = test_logger();
        let inbound = Arc::new(MessageQueue::new());
        let engine = NetworkEngine::new(Arc::clone(&inbound), &log);

        assert!(!engine.initialize(&test_config(0, 16, false)));
    }

    #[test]
    fn test_connect_data_disconnect_roundtrip() {
        let (engine, inbound, port) = start_engine(16, false);
        let mut seen = Vec::new();

        let mut client = connect(port);

        assert!(drain_until(&inbound, &mut seen, |seen| {
            count_kind(seen, MessageKind::NewConnection) == 1
        }));
        assert_eq!(seen[0].kind, MessageKind::NewConnection);
        assert_eq!(seen[0].cid, 1);
        assert_eq!(engine.num_connections(), 1);
        assert_eq!(engine.total_connections(), 1);
        assert_eq!(engine.peak_connections(), 1);

        client.write_all(b"HELLO\n").unwrap();

        assert!(drain_until(&inbound, &mut seen, |seen| {
            seen.iter()
                .filter(|message| message.kind == MessageKind::DataIncoming)
                .map(NetworkMessage::len)
                .sum::<usize>()
                == 6
        }));

        let payload: Vec<u8> = seen
            .iter()
            .filter(|message| message.kind == MessageKind::DataIncoming)
            .inspect(|message| assert_eq!(message.cid, 1))
            .flat_map(|message| message.data.iter().copied())
            .collect();
        assert_eq!(&payload[..], b"HELLO\n");
        assert_eq!(engine.bytes_recv(), 6);

        drop(client);

        assert!(drain_until(&inbound, &mut seen, |seen| {
            count_kind(seen, MessageKind::Disconnection) == 1
        }));

        let gone = seen
            .iter()
            .find(|message| message.kind == MessageKind::Disconnection)
            .unwrap();
        assert_eq!(gone.cid, 1);
        assert_eq!(engine.num_connections(), 0);
        assert_eq!(engine.total_connections(), 1);

        engine.close();
    }

    #[test]
    fn test_split_payload_aggregates_to_sent_bytes() {
        let (engine, inbound, port) = start_engine(16, false);
        let mut seen = Vec::new();

        let mut client = connect(port);

        assert!(drain_until(&inbound, &mut seen, |seen| {
            count_kind(seen, MessageKind::NewConnection) == 1
        }));

        // An arbitrary split; the receiver may see any number of reads.
        client.write_all(b"HEL").unwrap();
        thread::sleep(Duration::from_millis(50));
        client.write_all(b"LO\n").unwrap();

        assert!(drain_until(&inbound, &mut seen, |seen| {
            seen.iter()
                .filter(|message| message.kind == MessageKind::DataIncoming)
                .map(NetworkMessage::len)
                .sum::<usize>()
                == 6
        }));

        let payload: Vec<u8> = seen
            .iter()
            .filter(|message| message.kind == MessageKind::DataIncoming)
            .flat_map(|message| message.data.iter().copied())
            .collect();
        assert_eq!(&payload[..], b"HELLO\n");
        assert_eq!(engine.bytes_recv(), 6);

        engine.close();
    }

    #[test]
    fn test_admission_limit_closes_without_events() {
        let (engine, inbound, port) = start_engine(1, false);
        let mut seen = Vec::new();

        let _admitted = connect(port);

        assert!(drain_until(&inbound, &mut seen, |seen| {
            count_kind(seen, MessageKind::NewConnection) == 1
        }));

        let mut rejected = connect(port);
        rejected
            .set_read_timeout(Some(WAIT_TIMEOUT))
            .unwrap();

        // The server closes the over-limit socket without reading from it.
        let mut buf = [0u8; 16];
        match rejected.read(&mut buf) {
            Ok(0) => {}
            Err(ref err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
                ) => {}
            other => panic!("Expected the peer to close, got {:?}", other),
        }

        // No second admission happened anywhere.
        assert_eq!(engine.total_connections(), 1);
        assert_eq!(engine.num_connections(), 1);
        thread::sleep(Duration::from_millis(250));
        drain_until(&inbound, &mut seen, |_| true);
        assert_eq!(count_kind(&seen, MessageKind::NewConnection), 1);
        assert_eq!(count_kind(&seen, MessageKind::Disconnection), 0);

        engine.close();
    }

    #[test]
    fn test_dual_stack_distinct_connection_ids() {
        let (engine, inbound, port) = start_engine(16, true);
        let mut seen = Vec::new();

        let _v4 = connect(port);
        let _v6 = StdTcpStream::connect(("::1", port)).unwrap();

        assert!(drain_until(&inbound, &mut seen, |seen| {
            count_kind(seen, MessageKind::NewConnection) == 2
        }));

        let cids: Vec<ConnectionId> = seen
            .iter()
            .filter(|message| message.kind == MessageKind::NewConnection)
            .map(|message| message.cid)
            .collect();
        assert_eq!(cids.len(), 2);
        assert_ne!(cids[0], cids[1]);
        assert_eq!(engine.num_connections(), 2);

        engine.close();
    }

    #[test]
    fn test_close_autocloses_open_connections() {
        let (engine, inbound, port) = start_engine(16, false);
        let mut seen = Vec::new();

        let _clients: Vec<StdTcpStream> = (0..3).map(|_| connect(port)).collect();

        assert!(drain_until(&inbound, &mut seen, |seen| {
            count_kind(seen, MessageKind::NewConnection) == 3
        }));
        assert_eq!(engine.num_connections(), 3);

        engine.close();

        // The receive worker pushed a disconnection per owned socket on its
        // way out; close() joined it, so the events are already queued.
        drain_until(&inbound, &mut seen, |seen| {
            count_kind(seen, MessageKind::Disconnection) == 3
        });
        assert_eq!(count_kind(&seen, MessageKind::Disconnection), 3);
        assert_eq!(engine.num_connections(), 0);

        let mut cids: Vec<ConnectionId> = seen
            .iter()
            .filter(|message| message.kind == MessageKind::NewConnection)
            .map(|message| message.cid)
            .collect();
        cids.sort_unstable();
        assert_eq!(cids, vec![1, 2, 3]);
    }
}
