use crate::net::engine::NetworkShared;
use crate::net::message::{MessageKind, NetworkMessage};
use crate::net::shared::{
    NetworkError, NetworkResult, MAX_MESSAGE_SIZE, MAX_SOCKETS_PER_WORKER, READ_CHUNK_SIZE,
};
use crate::net::socket::SocketRecord;
use cinder::logging::{self, Logger};
use indexmap::IndexSet;
use mio::unix::UnixReady;
use mio::{Events, Poll, PollOpt, Ready, Token};
use std::cmp;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Multiplexes reads across up to [`MAX_SOCKETS_PER_WORKER`] owned sockets.
/// Records live in a slot table whose indices double as poll tokens; freed
/// slots are recycled through the free list.
pub struct RecvWorker {
    name: String,
    shared: Arc<NetworkShared>,
    poll: Poll,
    events: Events,
    slots: Vec<Option<SocketRecord>>,
    free: Vec<usize>,
    live: IndexSet<usize>,
    scratch: Vec<u8>,
    log: Logger,
}

impl RecvWorker {
    const POLL_TIMEOUT: Duration = Duration::from_millis(500);
    const IDLE_SLEEP: Duration = Duration::from_secs(1);

    pub fn new(name: &str, shared: Arc<NetworkShared>) -> NetworkResult<RecvWorker> {
        let log = shared.log().new(logging::o!("worker" => name.to_owned()));

        let poll = Poll::new()?;

        logging::debug!(log, "receive worker created"; "context" => "new");

        Ok(RecvWorker {
            name: name.to_owned(),
            shared,
            poll,
            events: Events::with_capacity(MAX_SOCKETS_PER_WORKER),
            slots: Vec::new(),
            free: Vec::new(),
            live: IndexSet::new(),
            scratch: vec![0u8; READ_CHUNK_SIZE],
            log,
        })
    }

    /// Moves the worker onto its own named thread.
    pub fn run(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || self.exec())
    }

    fn exec(mut self) {
        logging::info!(self.log, "starting"; "context" => "exec");

        while !self.shared.is_shutdown() {
            if self.live.len() < MAX_SOCKETS_PER_WORKER && !self.shared.new_sockets().is_empty() {
                self.adopt_new_connections();
            }

            if self.live.is_empty() {
                thread::sleep(Self::IDLE_SLEEP);
                continue;
            }

            match self.poll.poll(&mut self.events, Some(Self::POLL_TIMEOUT)) {
                Ok(_) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    logging::error!(self.log, "readiness poll failed, worker exiting";
                                    "context" => "exec",
                                    "error" => %err);
                    break;
                }
            }

            self.dispatch_events();
        }

        self.close_all();
        self.drain_unadopted();

        logging::info!(self.log, "terminating"; "context" => "exec");
    }

    /// Connections admitted but never adopted by any worker still owe their
    /// disconnection; on the way out they are pulled straight off the
    /// new-socket queue. One queue lock is held at a time.
    fn drain_unadopted(&self) {
        loop {
            let record = self.shared.new_sockets().lock().pop();

            match record {
                Some(record) => self.shared.disconnect_connection(record),
                None => break,
            }
        }
    }

    /// Drains as many pending records from the new-socket queue as fit,
    /// then checks whether the fleet needs another worker.
    fn adopt_new_connections(&mut self) {
        let owned_before = self.live.len();

        while self.live.len() < MAX_SOCKETS_PER_WORKER {
            let record = self.shared.new_sockets().lock().pop();

            match record {
                Some(record) => self.adopt(record),
                None => break,
            }
        }

        logging::debug!(self.log, "connections transferred";
                        "context" => "adopt_new_connections",
                        "transferred" => self.live.len() - owned_before,
                        "owned" => self.live.len(),
                        "capacity" => MAX_SOCKETS_PER_WORKER);

        if self.shared.needs_recv_worker() {
            NetworkShared::spawn_recv_worker(&self.shared);
        }
    }

    fn adopt(&mut self, record: SocketRecord) {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        match self
            .poll
            .register(record.stream(), Token(slot), Ready::readable(), PollOpt::level())
        {
            Ok(()) => {
                logging::debug!(self.log, "socket adopted";
                                "context" => "adopt",
                                "cid" => record.cid,
                                "slot" => slot);
                self.slots[slot] = Some(record);
                self.live.insert(slot);
            }
            Err(err) => {
                logging::error!(self.log, "poll registration failed, disconnecting";
                                "context" => "adopt",
                                "cid" => record.cid,
                                "error" => %err);
                self.free.push(slot);
                self.shared.disconnect_connection(record);
            }
        }
    }

    fn dispatch_events(&mut self) {
        let ready: Vec<(usize, Ready)> = self
            .events
            .iter()
            .map(|event| (usize::from(event.token()), event.readiness()))
            .collect();

        for (slot, readiness) in ready {
            let mut drop_record = false;

            if let Some(record) = self.slots.get_mut(slot).and_then(Option::as_mut) {
                let unix = UnixReady::from(readiness);

                if unix.is_error() || unix.is_hup() {
                    logging::debug!(self.log, "socket error or hangup";
                                    "context" => "dispatch_events",
                                    "cid" => record.cid);
                    drop_record = true;
                } else if readiness.is_readable() || unix.is_priority() {
                    drop_record =
                        Self::read_ready(record, &mut self.scratch, &self.shared, &self.log)
                            .is_err();
                }
            }

            if drop_record {
                self.disconnect_slot(slot);
            }
        }
    }

    /// One read per readiness event. Anything longer than the largest
    /// message payload is truncated; level-triggered polling redelivers the
    /// remainder on the next pass.
    fn read_ready(
        record: &mut SocketRecord,
        scratch: &mut [u8],
        shared: &NetworkShared,
        log: &Logger,
    ) -> NetworkResult<()> {
        match record.receive(scratch, shared.stats()) {
            Ok(count) => {
                let size = cmp::min(count, MAX_MESSAGE_SIZE);

                if size < count {
                    logging::warn!(log, "read truncated to the message size limit";
                                   "context" => "read_ready",
                                   "cid" => record.cid,
                                   "read" => count,
                                   "kept" => size);
                }

                logging::trace!(log, "data received";
                                "context" => "read_ready",
                                "cid" => record.cid,
                                "bytes" => size);

                shared.push_inbound(NetworkMessage::data(
                    record.cid,
                    MessageKind::DataIncoming,
                    scratch[..size].to_vec(),
                ));

                Ok(())
            }
            Err(NetworkError::Wait) => Ok(()),
            Err(err) => {
                logging::debug!(log, "read failed, disconnecting";
                                "context" => "read_ready",
                                "cid" => record.cid,
                                "error" => ?err);
                Err(err)
            }
        }
    }

    fn disconnect_slot(&mut self, slot: usize) {
        if let Some(record) = self.slots[slot].take() {
            if let Err(err) = self.poll.deregister(record.stream()) {
                logging::warn!(self.log, "poll deregistration failed";
                               "context" => "disconnect_slot",
                               "cid" => record.cid,
                               "error" => %err);
            }

            self.live.remove(&slot);
            self.free.push(slot);
            self.shared.disconnect_connection(record);
        }
    }

    /// Auto-close of every owned socket on the way out.
    fn close_all(&mut self) {
        if self.live.is_empty() {
            return;
        }

        logging::debug!(self.log, "autoclosing owned connections";
                        "context" => "close_all",
                        "owned" => self.live.len());

        let slots: Vec<usize> = self.live.iter().copied().collect();
        for slot in slots {
            self.disconnect_slot(slot);
        }
    }
}
