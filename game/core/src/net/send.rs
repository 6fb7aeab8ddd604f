use crate::net::engine::NetworkShared;
use cinder::logging::{self, Logger};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Drains the outbound message queue and finalizes disconnections handed
/// over by the other workers. This is the only worker that keeps running
/// through the first shutdown phase, so late disconnections still get their
/// sockets closed; it exits on the terminate flag after a final drain.
pub struct SendWorker {
    name: String,
    shared: Arc<NetworkShared>,
    log: Logger,
}

impl SendWorker {
    const SLEEP: Duration = Duration::from_millis(750);

    pub fn new(name: &str, shared: Arc<NetworkShared>) -> SendWorker {
        let log = shared.log().new(logging::o!("worker" => name.to_owned()));

        logging::debug!(log, "send worker created"; "context" => "new");

        SendWorker {
            name: name.to_owned(),
            shared,
            log,
        }
    }

    /// Moves the worker onto its own named thread.
    pub fn run(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || self.exec())
    }

    fn exec(self) {
        logging::info!(self.log, "starting"; "context" => "exec");

        loop {
            // Sampling the flag before draining guarantees one full pass
            // after terminate is raised.
            let terminating = self.shared.is_terminate();

            self.finalize_disconnections();
            self.drain_outbound();

            if terminating {
                break;
            }

            thread::sleep(Self::SLEEP);
        }

        logging::info!(self.log, "terminating"; "context" => "exec");
    }

    /// Closes and destroys every record parked on the remove-socket queue.
    fn finalize_disconnections(&self) {
        if self.shared.remove_sockets().is_empty() {
            return;
        }

        logging::debug!(self.log, "fetching removed connections"; "context" => "finalize_disconnections");

        let mut removed = 0;
        let mut queue = self.shared.remove_sockets().lock();

        while let Some(record) = queue.pop() {
            logging::info!(self.log, "socket closed";
                           "context" => "finalize_disconnections",
                           "cid" => record.cid,
                           "rx_bytes" => record.rx,
                           "tx_bytes" => record.tx);

            record.shutdown();
            removed += 1;
        }

        drop(queue);

        logging::debug!(self.log, "connections removed";
                        "context" => "finalize_disconnections",
                        "removed" => removed);
    }

    /// Consumes queued outbound messages. No transmit path owns the sockets
    /// (they stay with their receive workers), so the messages are reported
    /// and destroyed.
    fn drain_outbound(&self) {
        if self.shared.outbound().is_empty() {
            return;
        }

        let mut queue = self.shared.outbound().lock();

        while let Some(message) = queue.pop() {
            logging::debug!(self.log, "discarding outbound message";
                            "context" => "drain_outbound",
                            "cid" => message.cid,
                            "bytes" => message.len());
        }
    }
}
