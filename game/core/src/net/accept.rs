use crate::net::engine::NetworkShared;
use crate::net::message::{MessageKind, NetworkMessage};
use crate::net::socket::{self, AcceptError, SocketFamily};
use crate::net::shared::NetworkResult;
use cinder::logging::{self, Logger};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, PollOpt, Ready, Token};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Owns one listening socket and feeds freshly accepted connections into
/// the engine. One accept worker runs per configured address family.
pub struct AcceptWorker {
    name: String,
    listener: TcpListener,
    poll: Poll,
    events: Events,
    shared: Arc<NetworkShared>,
    log: Logger,
}

impl AcceptWorker {
    const LISTENER_TOKEN: Token = Token(0);
    const POLL_TIMEOUT: Duration = Duration::from_millis(500);

    /// Sets up the listening socket. Construction fails if the socket cannot
    /// be bound, and the worker is never started in that case.
    pub fn new(
        name: &str,
        family: SocketFamily,
        host: Option<&str>,
        port: u16,
        shared: Arc<NetworkShared>,
    ) -> NetworkResult<AcceptWorker> {
        let log = shared.log().new(logging::o!("worker" => name.to_owned()));

        let listener = socket::setup_listener(family, host, port, shared.strict_bind(), &log)?;

        let poll = Poll::new()?;
        poll.register(
            &listener,
            Self::LISTENER_TOKEN,
            Ready::readable(),
            PollOpt::level(),
        )?;

        logging::debug!(log, "accept worker created"; "context" => "new");

        Ok(AcceptWorker {
            name: name.to_owned(),
            listener,
            poll,
            events: Events::with_capacity(8),
            shared,
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

        // The poll timeout doubles as the shutdown observation interval; a
        // blocking accept would never see the flag.
        while !self.shared.is_shutdown() {
            match self.poll.poll(&mut self.events, Some(Self::POLL_TIMEOUT)) {
                Ok(_) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    logging::error!(self.log, "listener poll failed";
                                    "context" => "exec",
                                    "error" => %err);
                    break;
                }
            }

            if !self.accept_pending() {
                break;
            }
        }

        logging::info!(self.log, "terminating"; "context" => "exec");
    }

    /// Accepts queued connections until the listener would block. Returns
    /// false when the worker hit a fatal accept error and must exit.
    fn accept_pending(&mut self) -> bool {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return true,
                Err(err) => match socket::classify_accept_error(&err) {
                    AcceptError::Transient => {
                        logging::debug!(self.log, "transient accept error";
                                        "context" => "accept_pending",
                                        "error" => %err);
                        return true;
                    }
                    AcceptError::Fatal => {
                        logging::error!(self.log, "fatal accept error, worker exiting";
                                        "context" => "accept_pending",
                                        "error" => %err);
                        return false;
                    }
                },
            }
        }
    }

    /// Admission control plus registration of an accepted stream. Rejected
    /// sockets are closed on the spot and produce no events and no counter
    /// changes.
    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        self.shared.stats().bump_accepted();

        if self.shared.users_current() >= self.shared.max_connections_total() {
            logging::info!(self.log, "max connection limit reached, dropping connection";
                           "context" => "admit",
                           "peer" => %peer);
            return;
        }

        socket::apply_stream_options(&stream, &self.log);

        let peer_text = peer.to_string();

        match self.shared.add_new_connection(stream, peer) {
            Some(cid) => {
                logging::debug!(self.log, "connection admitted";
                                "context" => "admit",
                                "cid" => cid,
                                "peer" => &peer_text);

                // Reverse lookups are off by default; with the flag on, the
                // numeric peer address is reported as the lookup result.
                if self.shared.use_dns_lookup() {
                    self.shared.push_inbound(NetworkMessage::data(
                        cid,
                        MessageKind::DnsLookup,
                        peer_text.into_bytes(),
                    ));
                }
            }
            None => {
                logging::debug!(self.log, "connection refused by the engine";
                                "context" => "admit",
                                "peer" => &peer_text);
            }
        }
    }
}
