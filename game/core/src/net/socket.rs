use crate::net::shared::{ConnectionId, ErrorType, NetStats, NetworkError, NetworkResult};
use cinder::logging::{self, Logger};
use mio::net::{TcpListener, TcpStream};
use net2::TcpBuilder;
use std::io::{self, Read, Write};
use std::net::{self, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Address families the server listens on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SocketFamily {
    Ipv4,
    Ipv6,
}

impl SocketFamily {
    #[inline]
    fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            SocketFamily::Ipv4 => addr.is_ipv4(),
            SocketFamily::Ipv6 => addr.is_ipv6(),
        }
    }

    #[inline]
    fn unspecified(self, port: u16) -> SocketAddr {
        match self {
            SocketFamily::Ipv4 => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            SocketFamily::Ipv6 => SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        }
    }
}

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// How an `accept` failure is handled: transient failures keep the worker
/// looping, fatal ones terminate it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AcceptError {
    Transient,
    Fatal,
}

/// Classifies an `accept` error. Besides the usual retry conditions, the
/// host-transient group covers leftover errors from recently reused sockets
/// and descriptor exhaustion, none of which endanger established
/// connections.
pub fn classify_accept_error(err: &io::Error) -> AcceptError {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) {
        return AcceptError::Transient;
    }

    match err.raw_os_error() {
        Some(code) => match code {
            libc::EMFILE
            | libc::ENFILE
            | libc::ENETDOWN
            | libc::EPROTO
            | libc::ENOPROTOOPT
            | libc::EHOSTDOWN
            | libc::ENONET
            | libc::EHOSTUNREACH
            | libc::EOPNOTSUPP
            | libc::ENETUNREACH => AcceptError::Transient,
            libc::EBADF | libc::EFAULT | libc::EINVAL | libc::ENOTSOCK => AcceptError::Fatal,
            _ => AcceptError::Transient,
        },
        None => AcceptError::Transient,
    }
}

/// Resolves the address to bind for the given family. A failed lookup falls
/// back to the unspecified address unless strict binding is requested.
fn resolve_bind_addr(
    family: SocketFamily,
    host: Option<&str>,
    port: u16,
    strict_bind: bool,
    log: &Logger,
) -> NetworkResult<SocketAddr> {
    let host = match host {
        Some(host) if !host.is_empty() => host,
        Some(_) => {
            logging::warn!(log, "empty bind address, using the unspecified address";
                           "context" => "resolve_bind_addr");
            return Ok(family.unspecified(port));
        }
        None => return Ok(family.unspecified(port)),
    };

    let resolved = (host, port)
        .to_socket_addrs()
        .map(|mut addrs| addrs.find(|addr| family.matches(addr)));

    match resolved {
        Ok(Some(addr)) => Ok(addr),
        Ok(None) | Err(_) if !strict_bind => {
            logging::warn!(log, "bind address lookup failed, using the unspecified address";
                           "context" => "resolve_bind_addr",
                           "host" => host);
            Ok(family.unspecified(port))
        }
        Ok(None) => {
            logging::error!(log, "bind address has no match for the requested family";
                            "context" => "resolve_bind_addr",
                            "host" => host);
            Err(NetworkError::Fatal(ErrorType::AddrResolve))
        }
        Err(err) => {
            logging::error!(log, "bind address lookup failed";
                            "context" => "resolve_bind_addr",
                            "host" => host,
                            "error" => %err);
            Err(NetworkError::Fatal(ErrorType::AddrResolve))
        }
    }
}

/// Creates the listening socket for an accept worker: reuse-address,
/// IPv6-only for the v6 family, bind, listen with the system backlog, then
/// non-blocking registration-ready mode.
pub fn setup_listener(
    family: SocketFamily,
    host: Option<&str>,
    port: u16,
    strict_bind: bool,
    log: &Logger,
) -> NetworkResult<TcpListener> {
    let addr = resolve_bind_addr(family, host, port, strict_bind, log)?;

    logging::debug!(log, "setting up server socket";
                    "context" => "setup_listener",
                    "addr" => %addr);

    let builder = match family {
        SocketFamily::Ipv4 => TcpBuilder::new_v4(),
        SocketFamily::Ipv6 => TcpBuilder::new_v6(),
    }?;

    builder.reuse_address(true)?;

    if family == SocketFamily::Ipv6 {
        builder.only_v6(true)?;
    }

    builder.bind(addr)?;

    let listener = builder.listen(libc::SOMAXCONN)?;
    listener.set_nonblocking(true)?;

    let listener = TcpListener::from_std(listener)?;

    logging::info!(log, "listening for connections";
                   "context" => "setup_listener",
                   "addr" => %addr);

    Ok(listener)
}

/// Applies the per-connection socket options used for accepted streams.
/// Option failures are survivable and only logged.
pub fn apply_stream_options(stream: &TcpStream, log: &Logger) {
    // Linger of zero: discard unsent data on close instead of blocking a
    // cleanup worker on a dead peer.
    if let Err(err) = stream.set_linger(Some(Duration::from_secs(0))) {
        logging::warn!(log, "failed to set linger"; "context" => "apply_stream_options", "error" => %err);
    }

    if let Err(err) = stream.set_keepalive(Some(KEEPALIVE_INTERVAL)) {
        logging::warn!(log, "failed to set keepalive"; "context" => "apply_stream_options", "error" => %err);
    }

    if let Err(err) = stream.set_nodelay(true) {
        logging::warn!(log, "failed to set nodelay"; "context" => "apply_stream_options", "error" => %err);
    }
}

/// Reads once from the stream. A zero-byte read is an orderly close by the
/// peer and is folded into the fatal class.
pub fn read_stream<R: Read>(stream: &mut R, buf: &mut [u8]) -> NetworkResult<usize> {
    match stream.read(buf) {
        Ok(0) => Err(NetworkError::Fatal(ErrorType::PeerClosed)),
        Ok(count) => Ok(count),
        Err(err) => Err(err.into()),
    }
}

/// Writes once to the stream, classifying errors like [`read_stream`].
pub fn write_stream<W: Write>(stream: &mut W, buf: &[u8]) -> NetworkResult<usize> {
    match stream.write(buf) {
        Ok(count) => Ok(count),
        Err(err) => Err(err.into()),
    }
}

/// The record tying a live socket to its connection id and transfer totals.
/// Exactly one worker owns a record at any instant; ownership moves through
/// the socket queues.
pub struct SocketRecord {
    pub cid: ConnectionId,
    stream: TcpStream,
    pub rx: u64,
    pub tx: u64,
}

impl SocketRecord {
    #[inline]
    pub fn new(cid: ConnectionId, stream: TcpStream) -> SocketRecord {
        debug_assert!(cid != super::shared::INVALID_CONNECTION_ID);

        SocketRecord {
            cid,
            stream,
            rx: 0,
            tx: 0,
        }
    }

    /// The underlying stream, for poll registration.
    #[inline]
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Reads available bytes into `buf`, updating the record and the
    /// process-wide receive counters.
    pub fn receive(&mut self, buf: &mut [u8], stats: &NetStats) -> NetworkResult<usize> {
        let count = read_stream(&mut &self.stream, buf)?;

        self.rx += count as u64;
        stats.add_rx(count as u64);

        Ok(count)
    }

    /// Writes bytes from `buf`, updating the record and the process-wide
    /// send counters.
    pub fn send(&mut self, buf: &[u8], stats: &NetStats) -> NetworkResult<usize> {
        let count = write_stream(&mut &self.stream, buf)?;

        self.tx += count as u64;
        stats.add_tx(count as u64);

        Ok(count)
    }

    /// Best-effort shutdown of both directions; the descriptor itself closes
    /// when the record drops.
    pub fn shutdown(&self) {
        drop(self.stream.shutdown(net::Shutdown::Both));
    }
}
