use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Run-time unique identifier for an accepted connection.
pub type ConnectionId = u32;

pub const INVALID_CONNECTION_ID: ConnectionId = 0;
pub const MAX_CONNECTION_ID: ConnectionId = u32::max_value();

/// Upper bound on the sockets owned by a single receive worker.
pub const MAX_SOCKETS_PER_WORKER: usize = 512;
/// Watermark at which the receive fleet asks for a sibling worker.
pub const SOCKETS_PER_WORKER_HIGH: usize = MAX_SOCKETS_PER_WORKER - 10;
/// Size of the scratch buffer each receive worker reads into.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;
/// Longest payload carried by one inbound message; longer reads are truncated.
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Transient conditions surface as `Wait` and are retried by the caller on
/// the next readiness pass; everything in `Fatal` costs the connection.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    PeerClosed,
    AddrResolve,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}

/// Process-wide transfer statistics, updated from every network worker.
pub struct NetStats {
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    socket_reads: AtomicU64,
    socket_writes: AtomicU64,
    sockets_accepted: AtomicU32,
}

impl NetStats {
    pub fn new() -> NetStats {
        NetStats {
            rx_bytes: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            socket_reads: AtomicU64::new(0),
            socket_writes: AtomicU64::new(0),
            sockets_accepted: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn add_rx(&self, count: u64) {
        self.rx_bytes.fetch_add(count, Ordering::Relaxed);
        self.socket_reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_tx(&self, count: u64) {
        self.tx_bytes.fetch_add(count, Ordering::Relaxed);
        self.socket_writes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn bump_accepted(&self) {
        self.sockets_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tx_bytes(&self) -> u64 {
        self.tx_bytes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn socket_reads(&self) -> u64 {
        self.socket_reads.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn socket_writes(&self) -> u64 {
        self.socket_writes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sockets_accepted(&self) -> u32 {
        self.sockets_accepted.load(Ordering::Relaxed)
    }
}

/// Monotone connection id source. Ids start at 1, are handed out exactly
/// once per process lifetime and are never recycled; running out fails the
/// allocation, not the process.
pub struct CidAllocator {
    next: AtomicU32,
}

impl CidAllocator {
    pub fn new() -> CidAllocator {
        CidAllocator {
            next: AtomicU32::new(INVALID_CONNECTION_ID + 1),
        }
    }

    #[cfg(test)]
    fn starting_at(next: ConnectionId) -> CidAllocator {
        CidAllocator {
            next: AtomicU32::new(next),
        }
    }

    /// Returns the next connection id, or `None` once the id space is spent.
    pub fn allocate(&self) -> Option<ConnectionId> {
        loop {
            let current = self.next.load(Ordering::Relaxed);

            if current == MAX_CONNECTION_ID {
                return None;
            }

            if self
                .next
                .compare_exchange(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_starts_at_one() {
        let cids = CidAllocator::new();

        assert_eq!(cids.allocate(), Some(1));
        assert_eq!(cids.allocate(), Some(2));
        assert_eq!(cids.allocate(), Some(3));
    }

    #[test]
    fn test_allocator_exhaustion() {
        let cids = CidAllocator::starting_at(MAX_CONNECTION_ID - 1);

        assert_eq!(cids.allocate(), Some(MAX_CONNECTION_ID - 1));
        assert_eq!(cids.allocate(), None);
        assert_eq!(cids.allocate(), None);
    }

    #[test]
    fn test_error_conversion() {
        let wait: NetworkError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(wait, NetworkError::Wait);

        let wait: NetworkError = io::Error::from(io::ErrorKind::Interrupted).into();
        assert_eq!(wait, NetworkError::Wait);

        let fatal: NetworkError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert_eq!(fatal, NetworkError::Fatal(ErrorType::Io(io::ErrorKind::BrokenPipe)));
    }

    #[test]
    fn test_has_failed() {
        assert!(!Ok::<(), NetworkError>(()).has_failed());
        assert!(!Err::<(), _>(NetworkError::Wait).has_failed());
        assert!(Err::<(), _>(NetworkError::Fatal(ErrorType::PeerClosed)).has_failed());
    }

    #[test]
    fn test_stats_accumulate() {
        let stats = NetStats::new();

        stats.add_rx(6);
        stats.add_rx(4);
        stats.add_tx(3);
        stats.bump_accepted();

        assert_eq!(stats.rx_bytes(), 10);
        assert_eq!(stats.tx_bytes(), 3);
        assert_eq!(stats.socket_reads(), 2);
        assert_eq!(stats.socket_writes(), 1);
        assert_eq!(stats.sockets_accepted(), 1);
    }
}
