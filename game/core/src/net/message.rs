use crate::net::shared::{ConnectionId, INVALID_CONNECTION_ID};
use std::time::Instant;

/// Lifecycle and data events exchanged between the network workers and the
/// game loop.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MessageKind {
    NewConnection,
    Disconnection,
    DataIncoming,
    DataOutgoing,
    DnsLookup,
}

/// One event, owned by whichever queue or consumer currently holds it.
/// Connection events carry no payload; the data kinds always carry bytes.
#[derive(Debug)]
pub struct NetworkMessage {
    pub cid: ConnectionId,
    pub kind: MessageKind,
    pub received_at: Instant,
    pub data: Vec<u8>,
}

impl NetworkMessage {
    /// Builds a payload-free lifecycle event.
    #[inline]
    pub fn connection(cid: ConnectionId, kind: MessageKind) -> NetworkMessage {
        debug_assert!(cid != INVALID_CONNECTION_ID);
        debug_assert!(matches!(
            kind,
            MessageKind::NewConnection | MessageKind::Disconnection
        ));

        NetworkMessage {
            cid,
            kind,
            received_at: Instant::now(),
            data: Vec::new(),
        }
    }

    /// Builds a payload-carrying event. The payload must be non-empty.
    #[inline]
    pub fn data(cid: ConnectionId, kind: MessageKind, data: Vec<u8>) -> NetworkMessage {
        debug_assert!(cid != INVALID_CONNECTION_ID);
        debug_assert!(matches!(
            kind,
            MessageKind::DataIncoming | MessageKind::DataOutgoing | MessageKind::DnsLookup
        ));
        debug_assert!(!data.is_empty());

        NetworkMessage {
            cid,
            kind,
            received_at: Instant::now(),
            data,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }
}
