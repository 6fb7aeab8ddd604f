pub mod accept;
pub mod engine;
pub mod message;
pub mod queue;
pub mod recv;
pub mod send;
pub mod shared;
pub mod socket;

pub use self::engine::NetworkEngine;
pub use self::message::{MessageKind, NetworkMessage};
pub use self::queue::SharedQueue;
pub use self::shared::{ConnectionId, NetworkError, NetworkResult};
pub use self::socket::SocketRecord;

/// Cross-thread queue of network messages.
pub type MessageQueue = SharedQueue<NetworkMessage>;
/// Cross-thread queue of socket records changing owners.
pub type SocketQueue = SharedQueue<SocketRecord>;
