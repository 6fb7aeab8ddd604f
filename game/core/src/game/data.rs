use crate::net::shared::{ConnectionId, INVALID_CONNECTION_ID};
use cinder::logging::{self, Logger};

/// Identifier for a player object, independent of its transport binding.
pub type ObjectId = u64;

pub const INVALID_OBJECT_ID: ObjectId = 0;

/// A connected player. The object id is assigned exactly once; the
/// connection id is the player's current transport identity.
pub struct Player {
    id: ObjectId,
    cid: ConnectionId,
    pub status: i32,
    pub state: i32,
}

impl Player {
    fn new(id: ObjectId, cid: ConnectionId) -> Player {
        debug_assert!(id != INVALID_OBJECT_ID);
        debug_assert!(cid != INVALID_CONNECTION_ID);

        Player {
            id,
            cid,
            status: 0,
            state: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn cid(&self) -> ConnectionId {
        self.cid
    }
}

/// Owns the player list and the object id source. Lookups are linear; the
/// population is small and churn dominated by the network side.
pub struct DataEngine {
    next_id: ObjectId,
    players: Vec<Player>,
    log: Logger,
}

impl DataEngine {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(log: L) -> DataEngine {
        DataEngine {
            next_id: INVALID_OBJECT_ID + 1,
            players: Vec::new(),
            log: logging::child_or_discard(log),
        }
    }

    /// Creates a player bound to the given connection. Refuses a second
    /// player on a connection that already has one.
    pub fn add_player(&mut self, cid: ConnectionId) -> bool {
        debug_assert!(cid != INVALID_CONNECTION_ID);

        if self.player_by_cid(cid).is_some() {
            logging::warn!(self.log, "attempt to add a second player for a connection";
                           "context" => "add_player",
                           "cid" => cid);
            return false;
        }

        let id = self.next_id;
        self.next_id += 1;

        self.players.push(Player::new(id, cid));

        logging::debug!(self.log, "player added";
                        "context" => "add_player",
                        "id" => id,
                        "cid" => cid);
        true
    }

    /// Removes the player bound to the given connection.
    pub fn remove_player(&mut self, cid: ConnectionId) -> bool {
        debug_assert!(cid != INVALID_CONNECTION_ID);

        match self.players.iter().position(|player| player.cid == cid) {
            Some(index) => {
                let player = self.players.remove(index);
                logging::debug!(self.log, "player removed";
                                "context" => "remove_player",
                                "id" => player.id,
                                "cid" => cid);
                true
            }
            None => {
                logging::warn!(self.log, "attempt to remove a player that does not exist";
                               "context" => "remove_player",
                               "cid" => cid);
                false
            }
        }
    }

    #[inline]
    pub fn num_players(&self) -> usize {
        self.players.len()
    }

    pub fn player_by_cid(&self, cid: ConnectionId) -> Option<&Player> {
        self.players.iter().find(|player| player.cid == cid)
    }

    pub fn player_by_id(&self, id: ObjectId) -> Option<&Player> {
        self.players.iter().find(|player| player.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let mut data = DataEngine::new(None);

        assert!(data.add_player(10));
        assert!(data.add_player(20));

        assert_eq!(data.num_players(), 2);

        let first = data.player_by_cid(10).unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(first.cid(), 10);

        let second = data.player_by_cid(20).unwrap();
        assert_eq!(second.id(), 2);

        assert!(data.player_by_id(1).is_some());
        assert!(data.player_by_id(3).is_none());
    }

    #[test]
    fn test_duplicate_cid_rejected() {
        let mut data = DataEngine::new(None);

        assert!(data.add_player(10));
        assert!(!data.add_player(10));
        assert_eq!(data.num_players(), 1);
    }

    #[test]
    fn test_remove_player() {
        let mut data = DataEngine::new(None);

        data.add_player(10);
        data.add_player(20);

        assert!(data.remove_player(10));
        assert_eq!(data.num_players(), 1);
        assert!(data.player_by_cid(10).is_none());
        assert!(data.player_by_cid(20).is_some());
    }

    #[test]
    fn test_remove_absent_player_fails() {
        let mut data = DataEngine::new(None);

        assert!(!data.remove_player(10));
    }

    #[test]
    fn test_object_ids_not_reused() {
        let mut data = DataEngine::new(None);

        data.add_player(10);
        data.remove_player(10);
        data.add_player(10);

        // The second incarnation gets a fresh object id.
        assert_eq!(data.player_by_cid(10).unwrap().id(), 2);
    }
}
