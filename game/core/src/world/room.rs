/// Room and zone numbers as they appear in the world files. Zero marks an
/// absent reference.
pub type Vnum = i32;

pub const INVALID_VNUM: Vnum = 0;

/// The six cardinal movement directions, in world-file order.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    North,
    East,
    Up,
    South,
    West,
    Down,
}

impl Direction {
    pub const COUNT: usize = 6;

    #[inline]
    pub fn all() -> [Direction; Direction::COUNT] {
        [
            Direction::North,
            Direction::East,
            Direction::Up,
            Direction::South,
            Direction::West,
            Direction::Down,
        ]
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The direction leading back: the table is laid out so the opposite
    /// sits half a cycle away.
    #[inline]
    pub fn opposite(self) -> Direction {
        Direction::all()[(self.index() + Direction::COUNT / 2) % Direction::COUNT]
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::East => "east",
            Direction::Up => "up",
            Direction::South => "south",
            Direction::West => "west",
            Direction::Down => "down",
        }
    }
}

/// One room. Exits are stored twice: the vnums straight from the file, and
/// the indices into the world's room arena once linked.
pub struct Room {
    pub vnum: Vnum,
    pub name: String,
    pub description: String,
    pub exit_vnums: [Vnum; Direction::COUNT],
    pub exits: [Option<usize>; Direction::COUNT],
}

impl Room {
    pub fn new(vnum: Vnum, name: String, description: String, exit_vnums: [Vnum; Direction::COUNT]) -> Room {
        Room {
            vnum,
            name,
            description,
            exit_vnums,
            exits: [None; Direction::COUNT],
        }
    }

    #[inline]
    pub fn exit(&self, direction: Direction) -> Option<usize> {
        self.exits[direction.index()]
    }
}

/// A zone groups rooms for loading and bookkeeping purposes.
pub struct Zone {
    pub vnum: Vnum,
    pub name: String,
    pub description: String,
    pub rooms: Vec<Vnum>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposites() {
        assert_eq!(Direction::North.opposite(), Direction::South);
        assert_eq!(Direction::South.opposite(), Direction::North);
        assert_eq!(Direction::East.opposite(), Direction::West);
        assert_eq!(Direction::West.opposite(), Direction::East);
        assert_eq!(Direction::Up.opposite(), Direction::Down);
        assert_eq!(Direction::Down.opposite(), Direction::Up);
    }

    #[test]
    fn test_indices_cover_the_table() {
        for (expected, direction) in Direction::all().iter().enumerate() {
            assert_eq!(direction.index(), expected);
        }
    }
}
