pub mod room;

pub use self::room::{Direction, Room, Vnum, Zone, INVALID_VNUM};

use cinder::logging::{self, Logger};
use hashbrown::HashMap;
use std::fs;
use std::iter::Peekable;
use std::path::Path;

/// Room the newly connected players are placed in.
const START_ROOM_VNUM: Vnum = 12;
const ZONE_EXTENSION: &str = "zone";

/// Holds the room arena and the zone registry. Rooms reference each other
/// by vnum in the files and by arena index once linked; there are no
/// room-to-room pointers.
pub struct WorldEngine {
    zones: Vec<Zone>,
    rooms: Vec<Room>,
    by_vnum: HashMap<Vnum, usize>,
    start_room: Option<usize>,
    log: Logger,
}

impl WorldEngine {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(log: L) -> WorldEngine {
        WorldEngine {
            zones: Vec::new(),
            rooms: Vec::new(),
            by_vnum: HashMap::new(),
            start_room: None,
            log: logging::child_or_discard(log),
        }
    }

    /// Loads every zone file from the world directory. An unset or
    /// unreadable directory leaves the world empty; the server runs either
    /// way.
    pub fn initialize(&mut self, path: Option<&str>) {
        let path = match path {
            Some(path) => path,
            None => {
                logging::warn!(self.log, "no world directory configured, world is empty";
                               "context" => "initialize");
                return;
            }
        };

        logging::info!(self.log, "loading world"; "context" => "initialize", "path" => path);

        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(err) => {
                logging::warn!(self.log, "unable to open world directory, world is empty";
                               "context" => "initialize",
                               "path" => path,
                               "error" => %err);
                return;
            }
        };

        for entry in entries.flatten() {
            let file = entry.path();

            if file.extension().and_then(|ext| ext.to_str()) == Some(ZONE_EXTENSION) {
                self.load_zone(&file);
            }
        }

        logging::info!(self.log, "world loaded";
                       "context" => "initialize",
                       "rooms" => self.rooms.len(),
                       "zones" => self.zones.len());

        self.link_rooms();

        self.start_room = self.by_vnum.get(&START_ROOM_VNUM).copied();
        if self.start_room.is_none() && !self.rooms.is_empty() {
            logging::warn!(self.log, "starting room is missing from the world";
                           "context" => "initialize",
                           "vnum" => START_ROOM_VNUM);
        }
    }

    /// Parses one zone file. Rooms enter the world as they parse; the zone
    /// itself is only registered when its own header is complete.
    fn load_zone(&mut self, file: &Path) -> bool {
        let contents = match fs::read_to_string(file) {
            Ok(contents) => contents,
            Err(err) => {
                logging::error!(self.log, "could not open zone file";
                                "context" => "load_zone",
                                "file" => %file.display(),
                                "error" => %err);
                return false;
            }
        };

        logging::debug!(self.log, "loading zone"; "context" => "load_zone", "file" => %file.display());

        let mut name = String::new();
        let mut description = String::new();
        let mut vnum = INVALID_VNUM;
        let mut rooms = Vec::new();

        let mut lines = contents.lines().peekable();

        while let Some(line) = lines.next() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('/') {
                continue;
            }

            if let Some(room_vnum) = parse_room_header(line) {
                if let Some(added) = self.load_room(room_vnum, &mut lines) {
                    rooms.push(added);
                }
                continue;
            }

            if let Some(value) = line.strip_prefix("zone=") {
                name = value.to_owned();
            } else if let Some(value) = line.strip_prefix("zone_vnum=") {
                vnum = value.trim().parse().unwrap_or(INVALID_VNUM);
            } else if let Some(value) = line.strip_prefix("zone_desc=") {
                description = value.to_owned();
            } else if is_ignored_zone_line(line) {
                // Header metadata without runtime meaning.
            } else {
                logging::debug!(self.log, "unknown zone line";
                                "context" => "load_zone",
                                "contents" => line);
            }
        }

        if name.is_empty() || description.is_empty() || vnum == INVALID_VNUM {
            logging::debug!(self.log, "zone header incomplete, zone not registered";
                            "context" => "load_zone",
                            "file" => %file.display());
            return false;
        }

        logging::info!(self.log, "loaded zone";
                       "context" => "load_zone",
                       "zone" => &name,
                       "rooms" => rooms.len());

        self.zones.push(Zone {
            vnum,
            name,
            description,
            rooms,
        });

        true
    }

    /// Parses one room body, consuming lines up to the next room header.
    /// Incomplete rooms are dropped.
    fn load_room<'a, I>(&mut self, vnum: Vnum, lines: &mut Peekable<I>) -> Option<Vnum>
    where
        I: Iterator<Item = &'a str>,
    {
        logging::debug!(self.log, "loading room"; "context" => "load_room", "vnum" => vnum);

        let mut name = String::new();
        let mut description = String::new();
        let mut exit_vnums = None;

        while let Some(peeked) = lines.peek() {
            if peeked.trim_start().starts_with('#') {
                break;
            }

            let line = lines.next().unwrap().trim();

            if line.is_empty() || line.starts_with('/') {
                continue;
            }

            if let Some(value) = line.strip_prefix("room=") {
                name = value.to_owned();
            } else if let Some(value) = line.strip_prefix("room_desc=") {
                description = value.to_owned();
            } else if line.strip_prefix("room_flags=").is_some() {
                // Flags are parsed away until something consumes them.
            } else if let Some(value) = line.strip_prefix("exits=") {
                exit_vnums = parse_exits(value);
            } else {
                logging::debug!(self.log, "unknown room line";
                                "context" => "load_room",
                                "vnum" => vnum,
                                "contents" => line);
            }
        }

        let exit_vnums = match exit_vnums {
            Some(exits) if !name.is_empty() && !description.is_empty() => exits,
            _ => {
                logging::debug!(self.log, "room incomplete, dropped";
                                "context" => "load_room",
                                "vnum" => vnum);
                return None;
            }
        };

        if self.by_vnum.contains_key(&vnum) {
            logging::warn!(self.log, "duplicate room number, later room dropped";
                           "context" => "load_room",
                           "vnum" => vnum);
            return None;
        }

        let index = self.rooms.len();
        self.rooms.push(Room::new(vnum, name, description, exit_vnums));
        self.by_vnum.insert(vnum, index);

        Some(vnum)
    }

    /// Resolves exit vnums into arena indices. A reciprocal exit on the
    /// target pointing back here is linked in the same pass.
    fn link_rooms(&mut self) {
        for index in 0..self.rooms.len() {
            for direction in Direction::all() {
                let slot = direction.index();
                let target_vnum = self.rooms[index].exit_vnums[slot];

                if target_vnum == INVALID_VNUM || self.rooms[index].exits[slot].is_some() {
                    continue;
                }

                match self.by_vnum.get(&target_vnum).copied() {
                    Some(target) => {
                        self.rooms[index].exits[slot] = Some(target);

                        let back = direction.opposite().index();
                        if self.rooms[target].exit_vnums[back] == self.rooms[index].vnum {
                            self.rooms[target].exits[back] = Some(index);
                        }
                    }
                    None => {
                        logging::error!(self.log, "exit references a room that does not exist";
                                        "context" => "link_rooms",
                                        "room" => self.rooms[index].vnum,
                                        "target" => target_vnum);
                    }
                }
            }
        }
    }

    #[inline]
    pub fn num_rooms(&self) -> usize {
        self.rooms.len()
    }

    #[inline]
    pub fn num_zones(&self) -> usize {
        self.zones.len()
    }

    pub fn room_by_vnum(&self, vnum: Vnum) -> Option<&Room> {
        self.by_vnum.get(&vnum).map(|&index| &self.rooms[index])
    }

    #[inline]
    pub fn start_room(&self) -> Option<&Room> {
        self.start_room.map(|index| &self.rooms[index])
    }
}

fn parse_room_header(line: &str) -> Option<Vnum> {
    let value = line.strip_prefix("# [")?.strip_suffix(']')?;
    value.trim().parse().ok()
}

fn is_ignored_zone_line(line: &str) -> bool {
    const IGNORED: [&str; 7] = [
        "version=",
        "zone_author=",
        "zone_owner=",
        "zone_notes=",
        "zone_spawn_room=",
        "date_created=",
        "date_updated=",
    ];

    IGNORED.iter().any(|prefix| line.starts_with(prefix))
}

/// Parses `north :N east :E up :U south :S west :W down :D`. All six
/// directions must be present, in order; zero means no exit.
fn parse_exits(value: &str) -> Option<[Vnum; Direction::COUNT]> {
    let mut exits = [INVALID_VNUM; Direction::COUNT];
    let mut tokens = value.split_whitespace();

    for direction in Direction::all() {
        if tokens.next()? != direction.name() {
            return None;
        }

        let target = tokens.next()?.strip_prefix(':')?;
        exits[direction.index()] = target.parse().ok()?;
    }

    Some(exits)
}
