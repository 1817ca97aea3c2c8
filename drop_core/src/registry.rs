//! Room registry for pairing participants by code
//!
//! The registry maintains:
//! - Room code -> ordered members (at most two)
//! - Member -> the one room it belongs to
//!
//! It is a plain in-memory structure; callers serialize access to it (the
//! relay keeps it behind a single mutex).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A room never holds more than this many members
pub const ROOM_CAPACITY: usize = 2;

/// Identity of one relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(Uuid);

impl MemberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell connections apart in logs
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("room {0} already has two members")]
    RoomFull(String),
    #[error("member is already in room {0}")]
    AlreadyInRoom(String),
}

/// Result of a successful join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub members: usize,
    /// This join moved the room from one member to two
    pub newly_paired: bool,
}

/// Removal of a member from a room, as seen by whoever is left
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_code: String,
    pub remaining: Vec<MemberId>,
}

#[derive(Debug, Default)]
struct Room {
    members: Vec<MemberId>,
}

/// Registry of active rooms
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    member_rooms: HashMap<MemberId, String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `member` to room `code`, creating the room on first join
    pub fn join(&mut self, code: &str, member: MemberId) -> Result<JoinOutcome, RegistryError> {
        if let Some(current) = self.member_rooms.get(&member) {
            if current != code {
                return Err(RegistryError::AlreadyInRoom(current.clone()));
            }
        }

        let room = self.rooms.entry(code.to_string()).or_default();

        if room.members.contains(&member) {
            return Ok(JoinOutcome {
                members: room.members.len(),
                newly_paired: false,
            });
        }

        if room.members.len() >= ROOM_CAPACITY {
            return Err(RegistryError::RoomFull(code.to_string()));
        }

        room.members.push(member);
        self.member_rooms.insert(member, code.to_string());

        let members = room.members.len();
        tracing::debug!("Member {} joined room {} ({} members)", member, code, members);

        Ok(JoinOutcome {
            members,
            newly_paired: members == ROOM_CAPACITY,
        })
    }

    /// Remove `member` from its room; empty rooms are discarded
    pub fn leave(&mut self, member: MemberId) -> Vec<Departure> {
        let Some(code) = self.member_rooms.remove(&member) else {
            return Vec::new();
        };

        let mut departures = Vec::new();
        if let Some(room) = self.rooms.get_mut(&code) {
            room.members.retain(|m| *m != member);
            departures.push(Departure {
                room_code: code.clone(),
                remaining: room.members.clone(),
            });
            if room.members.is_empty() {
                self.rooms.remove(&code);
                tracing::debug!("Room {} discarded", code);
            }
        }
        departures
    }

    /// Members of `code` other than `member`
    pub fn peers_of(&self, code: &str, member: MemberId) -> Vec<MemberId> {
        self.rooms
            .get(code)
            .map(|room| {
                room.members
                    .iter()
                    .copied()
                    .filter(|m| *m != member)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn members_of(&self, code: &str) -> Vec<MemberId> {
        self.rooms
            .get(code)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    pub fn room_of(&self, member: MemberId) -> Option<&str> {
        self.member_rooms.get(&member).map(String::as_str)
    }

    pub fn room_size(&self, code: &str) -> usize {
        self.rooms.get(code).map_or(0, |room| room.members.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
