//! Hierarchical store paths for the room keyspace.
//!
//! ```text
//! rooms/{roomId}
//!   ├── mediaId, hostId
//!   ├── state      {isPlaying, currentTime, lastUpdated, updatedBy}
//!   ├── users/{identity}/permissions/canControl
//!   ├── messages/{pushKey}
//!   └── emotes/{pushKey}
//! ```

use std::fmt;

use crate::identity::Identity;
use crate::room_id::RoomId;

pub const ROOMS: &str = "rooms";
pub const STATE: &str = "state";
pub const USERS: &str = "users";
pub const MESSAGES: &str = "messages";
pub const EMOTES: &str = "emotes";
pub const PERMISSIONS: &str = "permissions";

/// Slash-separated path into the store. Empty segments are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Self {
        Self {
            segments: raw
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Append one or more segments (`child` may itself contain `/`).
    #[must_use]
    pub fn child(&self, child: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            child
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when `self` is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &StorePath) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// True when a write at `self` can change the value observed at `other`.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

pub fn room(room_id: &RoomId) -> StorePath {
    StorePath::root().child(ROOMS).child(room_id.as_str())
}

pub fn state(room_id: &RoomId) -> StorePath {
    room(room_id).child(STATE)
}

pub fn users(room_id: &RoomId) -> StorePath {
    room(room_id).child(USERS)
}

pub fn user(room_id: &RoomId, user_id: &Identity) -> StorePath {
    users(room_id).child(user_id.as_str())
}

pub fn user_permissions(room_id: &RoomId, user_id: &Identity) -> StorePath {
    user(room_id, user_id).child(PERMISSIONS)
}

pub fn messages(room_id: &RoomId) -> StorePath {
    room(room_id).child(MESSAGES)
}

pub fn emotes(room_id: &RoomId) -> StorePath {
    room(room_id).child(EMOTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_paths() {
        let id = RoomId::new("ab12cd34");
        assert_eq!(state(&id).to_string(), "rooms/ab12cd34/state");
        assert_eq!(
            user_permissions(&id, &Identity::from("u1")).to_string(),
            "rooms/ab12cd34/users/u1/permissions"
        );
        assert_eq!(emotes(&id).to_string(), "rooms/ab12cd34/emotes");
    }

    #[test]
    fn test_overlaps() {
        let id = RoomId::new("r");
        let room_path = room(&id);
        let state_path = state(&id);
        let users_path = users(&id);

        assert!(room_path.overlaps(&state_path));
        assert!(state_path.overlaps(&room_path));
        assert!(!state_path.overlaps(&users_path));
        assert!(StorePath::root().is_prefix_of(&users_path));
    }

    #[test]
    fn test_child_splits_segments() {
        let path = StorePath::parse("/rooms//x/").child("users/u1");
        assert_eq!(path.segments().len(), 4);
        assert_eq!(path.to_string(), "rooms/x/users/u1");
    }
}
