//! Watchparty Core Library
//!
//! Room model, keyspace layout and replication policy for watch-together
//! sessions. Everything here is synchronous and store-agnostic; the async
//! client in `watchparty-client` drives it against a realtime store.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod chat;
pub mod config;
pub mod identity;
pub mod keyspace;
pub mod model;
pub mod presence;
pub mod room_id;
pub mod sync;

pub use chat::{MessageStyle, normalize_text, ordered_messages};
pub use config::SyncConfig;
pub use identity::{Identity, KeyValuePersistence, MemoryPersistence, SessionIdentity};
pub use keyspace::StorePath;
pub use model::{
    Emote, Message, PlaybackState, Permissions, Role, RoomRecord, RoomSummary, ServerTime,
    UserRecord,
};
pub use presence::LocalAccess;
pub use room_id::{RandomTokenSource, RoomId, SequenceTokenSource, TokenSource};
pub use sync::{ApplyPlan, DriftPolicy, LocalPlayback, SnapshotVerdict};
