//! Watchparty Client
//!
//! Async side of a watch-together session: the realtime store connector and
//! the components that replicate playback, presence, chat and reactions
//! through it. [`session::WatchSession`] wires them together.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod messaging;
pub mod navigation;
pub mod playback;
pub mod player;
pub mod presence;
pub mod reactions;
pub mod room;
pub mod session;
pub mod store;

pub use auth::{AuthUser, IdentityProvider, StaticIdentityProvider};
pub use messaging::{ChatWriter, MessagingChannel};
pub use navigation::{NavigationContext, UrlNavigation};
pub use playback::PlaybackSynchronizer;
pub use player::{PlaybackElement, PlayerEvent, SimulatedPlayer};
pub use presence::PresenceRegistry;
pub use reactions::{ActiveReaction, REACTION_PALETTE, ReactionBroadcast, ReactionEvent};
pub use room::{JoinOutcome, RoomError, RoomManager};
pub use session::{Collaborators, Participation, SessionError, WatchSession};
pub use store::{MemoryStore, StoreConnector, StoreError, Subscription};
