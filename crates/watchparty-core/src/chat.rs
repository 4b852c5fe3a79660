//! Chat log ordering and presentation.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::identity::Identity;
use crate::model::{Message, UserRecord};

/// How a chat line should be drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStyle {
    /// Room notice: centered, muted, no author or role styling.
    System,
    /// Written by the local participant.
    Own,
    /// Written by someone else; hosts get a badge.
    Peer { host_badge: bool },
}

impl MessageStyle {
    pub fn of(
        message: &Message,
        self_id: &Identity,
        users: &BTreeMap<Identity, UserRecord>,
    ) -> Self {
        if message.is_system() {
            MessageStyle::System
        } else if &message.user_id == self_id {
            MessageStyle::Own
        } else {
            MessageStyle::Peer {
                host_badge: users
                    .get(&message.user_id)
                    .is_some_and(UserRecord::is_host),
            }
        }
    }
}

/// Whether `text` is worth sending.
pub fn normalize_text(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Decode a full `messages` snapshot into timestamp order.
///
/// Transport delivery order is not trusted: entries are sorted by their server
/// timestamp, falling back to push-key order for ties and pending stamps.
pub fn ordered_messages(snapshot: Option<&Value>) -> Vec<Message> {
    let Some(Value::Object(entries)) = snapshot else {
        return Vec::new();
    };

    let mut messages: Vec<Message> = entries
        .iter()
        .filter_map(|(key, value)| match serde_json::from_value::<Message>(value.clone()) {
            Ok(mut message) => {
                message.id.clone_from(key);
                Some(message)
            }
            Err(err) => {
                tracing::warn!(message_id = %key, error = %err, "Skipping malformed message");
                None
            }
        })
        .collect();

    messages.sort_by(|a, b| {
        a.timestamp
            .sort_key()
            .cmp(&b.timestamp.sort_key())
            .then_with(|| a.id.cmp(&b.id))
    });
    messages
}
