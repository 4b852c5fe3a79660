//! Projection of the store's user registry onto the local participant.

use std::collections::BTreeMap;

use crate::identity::Identity;
use crate::model::{Role, UserRecord};

/// What the local participant may do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalAccess {
    pub is_host: bool,
    pub can_control: bool,
}

impl LocalAccess {
    pub const HOST: LocalAccess = LocalAccess {
        is_host: true,
        can_control: true,
    };

    pub const VIEWER: LocalAccess = LocalAccess {
        is_host: false,
        can_control: false,
    };

    /// Recompute from a user snapshot. Only the store's copy counts; a missing
    /// record for `self_id` leaves `previous` untouched.
    pub fn project(
        users: &BTreeMap<Identity, UserRecord>,
        self_id: &Identity,
        previous: LocalAccess,
    ) -> LocalAccess {
        match users.get(self_id) {
            Some(record) => LocalAccess {
                is_host: record.role == Role::Host,
                can_control: record.permissions.can_control,
            },
            None => previous,
        }
    }

    /// Whether a `grant_control` call against `target` may reach the store.
    pub fn may_grant(&self, self_id: &Identity, target: &Identity) -> bool {
        self.is_host && self_id != target
    }
}

/// Parse a users snapshot, dropping entries that do not decode.
pub fn decode_users(snapshot: Option<&serde_json::Value>) -> BTreeMap<Identity, UserRecord> {
    let Some(serde_json::Value::Object(entries)) = snapshot else {
        return BTreeMap::new();
    };

    entries
        .iter()
        .filter_map(|(key, value)| match serde_json::from_value::<UserRecord>(value.clone()) {
            Ok(record) => Some((Identity::new(key.clone()), record)),
            Err(err) => {
                tracing::warn!(user_id = %key, error = %err, "Skipping malformed user record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users(entries: &[UserRecord]) -> BTreeMap<Identity, UserRecord> {
        entries.iter().map(|u| (u.id.clone(), u.clone())).collect()
    }

    #[test]
    fn test_project_from_store_copy() {
        let me = Identity::from("b");
        let mut record = UserRecord::viewer(me.clone(), "Bob");
        record.permissions.can_control = true;

        let access = LocalAccess::project(&users(&[record]), &me, LocalAccess::VIEWER);
        assert!(access.can_control);
        assert!(!access.is_host);
    }

    #[test]
    fn test_project_missing_record_keeps_previous() {
        let me = Identity::from("a");
        let other = UserRecord::viewer(Identity::from("b"), "Bob");

        let access = LocalAccess::project(&users(&[other]), &me, LocalAccess::HOST);
        assert_eq!(access, LocalAccess::HOST);
    }

    #[test]
    fn test_may_grant() {
        let host = Identity::from("a");
        let viewer = Identity::from("b");
        assert!(LocalAccess::HOST.may_grant(&host, &viewer));
        assert!(!LocalAccess::HOST.may_grant(&host, &host));

        let cohost = LocalAccess {
            is_host: false,
            can_control: true,
        };
        assert!(!cohost.may_grant(&viewer, &host));
    }

    #[test]
    fn test_decode_users_skips_malformed() {
        let snapshot = json!({
            "a": {"id": "a", "displayName": "Alice", "role": "host", "permissions": {"canControl": true}},
            "b": {"id": "b", "role": 7},
        });
        let decoded = decode_users(Some(&snapshot));
        assert_eq!(decoded.len(), 1);
        assert!(decoded[&Identity::from("a")].is_host());
        assert!(decode_users(None).is_empty());
    }
}
