//! Authenticated user lookup.

use parking_lot::RwLock;

/// The signed-in account, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub display_name: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name,
        }
    }
}

/// Source of the currently authenticated user. Room creation requires one.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;
}

/// Provider with a user set in code.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    user: RwLock<Option<AuthUser>>,
}

impl StaticIdentityProvider {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(uid: impl Into<String>, display_name: Option<&str>) -> Self {
        Self {
            user: RwLock::new(Some(AuthUser::new(uid, display_name.map(str::to_string)))),
        }
    }

    pub fn sign_in(&self, user: AuthUser) {
        *self.user.write() = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write() = None;
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.read().clone()
    }
}
