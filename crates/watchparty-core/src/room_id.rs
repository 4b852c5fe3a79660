//! Room identifiers and the token sources that mint them.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default number of characters in a generated room token.
pub const DEFAULT_TOKEN_LEN: usize = 8;

/// Short opaque room token, carried as the `room` navigation parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a token taken from user input or a URL. Blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains('/') {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of candidate room tokens.
pub trait TokenSource: Send {
    fn next_token(&mut self) -> String;
}

/// Random tokens: a prefix of a v4 UUID.
#[derive(Debug, Clone)]
pub struct RandomTokenSource {
    len: usize,
}

impl RandomTokenSource {
    pub fn new(len: usize) -> Self {
        Self { len: len.clamp(4, 32) }
    }
}

impl Default for RandomTokenSource {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LEN)
    }
}

impl TokenSource for RandomTokenSource {
    fn next_token(&mut self) -> String {
        uuid::Uuid::new_v4().simple().to_string()[..self.len].to_string()
    }
}

/// Deterministic tokens for tests. Falls back to `token-<n>` once exhausted.
#[derive(Debug, Clone, Default)]
pub struct SequenceTokenSource {
    tokens: VecDeque<String>,
    issued: usize,
}

impl SequenceTokenSource {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            issued: 0,
        }
    }
}

impl TokenSource for SequenceTokenSource {
    fn next_token(&mut self) -> String {
        self.issued += 1;
        self.tokens
            .pop_front()
            .unwrap_or_else(|| format!("token-{}", self.issued))
    }
}
