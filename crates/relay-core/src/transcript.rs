//! Conversation messages and the turn-order validator.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged message.
///
/// Field order is part of the canonical serialization used by
/// [`crate::fingerprint`], so `role` must stay ahead of `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Check that `messages` follows legal turn-taking.
///
/// A transcript is valid when it is non-empty, carries at most one `system`
/// message and only at index 0, alternates `user`/`assistant` starting with
/// `user` after that, and ends on a `user` message.
pub fn validate(messages: &[Message]) -> bool {
    if messages.is_empty() {
        return false;
    }

    if messages.iter().skip(1).any(|m| m.role == Role::System) {
        return false;
    }

    let start = if messages[0].role == Role::System {
        // A lone system message can never end on `user`.
        if messages.len() == 1 {
            return false;
        }
        1
    } else {
        0
    };

    let mut expected = Role::User;
    for message in &messages[start..] {
        if message.role != expected {
            return false;
        }
        expected = match expected {
            Role::User => Role::Assistant,
            _ => Role::User,
        };
    }

    messages.last().is_some_and(|m| m.role == Role::User)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
