//! Chat scopes and thread keys.
//!
//! A [`ChatScope`] is where a message was said (a direct chat or a group).
//! A [`ThreadKey`] is the identity under which pending sends are coalesced
//! and short-window history is kept: the chat alone, or the chat plus the
//! actor.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Direct,
    Group,
}

/// A chat as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatScope {
    pub id: String,
    pub kind: ScopeKind,
}

impl ChatScope {
    pub fn direct(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ScopeKind::Direct,
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ScopeKind::Group,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ScopeKind::Group
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadKey {
    chat: String,
    actor: Option<String>,
}

impl ThreadKey {
    /// A thread shared by everyone in the chat.
    pub fn chat(chat: impl Into<String>) -> Self {
        Self {
            chat: chat.into(),
            actor: None,
        }
    }

    /// A thread scoped to one actor within the chat.
    pub fn chat_actor(chat: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            chat: chat.into(),
            actor: Some(actor.into()),
        }
    }

    /// Derive the key for a message.
    ///
    /// Direct chats are always per actor. Groups share one thread unless
    /// `per_actor_in_groups` is set.
    pub fn for_message(scope: &ChatScope, actor_id: &str, per_actor_in_groups: bool) -> Self {
        match scope.kind {
            ScopeKind::Group if !per_actor_in_groups => Self::chat(&scope.id),
            _ => Self::chat_actor(&scope.id, actor_id),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor.as_deref()
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actor {
            Some(actor) => write!(f, "{}:{}", self.chat, actor),
            None => write!(f, "{}", self.chat),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_threads_are_shared_by_default() {
        let scope = ChatScope::group("-100");
        let a = ThreadKey::for_message(&scope, "alice", false);
        let b = ThreadKey::for_message(&scope, "bob", false);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "-100");
    }

    #[test]
    fn group_threads_can_split_per_actor() {
        let scope = ChatScope::group("-100");
        let a = ThreadKey::for_message(&scope, "alice", true);
        let b = ThreadKey::for_message(&scope, "bob", true);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "-100:alice");
    }

    #[test]
    fn direct_threads_carry_the_actor() {
        let key = ThreadKey::for_message(&ChatScope::direct("42"), "42", false);
        assert_eq!(key.chat_id(), "42");
        assert_eq!(key.actor_id(), Some("42"));
    }
}
