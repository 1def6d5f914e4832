use std::fmt;

use serde::{Deserialize, Serialize};

use crate::messenger::error::{MessengerError, Result};

/// Joins the two sorted participant ids of a direct conversation.
pub const CONVERSATION_ID_SEPARATOR: &str = "_";

/// Stable key of a conversation document.
///
/// Direct (two-party) conversations derive their key from the participant pair,
/// so both sides arrive at the same document without coordination. Group
/// conversations carry an id assigned elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Derives the key of a two-party conversation; order of `participants` is irrelevant.
    pub fn derive<S: AsRef<str>>(participants: &[S]) -> Result<Self> {
        if participants.len() != 2 {
            return Err(MessengerError::InvalidParticipants(format!(
                "a direct conversation needs exactly 2 participants, got {}",
                participants.len()
            )));
        }

        let mut pair = [participants[0].as_ref(), participants[1].as_ref()];
        if pair.iter().any(|id| id.is_empty()) {
            return Err(MessengerError::InvalidParticipants(
                "participant ids must not be empty".to_string(),
            ));
        }
        if pair[0] == pair[1] {
            return Err(MessengerError::InvalidParticipants(format!(
                "participants must be distinct, got {} twice",
                pair[0]
            )));
        }

        pair.sort_unstable();
        Ok(Self(pair.join(CONVERSATION_ID_SEPARATOR)))
    }

    /// Wraps an externally assigned id (group conversations, ids read back from storage).
    pub fn from_external(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::from_external(id)
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self::from_external(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_order_independent() {
        let pairs = [("alice", "bob"), ("u1", "u2"), ("Zed", "amy"), ("x", "xy")];
        for (a, b) in pairs {
            assert_eq!(
                ConversationId::derive(&[a, b]).unwrap(),
                ConversationId::derive(&[b, a]).unwrap()
            );
        }
    }

    #[test]
    fn test_derive_sorts_and_joins() {
        let id = ConversationId::derive(&["u2", "u1"]).unwrap();
        assert_eq!(id.as_str(), "u1_u2");
        assert_eq!(id.to_string(), "u1_u2");
    }

    #[test]
    fn test_derive_rejects_wrong_counts() {
        let none: [&str; 0] = [];
        assert!(matches!(
            ConversationId::derive(&none),
            Err(MessengerError::InvalidParticipants(_))
        ));
        assert!(matches!(
            ConversationId::derive(&["solo"]),
            Err(MessengerError::InvalidParticipants(_))
        ));
        assert!(matches!(
            ConversationId::derive(&["a", "b", "c"]),
            Err(MessengerError::InvalidParticipants(_))
        ));
    }

    #[test]
    fn test_derive_rejects_duplicate_and_empty_ids() {
        assert!(matches!(
            ConversationId::derive(&["same", "same"]),
            Err(MessengerError::InvalidParticipants(_))
        ));
        assert!(matches!(
            ConversationId::derive(&["", "b"]),
            Err(MessengerError::InvalidParticipants(_))
        ));
    }

    #[test]
    fn test_derive_accepts_owned_strings() {
        let participants = vec!["b".to_string(), "a".to_string()];
        assert_eq!(ConversationId::derive(&participants).unwrap().as_str(), "a_b");
    }

    #[test]
    fn test_external_ids_pass_through() {
        let id = ConversationId::from_external("class-7b-lab");
        assert_eq!(id.as_str(), "class-7b-lab");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"class-7b-lab\"");
    }
}
