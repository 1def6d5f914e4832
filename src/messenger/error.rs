use thiserror::Error;

use crate::messenger::database::DatabaseError;

pub type Result<T> = core::result::Result<T, MessengerError>;

#[derive(Error, Debug)]
pub enum MessengerError {
    #[error("Conversation not found")]
    ConversationNotFound,

    #[error("Message not found")]
    MessageNotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Message body must not be empty")]
    EmptyBody,

    #[error("Invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("Conversation already exists with different participants")]
    ParticipantsMismatch,

    #[error("Invalid reaction")]
    InvalidReaction,

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Another writer committed between our read and our write
    #[error("Concurrent modification conflict")]
    Conflict,

    #[error("Conversation busy after {attempts} attempts")]
    Busy { attempts: u32 },

    #[error("Store unavailable: {0}")]
    Unavailable(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl MessengerError {
    /// Errors that may succeed when the caller tries again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MessengerError::Conflict | MessengerError::Busy { .. } | MessengerError::Unavailable(_)
        )
    }
}

impl From<sqlx::Error> for MessengerError {
    fn from(err: sqlx::Error) -> Self {
        MessengerError::Unavailable(DatabaseError::Sqlx(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MessengerError::Conflict.is_transient());
        assert!(MessengerError::Busy { attempts: 5 }.is_transient());
        assert!(MessengerError::from(sqlx::Error::PoolTimedOut).is_transient());

        assert!(!MessengerError::ConversationNotFound.is_transient());
        assert!(!MessengerError::Forbidden("nope".to_string()).is_transient());
        assert!(!MessengerError::EmptyBody.is_transient());
        assert!(!MessengerError::InvalidReaction.is_transient());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            MessengerError::Busy { attempts: 3 }.to_string(),
            "Conversation busy after 3 attempts"
        );
        assert_eq!(
            MessengerError::UnknownUser("alice".to_string()).to_string(),
            "Unknown user: alice"
        );
    }
}
