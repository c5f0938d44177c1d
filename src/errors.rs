//! Error types for the round engine
//!
//! Business-rule failures are returned to the caller as typed variants;
//! infrastructure problems collapse into an opaque `Internal` error.

use crate::games::types::{Amount, GameKind};

/// Root error type for all engine operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    /// Bad amount, unknown game type, malformed outcome, etc.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient balance for {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        user_id: String,
        required: Amount,
        available: Amount,
    },

    #[error("No active round for {0}")]
    NoActiveRound(GameKind),

    #[error("User {user_id} already has an open {game} bet")]
    AlreadyActiveSession { user_id: String, game: GameKind },

    #[error("No active {game} session for user {user_id}")]
    NoActiveSession { user_id: String, game: GameKind },

    #[error("Bet {0} is already settled")]
    BetAlreadySettled(String),

    #[error("Round {0} has already crashed")]
    RoundAlreadyCrashed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        EngineError::Internal(msg.into())
    }

    /// Whether the caller can fix the request and resubmit
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::Internal(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for EngineError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        EngineError::Internal(format!("lock poisoned: {}", e))
    }
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::InsufficientBalance {
            user_id: "alice".to_string(),
            required: 50,
            available: 20,
        };

        assert!(err.to_string().contains("alice"));
        assert!(err.to_string().contains("required 50"));
        assert!(err.to_string().contains("available 20"));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(EngineError::NoActiveRound(GameKind::Aviator).is_client_error());
        assert!(EngineError::BetAlreadySettled("b1".into()).is_client_error());
        assert!(!EngineError::internal("disk on fire").is_client_error());
    }

    #[test]
    fn test_poison_conversion() {
        let lock = std::sync::Arc::new(std::sync::Mutex::new(0u8));
        let cloned = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let err: EngineError = lock.lock().unwrap_err().into();
        assert!(matches!(err, EngineError::Internal(_)));
    }

    #[test]
    fn test_config_error_details() {
        let err = ConfigError::InvalidValue {
            field: "aviator.tick_interval_ms".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        assert!(err.to_string().contains("aviator.tick_interval_ms"));
        assert!(err.to_string().contains("must be positive"));
    }
}
