/// Request-time failures reported to API and push-channel callers.
/// Each variant maps to one HTTP status; none are retried automatically.
#[derive(Clone, Debug, thiserror::Error)]
pub enum FleetError {
    #[error("{0}")]
    Validation(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Precondition(String),
    #[error("{0}")]
    ExternalAction(String),
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

impl FleetError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Precondition(_) | Self::ExternalAction(_) => 400,
            Self::NotFound(_) => 404,
            Self::Collaborator(_) => 500,
        }
    }

    /// Short classification string for logging and error payloads.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Precondition(_) => "precondition_failed",
            Self::ExternalAction(_) => "action_rejected",
            Self::Collaborator(_) => "collaborator_failure",
        }
    }

    pub fn not_connected() -> Self {
        Self::Precondition("session is not connected".into())
    }
}

/// Login and version negotiation failures. Recovered inside the engine,
/// never surfaced to a caller.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("unsupported protocol version: {0}")]
    Version(String),
    #[error("connect failed: {0}")]
    Failed(String),
}

impl ConnectError {
    /// Whether the next rung of the version ladder is worth trying.
    ///
    /// Game clients rarely classify their own failures, so untyped messages
    /// that mention a version, or a null dereference during handshake, also
    /// count.
    pub fn is_version_related(&self) -> bool {
        match self {
            Self::Version(_) => true,
            Self::Failed(msg) => {
                msg.contains("version") || msg.contains("null") || msg.contains("Cannot read")
            }
        }
    }
}

/// Failure of an in-world action performed through a live handle.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ActionError {
    /// The world refused the action (no block there, out of reach...).
    #[error("{0}")]
    Rejected(String),
    /// The handle cannot perform this action right now.
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Failed(String),
}

impl From<ActionError> for FleetError {
    fn from(e: ActionError) -> Self {
        match e {
            ActionError::Rejected(m) => Self::ExternalAction(m),
            ActionError::Unsupported(m) => Self::Precondition(m),
            ActionError::Failed(m) => Self::Collaborator(m),
        }
    }
}

/// Raised by a [`crate::store::SessionStore`] implementation.
#[derive(Clone, Debug, thiserror::Error)]
#[error("persistence failure: {0}")]
pub struct PersistenceError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(FleetError::Validation("x".into()).status_code(), 400);
        assert_eq!(FleetError::NotFound("x".into()).status_code(), 404);
        assert_eq!(FleetError::Precondition("x".into()).status_code(), 400);
        assert_eq!(FleetError::ExternalAction("x".into()).status_code(), 400);
        assert_eq!(FleetError::Collaborator("x".into()).status_code(), 500);
    }

    #[test]
    fn error_kinds_are_distinct() {
        let kinds = [
            FleetError::Validation(String::new()).error_kind(),
            FleetError::NotFound(String::new()).error_kind(),
            FleetError::Precondition(String::new()).error_kind(),
            FleetError::ExternalAction(String::new()).error_kind(),
            FleetError::Collaborator(String::new()).error_kind(),
        ];
        let mut dedup = kinds.to_vec();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), kinds.len());
    }

    #[test]
    fn version_classification() {
        assert!(ConnectError::Version("1.21.5".into()).is_version_related());
        assert!(ConnectError::Failed("unsupported protocol version 767".into()).is_version_related());
        assert!(ConnectError::Failed("Cannot read properties of undefined".into()).is_version_related());
        assert!(ConnectError::Failed("value was null".into()).is_version_related());
        assert!(!ConnectError::Failed("ECONNREFUSED".into()).is_version_related());
    }

    #[test]
    fn action_error_mapping() {
        let e: FleetError = ActionError::Rejected("Invalid block at position".into()).into();
        assert!(matches!(e, FleetError::ExternalAction(_)));
        assert_eq!(e.status_code(), 400);

        let e: FleetError = ActionError::Unsupported("respawn unavailable".into()).into();
        assert!(matches!(e, FleetError::Precondition(_)));

        let e: FleetError = ActionError::Failed("socket closed".into()).into();
        assert_eq!(e.status_code(), 500);
    }

    #[test]
    fn not_found_message_names_id() {
        let e = FleetError::NotFound("bot_1".into());
        assert_eq!(e.to_string(), "session not found: bot_1");
    }
}
