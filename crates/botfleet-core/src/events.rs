use crate::ids::SessionId;
use crate::status::SessionSnapshot;

/// Observable changes published by the engine to the status broadcaster.
#[derive(Clone, Debug, PartialEq)]
pub enum FleetEvent {
    Status(SessionSnapshot),
    Deleted { session_id: SessionId },
}

impl FleetEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Status(s) => &s.id,
            Self::Deleted { session_id } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status(_) => "bot_status",
            Self::Deleted { .. } => "bot_deleted",
        }
    }
}
