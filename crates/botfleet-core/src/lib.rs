//! Shared types for the bot fleet: ids, lifecycle status, the error
//! taxonomy, and the contracts the supervisor expects from the game client
//! and the persistence layer.

pub mod client;
pub mod errors;
pub mod events;
pub mod ids;
pub mod status;
pub mod store;
pub mod versions;
pub mod world;

pub use errors::{ActionError, ConnectError, FleetError, PersistenceError};
pub use ids::SessionId;
pub use status::{SessionRecord, SessionSnapshot, SessionStatus};
