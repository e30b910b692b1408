//! Session supervision: the per-session lifecycle state machine, the fleet
//! registry that owns it, command execution, and world scanning.

pub mod commands;
pub mod fleet;
pub(crate) mod session;
pub mod sim;
pub mod timer;
pub mod world;

pub use commands::{Command, CommandOutcome};
pub use fleet::{Fleet, FleetCounts, FleetDeps};
pub use sim::{SimConnector, SimHandle};
pub use timer::DeferredAction;
pub use world::ScanProvider;
