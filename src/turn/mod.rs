//! Turn orchestration: the pure state machine and the async controller that
//! executes it.

pub mod controller;
pub mod report;
pub mod state;
pub mod status;

pub use controller::{TurnAction, TurnConfig, TurnController, TurnHandle};
pub use report::{CollectingReporter, ErrorReporter, LogReporter};
pub use state::{Command, TurnInput, TurnMachine};
pub use status::{StatusLine, StatusSnapshot, TurnId, TurnStatus};
