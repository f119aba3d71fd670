//! imblock runner
//!
//! Drives compiled block programs: single-stepping from block to block or
//! running continuously, while device primitives are carried out as remote
//! create-then-poll actions in the background.

pub mod api;
pub mod bridge;
pub mod config;
mod error;
pub mod highlight;
pub mod scheduler;
pub mod session;

pub use api::{ActionApi, HttpActionApi, Method, Reply, ScriptedApi};
pub use bridge::{ActionBridge, ActionRequest, ActionStatus, PendingAction, Resolution, Route};
pub use config::{FailurePolicy, RunnerConfig};
pub use error::{BridgeError, SchedulerError};
pub use highlight::HighlightState;
pub use scheduler::{Command, Mode, Scheduler, SchedulerHandle, Snapshot};
pub use session::{
    NoPrompter, Outcome, ProgramChange, Progress, Prompter, ScriptedPrompter, Session,
};
