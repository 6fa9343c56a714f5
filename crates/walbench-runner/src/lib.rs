//! Node lifecycle, replica sync and run orchestration for walbench.

pub mod cleanup;
pub mod node;
pub mod orchestrator;
pub mod probe;
pub mod process;
pub mod sync;

pub use cleanup::CleanupStack;
pub use node::ServerNode;
pub use orchestrator::{NodeFactory, Orchestrator, ProcessNodeFactory, RunOutcome};
pub use probe::{LogPosition, LogPositionProbe, SqlProbe};
pub use process::{resolve_server_binary, ProcessNode};
pub use sync::{SyncCoordinator, SyncReport};
