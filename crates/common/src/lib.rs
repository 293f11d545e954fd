// # -----------------------------
// # crates/common/src/lib.rs
// # -----------------------------
pub mod config;
pub mod error;
pub mod events;
pub mod machine;
pub mod msg;
pub mod paths;
pub mod task;

pub use config::{NodeClientSettings, RemoteNodeSettings};
pub use error::ClientError;
pub use events::EventSink;
pub use machine::{Machine, MachineState};
pub use msg::{NodeMsg, NodeMsgType, NodeTaskState};
pub use paths::StoragePaths;
pub use task::{Errors, Task};
