//! Session state machine, persistence and checkpoint/resume

mod handle;
mod manager;
mod session;
mod store;

pub use handle::SessionHandle;
pub use manager::{ProgressUpdate, StateManager};
pub use session::{
    normalize_query, ErrorLogEntry, SearchSession, SessionFlags, SessionMetadata, SessionStatus,
};
pub use store::{Checkpoint, CheckpointInfo, SessionStore, FORMAT_VERSION};
