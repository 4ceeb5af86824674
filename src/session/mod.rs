pub mod manager;
pub mod types;

pub use manager::SessionManager;
pub use types::{
    session_id_for, ApprovalSession, CandidateTask, ChannelRef, Priority, SessionSummary,
    TaskStatus, TrackedTask,
};
