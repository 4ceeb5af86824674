//! Reaction polling and downstream commits.
//!
//! The resolver moves `posted` tasks to `approved`; the committer moves
//! `approved` tasks to `committed`. The poller runs both, on demand or on a
//! schedule, independently of meeting ingress.

pub mod committer;
pub mod poller;
pub mod resolver;

pub use committer::{CommitReport, CommittedTask, DownstreamCommitter};
pub use poller::{ApprovalPoller, PollReport};
pub use resolver::{approving_count, ReactionResolver, Resolution};
