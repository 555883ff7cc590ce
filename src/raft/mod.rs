//! Raft role state machine and leader-side replication.

mod candidate;
mod follower;
pub mod leader;
pub mod node;
pub mod replication;
mod role;
pub mod rpc;
pub mod state;
pub mod task_group;
pub mod timer;

pub use leader::LeaderContext;
pub use node::{Proposal, Raft, RaftEvent, RaftStatus, RoleChange};
pub use state::{RaftContext, RaftRole};
