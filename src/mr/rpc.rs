//! RPC argument/reply shapes and transport addressing.
//!
//! Mirrors `rpc.go`: plain data-only structs for each method, plus the
//! uid-derived Unix-domain socket path.

use nix::unistd::Uid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegisterReply {
    pub n_map: i32,
    pub n_reduce: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyForMapReply {
    pub map_id: i32,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ApplyForReduceReply {
    pub reduce_id: i32,
}

/// The only error a worker ever sees over the RPC boundary: the current
/// phase (map or reduce) has no more tasks to dispense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum CoordinatorError {
    #[error("all tasks assigned")]
    PhaseDrained,
}

/// `/var/tmp/5840-mr-<uid>`, matching `coordinatorSock()` in the source
/// system. Distinct per effective user so unrelated jobs on a shared host
/// don't collide.
pub fn socket_path() -> std::path::PathBuf {
    std::path::PathBuf::from(format!("/var/tmp/5840-mr-{}", Uid::effective()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_is_stable_for_the_current_user() {
        assert_eq!(socket_path(), socket_path());
        assert!(socket_path().starts_with("/var/tmp"));
    }
}
