// Job Document Model
//
// The group manager never executes jobs; it only inspects their status
// fields to decide whether a queue is idle. These are the three fields of
// the cross-process wire contract.

use serde::{Deserialize, Serialize};

/// Queue identifier (the caller-facing logical id)
pub type QueueId = String;

/// Status fields of one job document in a backing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// The job finished (successfully or not).
    pub completed: bool,
    /// A worker currently holds the job.
    pub in_prog: bool,
    /// Last state change, milliseconds since epoch.
    pub mod_ts: i64,
}

impl JobStatus {
    pub fn pending(mod_ts: i64) -> Self {
        Self {
            completed: false,
            in_prog: false,
            mod_ts,
        }
    }

    pub fn in_progress(mod_ts: i64) -> Self {
        Self {
            completed: false,
            in_prog: true,
            mod_ts,
        }
    }

    pub fn completed(mod_ts: i64) -> Self {
        Self {
            completed: true,
            in_prog: false,
            mod_ts,
        }
    }
}
