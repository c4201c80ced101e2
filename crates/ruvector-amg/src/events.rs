//! Event sourcing for hierarchy setup and solves.
//!
//! Setup and solve emit [`AmgEvent`]s into an event log so a caller can see
//! how many levels were built, why coarsening stopped, and how the defect
//! evolved, without installing a `tracing` subscriber.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::SolveStatus;

/// Events emitted while building a hierarchy or solving with it.
///
/// Events are tagged with `#[serde(tag = "type")]` so they serialise as
/// `{ "type": "LevelBuilt", ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AmgEvent {
    /// A coarser level was added to the hierarchy.
    LevelBuilt {
        /// Index of the new level (0 is the finest).
        level: usize,
        /// Unknowns (block nodes) on the fine side.
        fine_nodes: usize,
        /// Unknowns on the new coarse level.
        coarse_nodes: usize,
        /// Stored block entries of the coarse matrix.
        coarse_nnz: usize,
        /// Wall time spent coarsening and projecting.
        elapsed: Duration,
    },

    /// Hierarchy construction stopped.
    CoarseningStopped {
        /// Level that became the coarsest.
        level: usize,
        /// Why no further level was built.
        reason: StopReason,
    },

    /// One outer iteration finished.
    CycleCompleted {
        /// Iteration number (1-based).
        iteration: usize,
        /// Defect norm after the iteration.
        defect: f64,
    },

    /// The outer solve ended.
    SolveFinished {
        /// How it ended.
        status: SolveStatus,
        /// Iterations performed.
        iterations: usize,
        /// Final defect norm.
        defect: f64,
        /// Total wall time.
        wall_time: Duration,
    },
}

/// Why the hierarchy builder stopped adding levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The level is at or below `cgnodes` unknowns.
    SmallEnough,
    /// Coarsening kept more than `mincoarse` of the unknowns.
    Stalled,
    /// No unknown was made Fine.
    NothingEliminated,
    /// `maxlevels` reached.
    MaxLevels,
}
