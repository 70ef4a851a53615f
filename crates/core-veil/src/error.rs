//! State-invariant violations.
//!
//! These are the faults that reject a whole delta batch (§ error handling:
//! the facet map is never left partially applied). Processor faults are a
//! different animal and never reach this type; they are converted to
//! `system:error` events by the frame engine.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VeilError {
    #[error("addFacet with existing id `{id}` (sequence {sequence})")]
    DuplicateFacet { id: String, sequence: u64 },

    #[error("{op} on absent facet id `{id}`")]
    AbsentFacet { op: &'static str, id: String },

    #[error("non-contiguous frame sequence: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("changeState on facet `{id}`: {reason}")]
    InvalidStateMerge { id: String, reason: String },
}
