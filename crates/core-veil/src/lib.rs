//! VEIL: the versioned, append-only world model of the synapse kernel.
//!
//! The store holds four things: the live facet map (atomic units of world
//! content), registered streams and agents, and the frame history — a
//! gap-free, sequence-numbered record of every change ever applied. Mutation
//! happens only through delta batches; every batch either applies atomically
//! or is rejected whole, and every application yields a change log (added /
//! modified / removed facet snapshots) that is the sole input to the
//! downstream effector and maintainer phases.
//!
//! Nothing in this crate knows about elements, components, or the frame
//! engine; it is a pure state machine over facets and frames.

pub mod delta;
pub mod error;
pub mod facet;
pub mod frame;
pub mod state;
pub mod stream;

pub use delta::{FacetChange, VeilDelta};
pub use error::VeilError;
pub use facet::{Facet, FacetAspects, facet_types};
pub use frame::{Frame, StreamRef, frame_uuid, iso_timestamp};
pub use state::{StateListener, VeilState, VeilStateSnapshot};
pub use stream::{AgentFlags, AgentInfo, Stream};
