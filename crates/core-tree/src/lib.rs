//! The live element/component tree.
//!
//! Elements form a single-rooted hierarchy of named nodes; components are
//! behaviors mounted on elements. The tree is an arena keyed by stable
//! element id: children are owned id lists, the parent is a back-id, and
//! the arena itself is the id index — so there is exactly one path from any
//! reachable element to the root, and no reference cycles to manage.
//!
//! Tree mutation surfaces mount/unmount events for the next frame rather
//! than dispatching synchronously; the caller (the Space) owns the queue.

pub mod component;
pub mod component_registry;
pub mod element;
pub mod error;
pub mod references;
pub mod snapshot;
pub mod tree;

pub use component::{Component, ComponentSlot, LifecycleCtx, RoleSet};
pub use component_registry::ComponentRegistry;
pub use element::Element;
pub use error::TreeError;
pub use references::ReferenceRegistry;
pub use snapshot::{ComponentSnapshot, ElementSnapshot, ElementTreeSnapshot};
pub use tree::Tree;
