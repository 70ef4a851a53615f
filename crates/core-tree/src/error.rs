//! Tree faults.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("no element with id `{id}`")]
    MissingElement { id: String },

    #[error("parent element `{parent}` does not exist")]
    MissingParent { parent: String },

    #[error("the root element cannot be removed")]
    RootRemoval,

    #[error("element `{element}` has no component at index {index}")]
    MissingComponent { element: String, index: usize },
}
