//! Provider descriptors (endpoints and quirks) and token error classification.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;
