//! Aggregator for the gendev workspace.
//!
//! Re-exports the device layer, which in turn carries the feature tree
//! (`genapi`) and the SFNC names (`sfnc`), so demos and downstream users need
//! a single dependency.

pub use genicam::*;
