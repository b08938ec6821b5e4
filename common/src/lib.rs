//! Shared buffers for the coronramp workspace.

pub mod frame;

pub use frame::Frame;
