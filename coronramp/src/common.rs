//! Shared buffer types.

pub use ::common::Frame;
