//! Internal git plumbing: the object model shared by the in-memory backend
//! and the fork-registry tree layer.
pub mod object;
