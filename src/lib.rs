//! Git-Review is a library for storing and synchronizing code-review metadata
//! inside an ordinary git repository.
//!
//! Review requests, comment threads, CI reports, and static-analysis reports
//! live as append-only notes on commits; named forks are registered in an
//! object-store tree and their metadata is ingested under an owner-authorship
//! filter. There is no server: every clone is an authoritative replica, and
//! peers exchange metadata with the same fetch/push they use for source code.
pub mod config;
pub mod errors;
pub mod forks;
pub mod hash;
pub mod internal;
pub mod records;
pub mod refs;
pub mod repo;
pub mod review;
pub mod sign;
pub mod utils;
