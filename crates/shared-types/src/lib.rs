//! # Shared Types Crate
//!
//! Entities shared across the node: hashes, peer identities and the quorum
//! view handed out by the quorum registry.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: cross-subsystem types are defined here.
//! - **Read-only quorums**: a `Quorum` is built once by the registry and shared
//!   behind an `Arc`; subsystems never mutate membership.

pub mod entities;
pub mod errors;
pub mod quorum;

pub use entities::*;
pub use errors::*;
pub use quorum::*;
