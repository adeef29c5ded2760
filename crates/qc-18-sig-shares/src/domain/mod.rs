//! Domain layer for signature share exchange.
//!
//! Pure logic: share maps, bitsets, per-peer sessions and recovery
//! scheduling. No I/O happens here.

pub mod config;
pub mod entities;
pub mod inventory;
pub mod invariants;
pub mod recovery;
pub mod session;
pub mod share_map;
pub mod value_objects;

pub use config::*;
pub use entities::*;
pub use inventory::*;
pub use invariants::*;
pub use recovery::*;
pub use session::*;
pub use share_map::*;
pub use value_objects::*;
