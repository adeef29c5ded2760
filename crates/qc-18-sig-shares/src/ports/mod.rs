//! Ports (hexagonal architecture) for the Signature Shares subsystem.

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
