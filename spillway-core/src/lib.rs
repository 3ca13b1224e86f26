//! Spillway Core - Entry Types
//!
//! Pure data structures shared by every spillway crate: cache entries and
//! their retention attributes, the lifecycle status enum, error types, and
//! the entry codec boundary. No I/O lives here.

mod codec;
mod entry;
mod error;

pub use codec::*;
pub use entry::*;
pub use error::*;
