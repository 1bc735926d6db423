//! Session tracking and the match phase machine
//!
//! Handles connected sessions, per-session readiness flags and the shared
//! game phase they drive.

pub mod coordinator;
pub mod phase;
pub mod session;
