//! State replication primitives
//!
//! - [`value`]: sequence-stamped replicated fields and their client mirrors
//! - [`ownership`]: which session simulates which entity
//! - [`reconciliation`]: smoothing of remote entities toward the server pose
//! - [`mirror`]: client-side replica driven by the server message stream

pub mod mirror;
pub mod ownership;
pub mod reconciliation;
pub mod value;
