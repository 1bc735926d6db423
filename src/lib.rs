//! Sisyphi Match Server Library
//!
//! Authoritative state synchronisation for a small co-op match: replicated
//! fields with sequence numbers, per-entity ownership, server-side request
//! validation and the session lifecycle that drives a match from lobby to
//! game over.
//!
//! # Features
//!
//! - `map_gen` - Generate the match map from player prompts via the Claude API
//!   (a fixed fallback map is used otherwise)

pub mod config;
pub mod util;
pub mod game;
pub mod replication;
pub mod authority;
pub mod lobby;
pub mod net;
pub mod metrics;
pub mod map_gen;
