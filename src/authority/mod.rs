//! Server-side request validation
//!
//! Nothing mutates replicated state without passing through
//! [`validator::AuthorityValidator`] first.

pub mod validator;
