//! Small math types shared by the server and the client replica.

pub mod quat;
pub mod vec3;
