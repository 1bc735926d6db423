pub mod constants;
pub mod entity;
pub mod map_grid;
pub mod placement;
pub mod request_queue;
pub mod world;
