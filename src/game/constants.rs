/// Server tick timing
pub mod tick {
    /// Server tick rate in Hz (matches the client fixed physics step)
    pub const TICK_RATE: u32 = 50;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / 50.0;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;
}

/// Phase timer durations
pub mod phase {
    /// Time sessions get to enter their first prompt
    pub const FIRST_PROMPT_SECS: f32 = 30.0;
    /// Time sessions get to enter their second prompt
    pub const SECOND_PROMPT_SECS: f32 = 30.0;
    /// How far a prompt timer may run negative before the phase flips
    pub const TIMER_GRACE_SECS: f32 = 0.5;
    /// Countdown shown before gameplay starts
    pub const COUNTDOWN_SECS: f32 = 3.0;
    /// Length of the gameplay phase
    pub const GAMEPLAY_SECS: f32 = 300.0;
    /// Upper bound on waiting for the map generator
    pub const MAP_GENERATION_TIMEOUT_SECS: u64 = 20;
}

/// Client-side smoothing (lerp fraction per fixed tick)
pub mod smoothing {
    /// Client physics step the lerp fractions are expressed in
    pub const FIXED_DT: f32 = 1.0 / 50.0;
    pub const BOAT_POSITION_LERP: f32 = 0.2;
    pub const BOAT_ROTATION_LERP: f32 = 0.15;
    pub const BOULDER_POSITION_LERP: f32 = 0.25;
    pub const BOULDER_ROTATION_LERP: f32 = 0.25;
    pub const AVATAR_POSITION_LERP: f32 = 0.35;
    pub const AVATAR_ROTATION_LERP: f32 = 0.35;
    /// Distance (units or radians) under which a pose snaps to its target
    pub const SETTLE_EPSILON: f32 = 1e-3;
}

/// Placement clearance radii (planar, world units)
pub mod placement {
    pub const AVATAR_RADIUS: f32 = 0.5;
    pub const BOAT_RADIUS: f32 = 2.0;
    pub const RAMP_RADIUS: f32 = 1.5;
    pub const BRIDGE_RADIUS: f32 = 3.0;
    pub const PLATFORM_RADIUS: f32 = 2.0;
    /// Boulder radius per size tier
    pub const BOULDER_SMALL_RADIUS: f32 = 0.75;
    pub const BOULDER_MEDIUM_RADIUS: f32 = 1.25;
    pub const BOULDER_LARGE_RADIUS: f32 = 2.0;
    /// Spacing between session spawn points
    pub const SPAWN_SPACING: f32 = 8.0;
}

/// Network limits
pub mod net {
    /// Maximum encoded message size
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
    /// Request queue capacity (requests buffered between ticks)
    pub const REQUEST_QUEUE_CAPACITY: usize = 4096;
    /// Per-session outbound queue depth
    pub const OUTBOUND_QUEUE_DEPTH: usize = 512;
    /// Maximum display name length in characters
    pub const MAX_NAME_LEN: usize = 16;
    /// Maximum prompt length in characters
    pub const MAX_PROMPT_LEN: usize = 200;
}

/// Generated map bounds
pub mod map {
    /// Maximum rows/columns accepted from the generator
    pub const MAX_GRID_DIM: usize = 64;
    /// Highest tile id the client knows how to render
    pub const MAX_TILE: i32 = 9;
    /// Side length of the fallback grid
    pub const FALLBACK_DIM: usize = 8;
}

/// Session limits
pub mod sessions {
    pub const MAX_SESSIONS: usize = 8;
    pub const MIN_SESSIONS: usize = 1;
}
