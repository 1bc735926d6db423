//! Client-side smoothing toward the latest authoritative transform
//!
//! Non-owners never simulate remote entities; they ease the rendered pose
//! toward whatever the server last said. The easing is the classic
//! "lerp a fixed fraction per physics tick", rescaled so that variable
//! render frame times converge at the same rate as the fixed tick would.

use crate::game::constants::smoothing;
use crate::game::entity::{EntityKind, Transform};

/// Per-entity-class smoothing constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingConfig {
    /// Fraction of the remaining position error closed per fixed tick
    pub position_lerp: f32,
    /// Fraction of the remaining rotation error closed per fixed tick
    pub rotation_lerp: f32,
    /// Length of the fixed tick the fractions are expressed in (seconds)
    pub fixed_dt: f32,
    /// Below this distance (world units / radians) the pose snaps to target
    pub settle_epsilon: f32,
}

impl SmoothingConfig {
    pub fn boat() -> Self {
        Self {
            position_lerp: smoothing::BOAT_POSITION_LERP,
            rotation_lerp: smoothing::BOAT_ROTATION_LERP,
            fixed_dt: smoothing::FIXED_DT,
            settle_epsilon: smoothing::SETTLE_EPSILON,
        }
    }

    pub fn boulder() -> Self {
        Self {
            position_lerp: smoothing::BOULDER_POSITION_LERP,
            rotation_lerp: smoothing::BOULDER_ROTATION_LERP,
            fixed_dt: smoothing::FIXED_DT,
            settle_epsilon: smoothing::SETTLE_EPSILON,
        }
    }

    pub fn avatar() -> Self {
        Self {
            position_lerp: smoothing::AVATAR_POSITION_LERP,
            rotation_lerp: smoothing::AVATAR_ROTATION_LERP,
            fixed_dt: smoothing::FIXED_DT,
            settle_epsilon: smoothing::SETTLE_EPSILON,
        }
    }

    /// Preset for an entity kind. Structures never move after placement and
    /// use the avatar constants for their spawn correction.
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Boat => Self::boat(),
            EntityKind::Boulder => Self::boulder(),
            EntityKind::Avatar | EntityKind::Structure(_) => Self::avatar(),
        }
    }

    /// Blend factor for `dt` seconds: 1 - (1 - lerp)^(dt / fixed_dt)
    fn alpha(&self, lerp: f32, dt: f32) -> f32 {
        if dt <= 0.0 || self.fixed_dt <= 0.0 {
            return 0.0;
        }
        let keep = (1.0 - lerp.clamp(0.0, 1.0)).powf(dt / self.fixed_dt);
        1.0 - keep
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self::avatar()
    }
}

/// Rendered pose of one remote entity plus its latest authoritative target
#[derive(Debug, Clone)]
pub struct ReconciliationBuffer {
    config: SmoothingConfig,
    rendered: Transform,
    target: Option<Transform>,
}

impl ReconciliationBuffer {
    pub fn new(spawn_pose: Transform, config: SmoothingConfig) -> Self {
        Self {
            config,
            rendered: spawn_pose,
            target: None,
        }
    }

    /// New authoritative sample
    pub fn set_target(&mut self, target: Transform) {
        self.target = Some(target);
    }

    pub fn target(&self) -> Option<&Transform> {
        self.target.as_ref()
    }

    pub fn rendered(&self) -> &Transform {
        &self.rendered
    }

    /// Ease the rendered pose toward the target. Holds the current pose if
    /// no sample has ever arrived.
    pub fn advance(&mut self, dt: f32) -> Transform {
        let Some(target) = self.target else {
            return self.rendered;
        };

        let pos_alpha = self.config.alpha(self.config.position_lerp, dt);
        let rot_alpha = self.config.alpha(self.config.rotation_lerp, dt);

        let mut position = self.rendered.position.lerp(target.position, pos_alpha);
        let mut rotation = self.rendered.rotation.slerp(target.rotation, rot_alpha);

        if position.distance_to(target.position) < self.config.settle_epsilon {
            position = target.position;
        }
        if rotation.angle_to(target.rotation) < self.config.settle_epsilon {
            rotation = target.rotation;
        }

        self.rendered = Transform { position, rotation };
        self.rendered
    }

    /// Jump straight to the target (teleports, ownership hand-back)
    pub fn snap_to_target(&mut self) {
        if let Some(target) = self.target {
            self.rendered = target;
        }
    }

    /// Position error remaining, 0 when there is no target
    pub fn distance_to_target(&self) -> f32 {
        self.target
            .map(|t| self.rendered.position.distance_to(t.position))
            .unwrap_or(0.0)
    }

    pub fn is_settled(&self) -> bool {
        match self.target {
            Some(t) => self.rendered == t,
            None => true,
        }
    }
}
