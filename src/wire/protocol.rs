//! Wire message definitions
//! These are the per-tick types exchanged with the game engine

/// 3D vector in field coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Car orientation in radians
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rotator {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

/// Physical state of one car in play
#[derive(Debug, Clone, PartialEq)]
pub struct CarState {
    /// Player index of this car
    pub index: u8,
    /// Team id (0 = blue, 1 = orange)
    pub team: u8,
    pub position: Vec3,
    pub rotation: Rotator,
    pub velocity: Vec3,
}

/// Physical state of the ball
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BallState {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Decoded per-tick game state delivered to a bot
///
/// Produced once per tick by the codec and consumed read-only by exactly
/// one policy invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct GameTickSnapshot {
    /// Engine frame sequence number
    pub frame: u32,
    /// Game clock in seconds
    pub game_time: f32,
    /// Player index this snapshot is addressed to
    pub player_index: u8,
    /// Team id of the addressed bot
    pub team: u8,
    /// Bot-type tag assigned by the engine
    pub bot_type: String,
    /// All cars currently in play
    pub cars: Vec<CarState>,
    pub ball: BallState,
}

/// Per-tick control response returned to the engine
///
/// Continuous axes are always held in [-1.0, 1.0]; `clamped` is applied to
/// every policy-produced value before it leaves the process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlOutput {
    /// Steering (-1.0 = full left, 1.0 = full right)
    pub steer: f32,
    /// Throttle (-1.0 = full reverse, 1.0 = full forward)
    pub throttle: f32,
    /// Nose pitch while airborne
    pub pitch: f32,
    /// Yaw while airborne
    pub yaw: f32,
    /// Roll while airborne
    pub roll: f32,
    pub jump: bool,
    pub boost: bool,
    pub handbrake: bool,
    pub use_item: bool,
}

impl ControlOutput {
    /// Safe no-op output for a stationary car
    pub const NEUTRAL: Self = Self {
        steer: 0.0,
        throttle: 0.0,
        pitch: 0.0,
        yaw: 0.0,
        roll: 0.0,
        jump: false,
        boost: false,
        handbrake: false,
        use_item: false,
    };

    /// Clamp all continuous axes into [-1.0, 1.0]
    pub fn clamped(self) -> Self {
        Self {
            steer: self.steer.clamp(-1.0, 1.0),
            throttle: self.throttle.clamp(-1.0, 1.0),
            pitch: self.pitch.clamp(-1.0, 1.0),
            yaw: self.yaw.clamp(-1.0, 1.0),
            roll: self.roll.clamp(-1.0, 1.0),
            ..self
        }
    }
}

impl Default for ControlOutput {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_is_all_zero() {
        let n = ControlOutput::NEUTRAL;
        assert_eq!(n.steer, 0.0);
        assert_eq!(n.throttle, 0.0);
        assert_eq!(n.pitch, 0.0);
        assert_eq!(n.yaw, 0.0);
        assert_eq!(n.roll, 0.0);
        assert!(!n.jump && !n.boost && !n.handbrake && !n.use_item);
    }

    #[test]
    fn clamped_bounds_continuous_axes() {
        let out = ControlOutput {
            steer: 5.0,
            throttle: -3.5,
            pitch: 1.0001,
            yaw: -0.5,
            roll: f32::INFINITY,
            jump: true,
            ..ControlOutput::NEUTRAL
        }
        .clamped();

        assert_eq!(out.steer, 1.0);
        assert_eq!(out.throttle, -1.0);
        assert_eq!(out.pitch, 1.0);
        assert_eq!(out.yaw, -0.5);
        assert_eq!(out.roll, 1.0);
        assert!(out.jump);
    }
}
