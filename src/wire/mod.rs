//! Wire protocol between the game engine and the agent

pub mod codec;
pub mod protocol;

pub use protocol::{BallState, CarState, ControlOutput, GameTickSnapshot, Rotator, Vec3};
