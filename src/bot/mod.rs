//! Bot policy capability and built-in policies

pub mod registry;

pub use registry::{BotHandle, BotRegistry, LifecycleState};

use std::sync::Arc;

use tracing::info;

use crate::wire::{ControlOutput, GameTickSnapshot};

/// Identity of a bot the engine asked us to control
#[derive(Debug, Clone)]
pub struct SpawnInfo {
    pub index: u8,
    pub team: u8,
    pub bot_type: String,
}

impl SpawnInfo {
    pub fn from_snapshot(snapshot: &GameTickSnapshot) -> Self {
        Self {
            index: snapshot.player_index,
            team: snapshot.team,
            bot_type: snapshot.bot_type.clone(),
        }
    }
}

/// Pluggable decision capability behind one controlled car
///
/// Any conforming implementation is interchangeable without dispatcher
/// changes. `process_input` runs off the async executor and may take as
/// long as it likes; the dispatcher stops waiting at the tick budget.
pub trait BotPolicy: Send + 'static {
    /// Player index this policy controls
    fn index(&self) -> u8;

    /// Map one game-state snapshot to a control response
    fn process_input(&mut self, snapshot: &GameTickSnapshot) -> ControlOutput;

    /// Called exactly once when the bot is taken out of play
    fn retire(&mut self) {}
}

/// Errors surfaced by a policy factory
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("bot policy construction failed: {0}")]
    Construction(String),
}

/// Factory invoked once per new player index
pub type PolicyFactory =
    Arc<dyn Fn(&SpawnInfo) -> Result<Box<dyn BotPolicy>, PolicyError> + Send + Sync>;

/// Placeholder policy: drive straight at full throttle
pub struct ConstantPolicy {
    index: u8,
}

impl ConstantPolicy {
    pub fn new(index: u8) -> Self {
        Self { index }
    }

    /// Factory wiring the placeholder policy for every new index
    pub fn factory() -> PolicyFactory {
        Arc::new(|spawn| Ok(Box::new(ConstantPolicy::new(spawn.index)) as Box<dyn BotPolicy>))
    }
}

impl BotPolicy for ConstantPolicy {
    fn index(&self) -> u8 {
        self.index
    }

    fn process_input(&mut self, _snapshot: &GameTickSnapshot) -> ControlOutput {
        ControlOutput {
            throttle: 1.0,
            ..ControlOutput::NEUTRAL
        }
    }

    fn retire(&mut self) {
        info!(index = self.index, "Retiring bot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::BallState;

    fn snapshot_for(index: u8) -> GameTickSnapshot {
        GameTickSnapshot {
            frame: 1,
            game_time: 0.0,
            player_index: index,
            team: 0,
            bot_type: "constant".to_string(),
            cars: Vec::new(),
            ball: BallState::default(),
        }
    }

    #[test]
    fn constant_policy_drives_forward() {
        let mut policy = ConstantPolicy::new(4);
        let output = policy.process_input(&snapshot_for(4));

        assert_eq!(policy.index(), 4);
        assert_eq!(output.throttle, 1.0);
        assert_eq!(output.steer, 0.0);
        assert!(!output.jump);
    }

    #[test]
    fn spawn_info_carries_the_snapshot_identity() {
        let spawn = SpawnInfo::from_snapshot(&snapshot_for(9));
        assert_eq!(spawn.index, 9);
        assert_eq!(spawn.team, 0);
        assert_eq!(spawn.bot_type, "constant");
    }
}
