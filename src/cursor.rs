// src/cursor.rs
use log::{debug, info};

use crate::config::CursorConfig;
use crate::trial::Actuator;
use crate::types::{Boundary, Side};

/// Headless cursor on a one-dimensional track. Starts centred, with a
/// boundary `margin` units away on each side.
#[derive(Clone, Debug)]
pub struct CursorTrack {
    config: CursorConfig,
    position: i64,
    prompt: String,
    steps: usize,
    collisions: Vec<Side>,
}

impl CursorTrack {
    pub fn new(config: CursorConfig) -> Self {
        Self {
            config,
            position: 0,
            prompt: String::new(),
            steps: 0,
            collisions: Vec::new(),
        }
    }

    /// Signed offset from the start position; negative is left.
    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn collisions(&self) -> &[Side] {
        &self.collisions
    }
}

impl Default for CursorTrack {
    fn default() -> Self {
        Self::new(CursorConfig::default())
    }
}

impl Actuator for CursorTrack {
    fn show_prompt(&mut self, text: &str) {
        self.prompt = text.to_owned();
    }

    fn reset_position(&mut self) {
        self.position = 0;
        self.steps = 0;
    }

    fn step(&mut self, direction: Side) {
        self.position += match direction {
            Side::Left => -self.config.step,
            Side::Right => self.config.step,
        };
        self.steps += 1;
        debug!("cursor at {}", self.position);
    }

    fn boundary_reached(&self) -> Boundary {
        if self.position <= -self.config.margin {
            Boundary::Reached(Side::Left)
        } else if self.position >= self.config.margin {
            Boundary::Reached(Side::Right)
        } else {
            Boundary::None
        }
    }

    // Centre counts as left.
    fn closest_side(&self) -> Side {
        if self.position <= 0 {
            Side::Left
        } else {
            Side::Right
        }
    }

    fn collide(&mut self, side: Side) {
        info!("cursor collided {side:?}");
        self.collisions.push(side);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_after_margin_over_step_moves() {
        let mut track = CursorTrack::default();
        for _ in 0..19 {
            track.step(Side::Right);
            assert_eq!(track.boundary_reached(), Boundary::None);
        }
        track.step(Side::Right);
        assert_eq!(track.boundary_reached(), Boundary::Reached(Side::Right));
    }

    #[test]
    fn closest_side_ties_go_left() {
        let mut track = CursorTrack::default();
        assert_eq!(track.closest_side(), Side::Left);
        track.step(Side::Right);
        assert_eq!(track.closest_side(), Side::Right);
        track.reset_position();
        assert_eq!(track.position(), 0);
    }
}
